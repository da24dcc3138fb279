//! Distributed, unpivoted, blocked LU factorization over a 2-D
//! block-cyclic process grid, with a cache-blocked SIMD GEMM engine.
//!
//! The two modules that carry the hard engineering are [`gemm`] (the
//! fused-tile matrix multiply micro-kernel) and [`lu`] (the
//! distributed panel/trailing-submatrix factorization pipeline built
//! on top of it). [`grid`] owns the 2-D process grid and the row/
//! column sub-communicators factorization is distributed across.
//! [`error`] is the shared error taxonomy for all three.

pub mod error;
pub mod gemm;
pub mod grid;
pub mod lu;

pub use error::{LuError, Result};
pub use grid::ProcessGrid;
