//! Error taxonomy for the factorization core.
//!
//! Mirrors the policy in `spec.md` §7: allocation failure is fatal and
//! reported with a one-line diagnostic, MPI errors propagate to the
//! default MPI error handler, and numerical singularity is never
//! detected (there is deliberately no `Singularity` variant here).

use thiserror::Error;

/// Errors the `gemm` and `lu` modules can return.
#[derive(Debug, Error)]
pub enum LuError {
    /// A size computation overflowed or a requested allocation would
    /// exceed `isize::MAX` bytes. Caught before calling into the
    /// allocator, per §7's OutOfMemory policy.
    #[error("allocation of {0} elements is not possible on this platform")]
    OutOfMemory(usize),

    /// `world_size` could not be laid out into a process grid, or a
    /// block size does not evenly divide the register-tile shape.
    /// Stands in for the C source's compile-time `#error` checks,
    /// which Rust cannot express for runtime-chosen sizes.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Propagated from the underlying MPI library. The default MPI
    /// error handler typically aborts before this is ever observed;
    /// it exists so library code has something to return.
    #[error("MPI call failed: {0}")]
    Mpi(String),
}

pub type Result<T> = std::result::Result<T, LuError>;
