//! 2-D process grid and the row/column communicators derived from it.
//!
//! Implements `spec.md` §3 ("Process grid") and the setup-phase
//! communicator split of §4.2 step 5. Grounded on
//! `examples/latesnow-lamellar-runtime/src/barrier.rs`'s separation of
//! "my rank in the world" from "my rank within a sub-team"
//! (`arch.team_pe`), translated here from Lamellar's PGAS active-message
//! world onto `mpi` (rsmpi)'s `SystemCommunicator` /
//! `UserCommunicator` split API, per `original_source/shared/lu.h`'s
//! `MPI_Dims_create` + `MPI_Comm_split` pair.

use log::debug;
use mpi::topology::{Color, SystemCommunicator, UserCommunicator};
use mpi::traits::*;

use crate::error::{LuError, Result};

/// A rectangular process grid `(rows, cols)` with `rows * cols ==
/// world_size`, plus this rank's coordinate and the row/column
/// sub-communicators it belongs to.
pub struct ProcessGrid {
    world: SystemCommunicator,
    row_comm: UserCommunicator,
    col_comm: UserCommunicator,
    rows: usize,
    cols: usize,
    row_idx: usize,
    col_idx: usize,
}

/// Factors `world_size` into `(rows, cols)` as close to a square as
/// possible, with `rows * cols == world_size` and `rows <= cols`. Pure
/// and MPI-free so it can be unit-tested directly; mirrors
/// `MPI_Dims_create(world_size, 2, psizes)`'s "most balanced
/// factorization" contract from `spec.md` §4.2 step 1.
pub fn factor_dims(world_size: usize) -> (usize, usize) {
    if world_size == 0 {
        return (0, 0);
    }
    let mut rows = (world_size as f64).sqrt() as usize;
    while rows > 1 && world_size % rows != 0 {
        rows -= 1;
    }
    let cols = world_size / rows.max(1);
    (rows.max(1), cols)
}

impl ProcessGrid {
    /// Builds the process grid for `world`, factoring its size into
    /// `(R, C)` and splitting `world` into row and column
    /// communicators by grid coordinate, per `spec.md` §3: `row_idx =
    /// rank / R`, `col_idx = rank % R` (row-major layout over the
    /// grid), row communicator groups ranks sharing `row_idx`, column
    /// communicator groups ranks sharing `col_idx`.
    pub fn new(world: SystemCommunicator) -> Result<Self> {
        let world_size = world.size() as usize;
        let rank = world.rank() as usize;
        let (rows, cols) = factor_dims(world_size);
        if rows * cols != world_size {
            return Err(LuError::Config(format!(
                "world_size {world_size} could not be factored into a process grid"
            )));
        }

        let row_idx = rank / rows;
        let col_idx = rank % rows;

        // Row communicator: all ranks sharing row_idx. Column
        // communicator: all ranks sharing col_idx. Matches
        // `MPI_Comm_split(MPI_COMM_WORLD, row_idx, rank, &row_comm)`
        // / `MPI_Comm_split(MPI_COMM_WORLD, col_idx, rank, &col_comm)`.
        let row_comm = world
            .split_by_color(Color::with_value(row_idx as i32))
            .ok_or_else(|| LuError::Mpi("failed to split row communicator".into()))?;
        let col_comm = world
            .split_by_color(Color::with_value(col_idx as i32))
            .ok_or_else(|| LuError::Mpi("failed to split column communicator".into()))?;

        debug!(
            "[rank {rank}] process grid {rows}x{cols}, coordinate ({row_idx}, {col_idx})"
        );

        Ok(ProcessGrid {
            world,
            row_comm,
            col_comm,
            rows,
            cols,
            row_idx,
            col_idx,
        })
    }

    /// A degenerate 1x1 grid for single-process unit testing (no
    /// `mpirun` launch required), per `SPEC_FULL.md` EXPANSION 6.
    pub fn solo(world: SystemCommunicator) -> Self {
        let row_comm = world.split_by_color(Color::with_value(0)).unwrap();
        let col_comm = world.split_by_color(Color::with_value(0)).unwrap();
        ProcessGrid {
            world,
            row_comm,
            col_comm,
            rows: 1,
            cols: 1,
            row_idx: 0,
            col_idx: 0,
        }
    }

    pub fn world(&self) -> &SystemCommunicator {
        &self.world
    }

    pub fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    pub fn world_size(&self) -> usize {
        self.world.size() as usize
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row_idx(&self) -> usize {
        self.row_idx
    }

    pub fn col_idx(&self) -> usize {
        self.col_idx
    }

    /// This rank's position within its row communicator.
    pub fn row_rank(&self) -> usize {
        self.row_comm.rank() as usize
    }

    /// This rank's position within its column communicator.
    pub fn col_rank(&self) -> usize {
        self.col_comm.rank() as usize
    }

    /// Broadcasts `buf` from `root` (a rank within the row
    /// communicator) to every rank sharing this process's row. Blocking
    /// — see `SPEC_FULL.md` EXPANSION 1/4 for how overlap with compute
    /// is still achieved despite the underlying call being synchronous.
    pub fn broadcast_row(&self, buf: &mut [f64], root: usize) {
        self.row_comm
            .process_at_rank(root as i32)
            .broadcast_into(buf);
    }

    /// Broadcasts `buf` from `root` (a rank within the column
    /// communicator) to every rank sharing this process's column.
    pub fn broadcast_col(&self, buf: &mut [f64], root: usize) {
        self.col_comm
            .process_at_rank(root as i32)
            .broadcast_into(buf);
    }

    /// Synchronizes every rank in the world. Used only at phase
    /// boundaries that are not already implied by a broadcast wait
    /// (e.g. before the gather phase).
    pub fn barrier(&self) {
        self.world.barrier();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factors_perfect_squares() {
        assert_eq!(factor_dims(16), (4, 4));
        assert_eq!(factor_dims(1), (1, 1));
        assert_eq!(factor_dims(9), (3, 3));
    }

    #[test]
    fn factors_prefer_square_over_1xn() {
        assert_eq!(factor_dims(4), (2, 2));
        assert_eq!(factor_dims(6), (2, 3));
        assert_eq!(factor_dims(8), (2, 4));
    }

    #[test]
    fn factors_primes_as_1xn() {
        assert_eq!(factor_dims(7), (1, 7));
        assert_eq!(factor_dims(13), (1, 13));
    }

    #[test]
    fn factors_zero_as_degenerate() {
        assert_eq!(factor_dims(0), (0, 0));
    }
}
