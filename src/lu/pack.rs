//! Block-cyclic packing between the dense global matrix and each
//! process's local square buffer.
//!
//! Grounded on `original_source/shared/lu.h`'s `ro()`/`co()` offset
//! helpers and on the `MPI_Type_create_darray` distribution described
//! in `spec.md` §4.2 step 3. `MPI_Type_create_darray` is not
//! reproduced as an MPI derived datatype here (rsmpi's support for
//! user-defined darray types is not dependable across versions); the
//! same block-cyclic index mapping is instead computed directly in
//! Rust and used both for the initial per-rank pack and for the
//! rank-0 gather, which is functionally equivalent to packing/
//! unpacking through the datatype.
//!
//! A process's local buffer axes are deliberately *not* a literal
//! transcription of `lu.h`'s row/column naming: that source assigns
//! the buffer's row axis to the globally-owned column blocks and vice
//! versa, a transposition forced by how its `row_comm`/`col_comm`
//! split interacts with `ro()`/`co()`. The mapping below keeps that
//! same transposition (buffer row axis tracks globally owned *row*
//! blocks gated on `col_rank`, buffer column axis tracks globally
//! owned *column* blocks gated on `row_rank`) because `spec.md` §4.2
//! P4/P5 names "column owners" (`col_rank == block_idx`) as the ones
//! producing the row panel `U_k` and "row owners" (`row_rank ==
//! block_idx`) as the ones producing the column panel `L_k` — only
//! this assignment is consistent with those two sentences read
//! together.

/// Local offset (row *or* column, depending on which rank value is
/// passed) at which global block `bk`'s data begins for a process
/// whose rank-within-sub-communicator is `my_rank`, in a grid of side
/// `g` with block size `block`. Corresponds to `ro()`/`co()` in
/// `lu.h`: block `bk` is preceded, in this process's local numbering,
/// by `bk / g` full cycles of `block` plus one more `block`-sized
/// chunk if this process's position in the cycle comes before `bk`'s
/// position within it.
#[inline]
pub fn local_offset(bk: usize, my_rank: usize, g: usize, block: usize) -> usize {
    let chunk = bk / g;
    let extra = if my_rank < bk % g { block } else { 0 };
    chunk * block + extra
}

/// Does this process own global row-block `bi`? (Gated on `col_rank`
/// per the module-level note on axis assignment.)
#[inline]
pub fn owns_row_block(bi: usize, col_rank: usize, g: usize) -> bool {
    bi % g == col_rank
}

/// Does this process own global column-block `bj`? (Gated on
/// `row_rank`.)
#[inline]
pub fn owns_col_block(bj: usize, row_rank: usize, g: usize) -> bool {
    bj % g == row_rank
}

/// Copies this process's block-cyclically owned entries of the dense
/// `n_dist`×`n_dist` region of `global` (leading dimension
/// `ld_global`) into `local` (an `m`×`m` buffer, leading dimension
/// `ld_local`, `m = n_dist / g`).
#[allow(clippy::too_many_arguments)]
pub fn pack_local(
    global: &[f64],
    ld_global: usize,
    n_blocks: usize,
    block: usize,
    g: usize,
    row_rank: usize,
    col_rank: usize,
    local: &mut [f64],
    ld_local: usize,
) {
    for bi in 0..n_blocks {
        if !owns_row_block(bi, col_rank, g) {
            continue;
        }
        let chunk_i = bi / g;
        for bj in 0..n_blocks {
            if !owns_col_block(bj, row_rank, g) {
                continue;
            }
            let chunk_j = bj / g;
            for di in 0..block {
                let grow = bi * block + di;
                let lrow = chunk_i * block + di;
                let src = &global[grow * ld_global + bj * block..grow * ld_global + bj * block + block];
                let dst = &mut local[lrow * ld_local + chunk_j * block..lrow * ld_local + chunk_j * block + block];
                dst.copy_from_slice(src);
            }
        }
    }
}

/// Reverse of [`pack_local`]: scatters a single rank's `m`×`m` local
/// buffer (leading dimension `ld_local`) back into its owned entries
/// of `global` (leading dimension `ld_global`). `row_rank`/`col_rank`
/// are that rank's sub-communicator ranks, derived by the caller from
/// its world rank (see [`crate::lu::rank_coords`]).
#[allow(clippy::too_many_arguments)]
pub fn unpack_local(
    local: &[f64],
    ld_local: usize,
    n_blocks: usize,
    block: usize,
    g: usize,
    row_rank: usize,
    col_rank: usize,
    global: &mut [f64],
    ld_global: usize,
) {
    for bi in 0..n_blocks {
        if !owns_row_block(bi, col_rank, g) {
            continue;
        }
        let chunk_i = bi / g;
        for bj in 0..n_blocks {
            if !owns_col_block(bj, row_rank, g) {
                continue;
            }
            let chunk_j = bj / g;
            for di in 0..block {
                let grow = bi * block + di;
                let lrow = chunk_i * block + di;
                let src = &local[lrow * ld_local + chunk_j * block..lrow * ld_local + chunk_j * block + block];
                let dst = &mut global[grow * ld_global + bj * block..grow * ld_global + bj * block + block];
                dst.copy_from_slice(src);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_is_identity() {
        let g = 2usize;
        let block = 3usize;
        let n_blocks = 4usize; // n_dist = 12
        let n_dist = n_blocks * block;
        let m = n_dist / g;

        let global: Vec<f64> = (0..n_dist * n_dist).map(|i| i as f64).collect();
        let mut rebuilt = vec![-1.0; n_dist * n_dist];

        for world_rank in 0..(g * g) {
            let row_rank = world_rank % g;
            let col_rank = world_rank / g;
            let mut local = vec![0.0; m * m];
            pack_local(&global, n_dist, n_blocks, block, g, row_rank, col_rank, &mut local, m);
            unpack_local(&local, m, n_blocks, block, g, row_rank, col_rank, &mut rebuilt, n_dist);
        }

        assert_eq!(global, rebuilt);
    }

    #[test]
    fn every_global_block_has_exactly_one_owner() {
        let g = 3usize;
        let n_blocks = 6usize;
        for bi in 0..n_blocks {
            let owners: Vec<usize> = (0..g).filter(|&cr| owns_row_block(bi, cr, g)).collect();
            assert_eq!(owners.len(), 1);
        }
        for bj in 0..n_blocks {
            let owners: Vec<usize> = (0..g).filter(|&rr| owns_col_block(bj, rr, g)).collect();
            assert_eq!(owners.len(), 1);
        }
    }

    #[test]
    fn local_offset_monotonic_in_block_index() {
        let g = 4usize;
        let block = 8usize;
        let my_rank = 2usize;
        let mut prev = 0;
        for bk in 0..20 {
            let off = local_offset(bk, my_rank, g, block);
            assert!(off >= prev);
            prev = off;
        }
    }
}
