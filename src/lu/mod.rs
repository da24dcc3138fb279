//! Distributed block-cyclic LU factorization driver.
//!
//! Implements `spec.md` §4.2 (outer loop, phases P1–P6) and §4.3 (the
//! per-step state machine), built on the [`crate::grid::ProcessGrid`]
//! communicator split and the [`crate::gemm`] engine for the bulk
//! trailing update. Grounded structurally on
//! `examples/latesnow-lamellar-runtime/src/array/operations/read_only.rs`'s
//! "compute owned region, operate locally, exchange boundary data"
//! shape, translated from Lamellar's one-sided PGAS model onto
//! explicit MPI broadcasts.

pub mod pack;
mod workspace;

use log::{debug, trace};

use crate::error::{LuError, Result};
use crate::gemm;
use crate::grid::ProcessGrid;
use pack::{local_offset, pack_local, unpack_local};
use workspace::StepWorkspace;

/// Splits `world_size` ranks and `n` into the distributed square
/// `n_dist`×`n_dist` top-left region plus the serial `tail`×`tail`
/// residual, per `spec.md` §4.2 step 2: `n_dist` is the largest
/// multiple of `block * g` not exceeding `n`.
pub fn split_dims(n: usize, block: usize, g: usize) -> (usize, usize) {
    if block == 0 || g == 0 {
        return (0, n);
    }
    let cycle = block * g;
    let n_dist = (n / cycle) * cycle;
    (n_dist, n - n_dist)
}

/// This world rank's coordinates within the row/column
/// sub-communicators, matching [`ProcessGrid::row_rank`] /
/// [`ProcessGrid::col_rank`] for any rank in a square `g`×`g` grid
/// without needing that rank's own communicator handles (used by
/// rank 0 during the gather phase to address every other rank's data).
#[inline]
pub fn rank_coords(world_rank: usize, g: usize) -> (usize, usize) {
    (world_rank % g, world_rank / g)
}

/// Factors the `n`×`n` matrix `a` (row-major, leading dimension `n`,
/// identical on every rank at entry) in place. Only rank 0's copy of
/// `a` holds the complete result on return; every other rank's copy
/// is left in an unspecified partially-updated state, matching the
/// gather-to-rank-0 contract of `spec.md` §4.2 step 4.
///
/// Requires a square process grid (`grid.rows() == grid.cols()`): the
/// per-process local buffer is `m`×`m` with `m = n_dist / rows`, which
/// only tiles the distributed region exactly when `rows == cols` (see
/// `DESIGN.md` for why this is carried over from the original rather
/// than silently generalized).
pub fn factor(
    grid: &ProcessGrid,
    n: usize,
    block: usize,
    pool: &rayon::ThreadPool,
    use_padding: bool,
    a: &mut [f64],
) -> Result<()> {
    if grid.rows() != grid.cols() {
        return Err(LuError::Config(format!(
            "distributed LU requires a square process grid, got {}x{}",
            grid.rows(),
            grid.cols()
        )));
    }
    if block == 0 {
        return Err(LuError::Config("block size must be nonzero".into()));
    }
    if a.len() != n * n {
        return Err(LuError::Config(format!(
            "matrix buffer length {} does not match n*n ({})",
            a.len(),
            n * n
        )));
    }

    let g = grid.rows();
    let (n_dist, tail) = split_dims(n, block, g);
    debug!(
        "[rank {}] factoring n={n} on a {g}x{g} grid, block={block}, n_dist={n_dist}, tail={tail}",
        grid.rank()
    );

    if n_dist > 0 {
        factor_distributed(grid, n, n_dist, block, g, pool, use_padding, a)?;
    }

    if tail > 0 && grid.rank() == 0 {
        debug!("[rank 0] factoring {tail}x{tail} serial tail residual");
        factor_tail_serial(a, n, n_dist, tail);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn factor_distributed(
    grid: &ProcessGrid,
    n: usize,
    n_dist: usize,
    block: usize,
    g: usize,
    pool: &rayon::ThreadPool,
    use_padding: bool,
    a: &mut [f64],
) -> Result<()> {
    let n_blocks = n_dist / block;
    let m = n_dist / g;
    let row_rank = grid.row_rank();
    let col_rank = grid.col_rank();

    let mut local = vec![0.0; m * m];
    pack_local(a, n, n_blocks, block, g, row_rank, col_rank, &mut local, m);

    let mut ws = StepWorkspace::new(block, m);

    for bk in 0..n_blocks {
        step(grid, bk, n_blocks, block, g, m, row_rank, col_rank, pool, use_padding, &mut local, &mut ws)?;
    }

    grid.barrier();
    debug!("[rank {}] distributed phase done, gathering to rank 0", grid.rank());
    gather(grid, n, n_dist, n_blocks, block, g, m, &local, a);
    Ok(())
}

/// Runs phases P1–P6 of `spec.md` §4.2/§4.3 for one outer step `bk`.
#[allow(clippy::too_many_arguments)]
fn step(
    grid: &ProcessGrid,
    bk: usize,
    n_blocks: usize,
    block: usize,
    g: usize,
    m: usize,
    row_rank: usize,
    col_rank: usize,
    pool: &rayon::ThreadPool,
    use_padding: bool,
    local: &mut [f64],
    ws: &mut StepWorkspace,
) -> Result<()> {
    let block_idx = bk % g;
    let is_diag = row_rank == block_idx && col_rank == block_idx;
    let is_col_owner = col_rank == block_idx; // produces U_k (row panel)
    let is_row_owner = row_rank == block_idx; // produces L_k (column panel)

    let ro_k = local_offset(bk, row_rank, g, block);
    let co_k = local_offset(bk, col_rank, g, block);
    let ro_n = local_offset(bk + 1, row_rank, g, block);
    let co_n = local_offset(bk + 1, col_rank, g, block);

    // P1: deferred trailing update onto the diagonal block itself,
    // using last step's panels.
    if bk > 0 && is_diag {
        let ldu_p = m - ro_k;
        gemm::gemm(
            block,
            block,
            block,
            -1.0,
            ws.l.previous(),
            block,
            ws.u.previous(),
            ldu_p,
            1.0,
            &mut local[co_k * m + ro_k..],
            m,
        );
    }

    // P2: local unblocked factorization of the diagonal block, owner
    // only. Deliberately does not detect or report singularity, per
    // `spec.md` §7.
    if is_diag {
        trace!("[rank {}] step {bk}: factoring diagonal block", grid.rank());
        factor_diagonal_block(local, m, co_k, ro_k, block, ws);
    }

    // P3 (broadcast the factored diagonal block to every row/column
    // owner) runs on a scoped thread concurrently with P4 (the
    // deferred trailing update onto the row-panel / column-panel
    // strips adjacent to the diagonal block, which only touches last
    // step's panels and `local` — disjoint from the `lu_k` buffer the
    // broadcast writes into), per `spec.md` §5's non-blocking-broadcast
    // overlap invariant. The scope's implicit join at the end is the
    // "wait" the spec calls for.
    {
        let StepWorkspace { lu_k, l, u, .. } = &mut *ws;
        std::thread::scope(|scope| {
            scope.spawn(move || {
                if is_row_owner {
                    grid.broadcast_col(lu_k, block_idx);
                }
                if is_col_owner {
                    grid.broadcast_row(lu_k, block_idx);
                }
                trace!(
                    "[rank {}] step {bk}: diagonal block broadcast complete",
                    grid.rank()
                );
            });

            if bk > 0 {
                if is_col_owner {
                    let ldu_p = m - ro_k;
                    gemm::gemm(
                        block,
                        m - ro_n,
                        block,
                        -1.0,
                        l.previous(),
                        block,
                        &u.previous()[ro_n - ro_k..],
                        ldu_p,
                        1.0,
                        &mut local[co_k * m + ro_n..],
                        m,
                    );
                }
                if is_row_owner {
                    let ldu_p = m - ro_k;
                    gemm::gemm(
                        m - co_n,
                        block,
                        block,
                        -1.0,
                        &l.previous()[(co_n - co_k) * block..],
                        block,
                        u.previous(),
                        ldu_p,
                        1.0,
                        &mut local[co_n * m + ro_k..],
                        m,
                    );
                }
            }
        });
    }

    // P5: triangular solves producing this step's panels.
    if is_col_owner {
        solve_row_panel(local, m, co_k, ro_n, m - ro_n, block, &ws.lu_k, ws.u.current_mut());
    }
    if is_row_owner {
        solve_col_panel(local, m, co_n, ro_k, m - co_n, block, &ws.lu_k, &ws.q, ws.l.current_mut());
    }

    // P6: broadcasting this step's freshly produced panels (every
    // process belongs to exactly one column communicator group
    // sharing its own `ro_n` — hence the same row-panel width — and
    // one row communicator group sharing its own `co_n` — hence the
    // same column-panel height — so every process, not just owners,
    // participates in both broadcasts; only the owner's slice of the
    // panel buffer holds real data going in) runs on a scoped thread
    // concurrently with the bulk trailing GEMM against the *previous*
    // step's panels. [`workspace::PanelPair::split_mut`] gives disjoint
    // mutable/immutable access to "current" (what the broadcast writes)
    // and "previous" (what the GEMM reads), so the two genuinely run at
    // once rather than just being issued back-to-back on one thread —
    // `spec.md` §4.2 P6's "key pipelining trick" and §5's non-blocking-
    // broadcast overlap invariant (see `lu::pack` module docs on the
    // row/column axis transposition for why `U_k`'s width is keyed off
    // `row_rank` and `L_k`'s height off `col_rank`).
    let u_width = m - ro_n;
    let l_height = m - co_n;
    let mut bulk_result: Result<()> = Ok(());
    {
        let StepWorkspace { u, l, .. } = &mut *ws;
        let (u_cur, u_prev) = u.split_mut();
        let (l_cur, l_prev) = l.split_mut();

        std::thread::scope(|scope| {
            scope.spawn(move || {
                if u_width > 0 {
                    grid.broadcast_col(&mut u_cur[..block * u_width], block_idx);
                }
                if l_height > 0 {
                    grid.broadcast_row(&mut l_cur[..l_height * block], block_idx);
                }
            });

            if bk > 0 {
                let rows = m - co_n;
                let cols = m - ro_n;
                if rows > 0 && cols > 0 {
                    let ldu_p = m - ro_k;
                    let l_slice = &l_prev[(co_n - co_k) * block..];
                    let u_slice = &u_prev[ro_n - ro_k..];
                    if use_padding {
                        bulk_result = gemm::gemm_padded(
                            pool,
                            rows,
                            cols,
                            block,
                            -1.0,
                            l_slice,
                            block,
                            u_slice,
                            ldu_p,
                            1.0,
                            &mut local[co_n * m + ro_n..],
                            m,
                        );
                    } else {
                        gemm::gemm_parallel(
                            pool,
                            rows,
                            cols,
                            block,
                            -1.0,
                            l_slice,
                            block,
                            u_slice,
                            ldu_p,
                            1.0,
                            &mut local[co_n * m + ro_n..],
                            m,
                        );
                    }
                }
            }
        });
    }
    bulk_result?;

    ws.u.swap();
    ws.l.swap();
    let _ = n_blocks;
    Ok(())
}

/// Right-looking unblocked LU of the `block`×`block` diagonal block at
/// local `(co_k, ro_k)`, in place, with the factored block additionally
/// copied into `ws.lu_k` (leading dimension `block`) and `ws.q` filled
/// with the reciprocals of its diagonal.
fn factor_diagonal_block(
    local: &mut [f64],
    ld: usize,
    co_k: usize,
    ro_k: usize,
    block: usize,
    ws: &mut StepWorkspace,
) {
    let base = co_k * ld + ro_k;
    for t in 0..block {
        let piv = local[base + t * ld + t];
        let q = 1.0 / piv;
        for i in (t + 1)..block {
            local[base + i * ld + t] *= q;
        }
        for i in (t + 1)..block {
            let lik = local[base + i * ld + t];
            for j in (t + 1)..block {
                local[base + i * ld + j] -= lik * local[base + t * ld + j];
            }
        }
        ws.q[t] = q;
    }
    for i in 0..block {
        ws.lu_k[i * block..i * block + block]
            .copy_from_slice(&local[base + i * ld..base + i * ld + block]);
    }
}

/// Forward-substitutes the now-known unit-lower triangle of `lu_k`
/// against the `block`×`width` strip at local `(row_off, col_off)`,
/// writing the result into `out` (leading dimension `width`). This is
/// P5's "column owner" solve producing `U_k`.
#[allow(clippy::too_many_arguments)]
fn solve_row_panel(
    local: &[f64],
    ld: usize,
    row_off: usize,
    col_off: usize,
    width: usize,
    block: usize,
    lu_k: &[f64],
    out: &mut [f64],
) {
    for j in 0..width {
        for i in 0..block {
            let mut val = local[(row_off + i) * ld + col_off + j];
            for k in 0..i {
                val -= lu_k[i * block + k] * out[k * width + j];
            }
            out[i * width + j] = val;
        }
    }
}

/// Back-substitutes (scaled by the diagonal reciprocals `q`) the
/// known upper triangle of `lu_k` against the `height`×`block` strip
/// at local `(row_off, col_off)`, writing into `out` (leading
/// dimension `block`). This is P5's "row owner" solve producing
/// `L_k`.
#[allow(clippy::too_many_arguments)]
fn solve_col_panel(
    local: &[f64],
    ld: usize,
    row_off: usize,
    col_off: usize,
    height: usize,
    block: usize,
    lu_k: &[f64],
    q: &[f64],
    out: &mut [f64],
) {
    for i in 0..height {
        for j in 0..block {
            let mut val = local[(row_off + i) * ld + col_off + j];
            for k in 0..j {
                val -= out[i * block + k] * lu_k[k * block + j];
            }
            out[i * block + j] = val * q[j];
        }
    }
}

/// Gathers every rank's local buffer into rank 0's copy of `a` via the
/// same block-cyclic index mapping used to pack it, per `spec.md`
/// §4.2 step 4. Uses a fixed-size `gather` collective since every
/// rank's local buffer is the same `m`×`m` size in a square grid.
#[allow(clippy::too_many_arguments)]
fn gather(
    grid: &ProcessGrid,
    n: usize,
    _n_dist: usize,
    n_blocks: usize,
    block: usize,
    g: usize,
    m: usize,
    local: &[f64],
    a: &mut [f64],
) {
    use mpi::traits::*;

    let world = grid.world();
    if grid.rank() == 0 {
        let mut all = vec![0.0f64; m * m * grid.world_size()];
        world
            .process_at_rank(0)
            .gather_into_root(local, &mut all[..]);
        for r in 0..grid.world_size() {
            let (rr, cr) = rank_coords(r, g);
            let chunk = &all[r * m * m..(r + 1) * m * m];
            unpack_local(chunk, m, n_blocks, block, g, rr, cr, a, n);
        }
    } else {
        world.process_at_rank(0).gather_into(local);
    }
}

/// Serial, unblocked, unpivoted LU of the `tail`×`tail` bottom-right
/// residual, run on rank 0 only after the distributed region has been
/// gathered.
///
/// This does not couple back with the distributed top-left
/// factorization: the off-diagonal blocks connecting the two regions
/// (the tail's leading `tail` columns within the top `n_dist` rows,
/// and vice versa) are left untouched, matching the incompleteness
/// flagged in `spec.md` §7/Open Questions for non-multiple-of-block-
/// times-grid matrix sizes. Callers that need a fully coupled
/// factorization for such sizes must round `n` down to a multiple of
/// `block * grid_side` themselves.
fn factor_tail_serial(a: &mut [f64], n: usize, n_dist: usize, tail: usize) {
    let base = n_dist * n + n_dist;
    for k in 0..tail {
        let piv = a[base + k * n + k];
        for i in (k + 1)..tail {
            a[base + i * n + k] /= piv;
        }
        for i in (k + 1)..tail {
            let lik = a[base + i * n + k];
            for j in (k + 1)..tail {
                a[base + i * n + j] -= lik * a[base + k * n + j];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ProcessGrid;

    fn reference_lu_no_pivot(a: &mut [f64], n: usize) {
        for k in 0..n {
            let piv = a[k * n + k];
            for i in (k + 1)..n {
                a[i * n + k] /= piv;
            }
            for i in (k + 1)..n {
                let lik = a[i * n + k];
                for j in (k + 1)..n {
                    a[i * n + j] -= lik * a[k * n + j];
                }
            }
        }
    }

    fn make_diagonally_dominant(n: usize, seed: u64) -> Vec<f64> {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut a = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                a[i * n + j] = rng.gen::<f64>();
            }
            a[i * n + i] += n as f64 * 2.0;
        }
        a
    }

    #[test]
    fn split_dims_rounds_down_to_cycle() {
        assert_eq!(split_dims(16, 4, 2), (16, 0));
        assert_eq!(split_dims(17, 4, 2), (16, 1));
        assert_eq!(split_dims(7, 4, 2), (0, 7));
    }

    #[test]
    fn single_process_matches_reference_lu() {
        let universe = mpi::initialize().expect("MPI must initialize for solo tests");
        let grid = ProcessGrid::solo(universe.world());
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();

        let n = 12usize;
        let block = 4usize;
        let mut a = make_diagonally_dominant(n, 42);
        let mut expected = a.clone();

        factor(&grid, n, block, &pool, false, &mut a).unwrap();
        reference_lu_no_pivot(&mut expected, n);

        for i in 0..n * n {
            assert!((a[i] - expected[i]).abs() < 1e-6, "index {i}: {} vs {}", a[i], expected[i]);
        }
    }

    #[test]
    fn rank_coords_are_consistent_bijection() {
        let g = 3usize;
        let mut seen = std::collections::HashSet::new();
        for r in 0..g * g {
            let coords = rank_coords(r, g);
            assert!(coords.0 < g && coords.1 < g);
            assert!(seen.insert(coords));
        }
    }
}
