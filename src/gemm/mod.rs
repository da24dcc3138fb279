//! General matrix-matrix multiply: `C <- alpha * A * B + beta * C`.
//!
//! Implements `spec.md` §4.1. Three levels of blocking: an outer
//! `BLOCK`×`BLOCK` tile grid over the (ni, nj) iteration space, a
//! "mini" step that walks a `BLOCK`-wide strip of the reduction
//! dimension through the fused register-tile micro-kernel
//! ([`kernel::micro_mm`]), and scalar fallbacks ([`kernel::mini_mm`])
//! for the right-edge, bottom-edge and bottom-right-corner tiles that
//! don't fill a whole `BLOCK`×`BLOCK` square.
//!
//! [`gemm`] is the single-threaded entry point; [`gemm_parallel`]
//! distributes the outer tile grid across a [`rayon::ThreadPool`] with
//! static, chunk-size-1 scheduling over block-rows, per §4.1's
//! "Thread parallelism" paragraph. [`gemm_padded`] is the opt-in
//! leading-dimension padding wrapper.

pub mod kernel;

use crate::error::{LuError, Result};
use kernel::{micro_mm, mini_mm, scale_tile};
use rayon::prelude::*;

/// Outer cache-blocking tile size (`GEMM_BLOCK_SIZE` in the source).
pub const BLOCK: usize = 48;
/// Register-tile rows.
pub const RI: usize = 3;
/// Register-tile SIMD-lane columns (each lane is 4 wide).
pub const RJ: usize = 4;
/// SIMD lane width for `f64` on AVX2.
pub const LANE: usize = 4;
/// Leading-dimension padding multiple (`LDA_MULTIPLE` in the source).
/// Not semantically meaningful beyond being larger than any realistic
/// tile width and not a power of two, so padded rows land at
/// unpredictable cache-line offsets and avoid systematic associativity
/// conflicts during long k-sweeps.
pub const LDA_MULTIPLE: usize = 57;

const _: () = assert!(BLOCK % RI == 0, "RI must divide GEMM block size");
const _: () = assert!(
    BLOCK % (LANE * RJ) == 0,
    "4*RJ must divide GEMM block size"
);

#[inline]
fn required_len(rows: usize, cols: usize, ld: usize) -> usize {
    if rows == 0 {
        0
    } else {
        (rows - 1) * ld + cols
    }
}

fn check_dims(ni: usize, nj: usize, nk: usize, lda: usize, ldb: usize, ldc: usize) {
    debug_assert!(lda >= nk, "lda must be >= nk");
    debug_assert!(ldb >= nj, "ldb must be >= nj");
    debug_assert!(ldc >= nj, "ldc must be >= nj");
    let _ = (ni, nj, nk);
}

/// `C[0..ni, 0..nj] <- beta*C + alpha*A[0..ni,0..nk] * B[0..nk,0..nj]`,
/// all row-major with independent leading dimensions. A zero-sized
/// dimension is a no-op. Single-threaded.
pub fn gemm(
    ni: usize,
    nj: usize,
    nk: usize,
    alpha: f64,
    a: &[f64],
    lda: usize,
    b: &[f64],
    ldb: usize,
    beta: f64,
    c: &mut [f64],
    ldc: usize,
) {
    if ni == 0 || nj == 0 || nk == 0 {
        return;
    }
    check_dims(ni, nj, nk, lda, ldb, ldc);
    debug_assert!(a.len() >= required_len(ni, nk, lda));
    debug_assert!(b.len() >= required_len(nk, nj, ldb));
    debug_assert!(c.len() >= required_len(ni, nj, ldc));

    // ni_main rows are handled BLOCK rows at a time, each a multiple of
    // RI so micro_tile_block's full-tile path covers every row; the
    // remaining ni % BLOCK rows (which may not be a multiple of RI) go
    // through gemm_edge_tile's mini_mm fallback, exactly like
    // gemm_parallel's bottom-edge strip below.
    let ni_main = BLOCK * (ni / BLOCK);
    unsafe {
        let mut ii = 0;
        while ii < ni_main {
            gemm_block_row(
                ii,
                BLOCK,
                ni,
                nj,
                nk,
                alpha,
                a.as_ptr(),
                lda,
                b.as_ptr(),
                ldb,
                beta,
                c.as_mut_ptr(),
                ldc,
            );
            ii += BLOCK;
        }

        if ni_main < ni {
            let row_count = ni - ni_main;
            let nj_main = BLOCK * (nj / BLOCK);
            let mut jj = 0;
            while jj < nj_main {
                gemm_edge_tile(
                    ni_main,
                    row_count,
                    jj,
                    BLOCK,
                    nk,
                    alpha,
                    a.as_ptr(),
                    lda,
                    b.as_ptr(),
                    ldb,
                    beta,
                    c.as_mut_ptr(),
                    ldc,
                );
                jj += BLOCK;
            }
            if nj_main < nj {
                gemm_edge_tile(
                    ni_main,
                    row_count,
                    nj_main,
                    nj - nj_main,
                    nk,
                    alpha,
                    a.as_ptr(),
                    lda,
                    b.as_ptr(),
                    ldb,
                    beta,
                    c.as_mut_ptr(),
                    ldc,
                );
            }
        }
    }
}

/// Thread-parallel variant of [`gemm`], distributing the outer
/// block-row grid across `pool` with static scheduling (one `BLOCK`-row
/// chunk per task, matching `#pragma omp for schedule(static, 1)`).
/// The caller is assumed to already be inside (or calling from outside
/// but willing to block on) `pool` — this function does not itself
/// manage a persistent team beyond the lifetime of the call, per
/// `spec.md` §4.1's note that the kernel assumes it runs inside an
/// existing thread team.
#[allow(clippy::too_many_arguments)]
pub fn gemm_parallel(
    pool: &rayon::ThreadPool,
    ni: usize,
    nj: usize,
    nk: usize,
    alpha: f64,
    a: &[f64],
    lda: usize,
    b: &[f64],
    ldb: usize,
    beta: f64,
    c: &mut [f64],
    ldc: usize,
) {
    if ni == 0 || nj == 0 || nk == 0 {
        return;
    }
    check_dims(ni, nj, nk, lda, ldb, ldc);
    debug_assert!(a.len() >= required_len(ni, nk, lda));
    debug_assert!(b.len() >= required_len(nk, nj, ldb));
    debug_assert!(c.len() >= required_len(ni, nj, ldc));

    let ni_main = BLOCK * (ni / BLOCK);
    let a_ptr = a.as_ptr() as usize;
    let b_ptr = b.as_ptr() as usize;
    let c_ptr = c.as_mut_ptr() as usize;

    pool.install(|| {
        // Main grid: full BLOCK x BLOCK tiles, one thread per block-row.
        (0..ni_main).into_par_iter().step_by(BLOCK).for_each(|ii| {
            let a_ptr = a_ptr as *const f64;
            let b_ptr = b_ptr as *const f64;
            let c_ptr = c_ptr as *mut f64;
            unsafe {
                gemm_block_row(
                    ii, BLOCK, ni, nj, nk, alpha, a_ptr, lda, b_ptr, ldb, beta, c_ptr, ldc,
                );
            }
        });

        // Bottom edge strip: rows [ni_main, ni), distributed over
        // block-columns (matches the source's separate `#pragma omp
        // for` over `j` for the bottom strip).
        if ni_main < ni {
            let nj_main = BLOCK * (nj / BLOCK);
            let row_count = ni - ni_main;
            (0..nj_main).into_par_iter().step_by(BLOCK).for_each(|jj| {
                let a_ptr = a_ptr as *const f64;
                let b_ptr = b_ptr as *const f64;
                let c_ptr = c_ptr as *mut f64;
                unsafe {
                    gemm_edge_tile(
                        ni_main, row_count, jj, BLOCK, nk, alpha, a_ptr, lda, b_ptr, ldb, beta,
                        c_ptr, ldc,
                    );
                }
            });

            // Bottom-right corner: single thread.
            if nj_main < nj {
                unsafe {
                    gemm_edge_tile(
                        ni_main,
                        row_count,
                        nj_main,
                        nj - nj_main,
                        nk,
                        alpha,
                        a_ptr as *const f64,
                        lda,
                        b_ptr as *const f64,
                        ldb,
                        beta,
                        c_ptr as *mut f64,
                        ldc,
                    );
                }
            }
        }
    });
}

/// Processes one `rows`×`nj` block-row starting at local row `ii` of a
/// `ni`-row matrix: the right-edge strip within this row range plus
/// all full `BLOCK`×`BLOCK` tiles against successive `BLOCK`-wide
/// strips of `nk` (via [`kernel::micro_mm`]) and the `nk` remainder
/// (via [`kernel::mini_mm`]).
///
/// # Safety
/// `a`, `b`, `c` must describe non-aliasing, in-bounds row-major
/// buffers consistent with `ni`, `nj`, `nk`, `lda`, `ldb`, `ldc`.
#[allow(clippy::too_many_arguments)]
unsafe fn gemm_block_row(
    ii: usize,
    rows: usize,
    ni: usize,
    nj: usize,
    nk: usize,
    alpha: f64,
    a: *const f64,
    lda: usize,
    b: *const f64,
    ldb: usize,
    beta: f64,
    c: *mut f64,
    ldc: usize,
) {
    let nj_main = BLOCK * (nj / BLOCK);
    let a_row = a.add(ii * lda);
    let c_row = c.add(ii * ldc);

    for jj in (0..nj_main).step_by(BLOCK) {
        let c_tile = c_row.add(jj);
        let c_tile_slice = std::slice::from_raw_parts_mut(c_tile, (rows - 1) * ldc + BLOCK);
        scale_tile(rows, BLOCK, beta, c_tile_slice, ldc);

        let mut k = 0;
        while k + BLOCK <= nk {
            micro_tile_block(
                rows,
                BLOCK,
                BLOCK,
                alpha,
                a_row.add(k),
                lda,
                b.add(k * ldb + jj),
                ldb,
                c_tile,
                ldc,
            );
            k += BLOCK;
        }
        if k < nk {
            mini_mm(
                rows,
                BLOCK,
                nk - k,
                alpha,
                a_row.add(k),
                lda,
                b.add(k * ldb + jj),
                ldb,
                c_tile,
                ldc,
            );
        }
    }

    if nj_main < nj {
        gemm_edge_tile(
            ii,
            rows,
            nj_main,
            nj - nj_main,
            nk,
            alpha,
            a,
            lda,
            b,
            ldb,
            beta,
            c,
            ldc,
        );
    }
    let _ = ni;
}

/// Scalar-fallback tile used for the right-edge strip, bottom-edge
/// strip, and bottom-right corner: a `rows`×`cols` region starting at
/// `(row_off, col_off)`, scaled by `beta` then accumulated via
/// `mini_mm` in `BLOCK`-wide strips of `nk`.
///
/// # Safety
/// Same preconditions as [`gemm_block_row`].
#[allow(clippy::too_many_arguments)]
unsafe fn gemm_edge_tile(
    row_off: usize,
    rows: usize,
    col_off: usize,
    cols: usize,
    nk: usize,
    alpha: f64,
    a: *const f64,
    lda: usize,
    b: *const f64,
    ldb: usize,
    beta: f64,
    c: *mut f64,
    ldc: usize,
) {
    let c_tile = c.add(row_off * ldc + col_off);
    let c_tile_slice = std::slice::from_raw_parts_mut(c_tile, (rows.max(1) - 1) * ldc + cols);
    scale_tile(rows, cols, beta, c_tile_slice, ldc);

    let a_row = a.add(row_off * lda);
    let mut k = 0;
    while k + BLOCK <= nk {
        mini_mm(
            rows,
            cols,
            BLOCK,
            alpha,
            a_row.add(k),
            lda,
            b.add(k * ldb + col_off),
            ldb,
            c_tile,
            ldc,
        );
        k += BLOCK;
    }
    if k < nk {
        mini_mm(
            rows,
            cols,
            nk - k,
            alpha,
            a_row.add(k),
            lda,
            b.add(k * ldb + col_off),
            ldb,
            c_tile,
            ldc,
        );
    }
}

/// Walks the register-tile grid (`RI` rows × `4*RJ` columns) inside a
/// full `BLOCK`×`BLOCK` C tile, calling [`kernel::micro_mm`] for each.
///
/// # Safety
/// `a`, `b`, `c` must be valid for a `rows`×`nk`, `nk`×`cols`,
/// `rows`×`cols` access pattern respectively, with `rows`/`cols`
/// multiples of `RI`/`4*RJ`.
#[allow(clippy::too_many_arguments)]
unsafe fn micro_tile_block(
    rows: usize,
    cols: usize,
    nk: usize,
    alpha: f64,
    a: *const f64,
    lda: usize,
    b: *const f64,
    ldb: usize,
    c: *mut f64,
    ldc: usize,
) {
    let micro_cols = RJ * LANE;
    let mut i = 0;
    while i + RI <= rows {
        let mut j = 0;
        while j + micro_cols <= cols {
            micro_mm(
                nk,
                alpha,
                a.add(i * lda),
                lda,
                b.add(j),
                ldb,
                c.add(i * ldc + j),
                ldc,
            );
            j += micro_cols;
        }
        i += RI;
    }
}

/// Allocates leading-dimension-padded copies of `a`, `b`, `c`, runs
/// [`gemm_parallel`] against them, then copies the result back into
/// `c`. Opt-in equivalent of the source's `padded_mm` / `PAD_MATRICES`
/// compile-time flag, now a runtime choice (see
/// [`gemm`](crate::gemm) module docs and `SPEC_FULL.md` EXPANSION 4).
#[allow(clippy::too_many_arguments)]
pub fn gemm_padded(
    pool: &rayon::ThreadPool,
    ni: usize,
    nj: usize,
    nk: usize,
    alpha: f64,
    a: &[f64],
    lda: usize,
    b: &[f64],
    ldb: usize,
    beta: f64,
    c: &mut [f64],
    ldc: usize,
) -> Result<()> {
    if ni == 0 || nj == 0 || nk == 0 {
        return Ok(());
    }

    let padded_lda = pad_ld(nk);
    let padded_ldb = pad_ld(nj);
    let padded_ldc = pad_ld(nj);

    let mut padded_a = try_alloc(ni, padded_lda)?;
    let mut padded_b = try_alloc(nk, padded_ldb)?;
    let mut padded_c = try_alloc(ni, padded_ldc)?;

    copy_into_padded(a, lda, nk, &mut padded_a, padded_lda, ni);
    copy_into_padded(b, ldb, nj, &mut padded_b, padded_ldb, nk);
    copy_into_padded(c, ldc, nj, &mut padded_c, padded_ldc, ni);

    gemm_parallel(
        pool,
        ni,
        nj,
        nk,
        alpha,
        &padded_a,
        padded_lda,
        &padded_b,
        padded_ldb,
        beta,
        &mut padded_c,
        padded_ldc,
    );

    for i in 0..ni {
        c[i * ldc..i * ldc + nj].copy_from_slice(&padded_c[i * padded_ldc..i * padded_ldc + nj]);
    }
    Ok(())
}

fn pad_ld(cols: usize) -> usize {
    LDA_MULTIPLE * (cols / LDA_MULTIPLE + 1)
}

fn try_alloc(rows: usize, ld: usize) -> Result<Vec<f64>> {
    let len = rows
        .checked_mul(ld)
        .ok_or(LuError::OutOfMemory(usize::MAX))?;
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| LuError::OutOfMemory(len))?;
    v.resize(len, 0.0);
    Ok(v)
}

fn copy_into_padded(src: &[f64], src_ld: usize, cols: usize, dst: &mut [f64], dst_ld: usize, rows: usize) {
    for i in 0..rows {
        dst[i * dst_ld..i * dst_ld + cols].copy_from_slice(&src[i * src_ld..i * src_ld + cols]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_gemm(
        ni: usize,
        nj: usize,
        nk: usize,
        alpha: f64,
        a: &[f64],
        lda: usize,
        b: &[f64],
        ldb: usize,
        beta: f64,
        c: &mut [f64],
        ldc: usize,
    ) {
        for i in 0..ni {
            for j in 0..nj {
                let mut sum = 0.0;
                for k in 0..nk {
                    sum += a[i * lda + k] * b[k * ldb + j];
                }
                let idx = i * ldc + j;
                c[idx] = beta * c[idx] + alpha * sum;
            }
        }
    }

    #[test]
    fn matches_reference_on_odd_sizes() {
        let (ni, nj, nk) = (100usize, 100usize, 100usize);
        let a: Vec<f64> = (0..ni * nk).map(|i| ((i % 17) as f64) * 0.1).collect();
        let b: Vec<f64> = (0..nk * nj).map(|i| ((i % 13) as f64) * 0.2).collect();
        let mut c: Vec<f64> = (0..ni * nj).map(|i| ((i % 5) as f64) - 2.0).collect();
        let mut expected = c.clone();

        gemm(ni, nj, nk, 1.0, &a, nk, &b, nj, 1.0, &mut c, nj);
        reference_gemm(ni, nj, nk, 1.0, &a, nk, &b, nj, 1.0, &mut expected, nj);

        for i in 0..ni * nj {
            assert!((c[i] - expected[i]).abs() < 1e-9, "index {i}");
        }
    }

    #[test]
    fn alpha_zero_beta_one_is_identity() {
        let (ni, nj, nk) = (10usize, 10usize, 10usize);
        let a = vec![1.0; ni * nk];
        let b = vec![1.0; nk * nj];
        let mut c: Vec<f64> = (0..ni * nj).map(|i| i as f64).collect();
        let expected = c.clone();
        gemm(ni, nj, nk, 0.0, &a, nk, &b, nj, 1.0, &mut c, nj);
        assert_eq!(c, expected);
    }

    #[test]
    fn alpha_one_beta_zero_ignores_stale_c() {
        let (ni, nj, nk) = (6usize, 6usize, 6usize);
        let a: Vec<f64> = (0..ni * nk).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..nk * nj).map(|i| (i as f64) * 0.5).collect();
        let mut c = vec![f64::NAN; ni * nj];
        gemm(ni, nj, nk, 1.0, &a, nk, &b, nj, 0.0, &mut c, nj);
        for v in &c {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn respects_leading_dimension_padding() {
        let (ni, nj, nk) = (16usize, 16usize, 16usize);
        let lda = nk + 5;
        let ldb = nj + 3;
        let ldc = nj + 7;
        let a: Vec<f64> = (0..ni * lda).map(|i| ((i % 9) as f64) * 0.3).collect();
        let b: Vec<f64> = (0..nk * ldb).map(|i| ((i % 7) as f64) * 0.4).collect();
        let mut c1: Vec<f64> = vec![0.0; ni * ldc];
        let mut c2 = c1.clone();

        gemm(ni, nj, nk, 1.0, &a, lda, &b, ldb, 1.0, &mut c1, ldc);

        // Corrupt the padding bytes beyond column nj; result on the
        // logical region must be unaffected.
        for i in 0..ni {
            for j in nj..ldc {
                c2[i * ldc + j] = f64::from_bits(0xdead_beef);
            }
        }
        gemm(ni, nj, nk, 1.0, &a, lda, &b, ldb, 1.0, &mut c2, ldc);

        for i in 0..ni {
            for j in 0..nj {
                let idx = i * ldc + j;
                assert!((c1[idx] - c2[idx]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn parallel_matches_serial() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .unwrap();
        let (ni, nj, nk) = (97usize, 63usize, 71usize);
        let a: Vec<f64> = (0..ni * nk).map(|i| ((i % 19) as f64) * 0.1).collect();
        let b: Vec<f64> = (0..nk * nj).map(|i| ((i % 23) as f64) * 0.2).collect();
        let mut c_serial: Vec<f64> = (0..ni * nj).map(|i| (i % 3) as f64).collect();
        let mut c_par = c_serial.clone();

        gemm(ni, nj, nk, 1.3, &a, nk, &b, nj, 0.7, &mut c_serial, nj);
        gemm_parallel(&pool, ni, nj, nk, 1.3, &a, nk, &b, nj, 0.7, &mut c_par, nj);

        for i in 0..ni * nj {
            assert!((c_serial[i] - c_par[i]).abs() < 1e-9, "index {i}");
        }
    }

    #[test]
    fn padded_matches_unpadded() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let (ni, nj, nk) = (64usize, 64usize, 64usize);
        let a: Vec<f64> = (0..ni * nk).map(|i| ((i % 29) as f64) * 0.11).collect();
        let b: Vec<f64> = (0..nk * nj).map(|i| ((i % 31) as f64) * 0.13).collect();
        let mut c_unpadded: Vec<f64> = (0..ni * nj).map(|i| (i % 4) as f64).collect();
        let mut c_padded = c_unpadded.clone();

        gemm_parallel(&pool, ni, nj, nk, 1.0, &a, nk, &b, nj, 1.0, &mut c_unpadded, nj);
        gemm_padded(&pool, ni, nj, nk, 1.0, &a, nk, &b, nj, 1.0, &mut c_padded, nj).unwrap();

        for i in 0..ni * nj {
            assert!((c_unpadded[i] - c_padded[i]).abs() < 1e-12, "index {i}");
        }
    }

    #[test]
    fn zero_sized_dimension_is_noop() {
        let mut c = vec![1.0, 2.0, 3.0];
        let expected = c.clone();
        gemm(0, 3, 5, 1.0, &[], 5, &[], 3, 1.0, &mut c, 3);
        assert_eq!(c, expected);
    }
}
