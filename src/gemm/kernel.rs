//! The fused-tile micro-kernel and its scalar fallback.
//!
//! This is the performance-critical inner loop described in `spec.md`
//! §4.1: an `RI`×`RJ` array of 4-wide SIMD accumulators held in
//! registers, streamed over `nk` iterations, scaled by `alpha` and
//! folded into `C` at exit. The register-tile shape (`RI`=3 rows,
//! `RJ`=4 lanes of 4 lanes each, 12 accumulators total) is the shape
//! `examples/ArunTamil21-matmul-simd/src/kernels/kernel_12x4.rs` tunes
//! for AVX2 machines with 16 wide-vector registers; we keep that shape
//! here (transposed: that kernel packs 12 rows × 1 lane, this one
//! packs 3 rows × 4 lanes, both are 12 accumulators) because it
//! matches `GEMM_BLOCK_SIZE % RI == 0` and `GEMM_BLOCK_SIZE % (4*RJ)
//! == 0` for `GEMM_BLOCK_SIZE = 48`.

use super::{LANE, RI, RJ};

/// Number of columns a single micro-kernel call covers (`RJ` lanes of
/// `LANE` f64 each).
pub const MICRO_COLS: usize = RJ * LANE;

/// `true` if the AVX2+FMA micro-kernel can be used on this machine.
#[cfg(target_arch = "x86_64")]
pub fn has_avx2_fma() -> bool {
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

#[cfg(not(target_arch = "x86_64"))]
pub fn has_avx2_fma() -> bool {
    false
}

/// Computes the `RI`×`MICRO_COLS` tile `C += alpha * A * B` over `nk`
/// steps of the reduction dimension, picking the AVX2 kernel when the
/// host CPU supports it and falling back to scalar code otherwise.
///
/// # Safety
/// Caller must ensure:
/// - `a` has at least `(RI-1)*lda + nk` valid elements from the given
///   pointer.
/// - `b` has at least `(nk-1)*ldb + MICRO_COLS` valid elements.
/// - `c` has at least `(RI-1)*ldc + MICRO_COLS` valid, writable
///   elements, and does not alias `a` or `b`.
#[inline]
pub unsafe fn micro_mm(
    nk: usize,
    alpha: f64,
    a: *const f64,
    lda: usize,
    b: *const f64,
    ldb: usize,
    c: *mut f64,
    ldc: usize,
) {
    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2_fma() {
            avx2::micro_mm_avx2(nk, alpha, a, lda, b, ldb, c, ldc);
            return;
        }
    }
    micro_mm_scalar(nk, alpha, a, lda, b, ldb, c, ldc);
}

/// Scalar reference implementation of the micro-kernel. Used on
/// non-x86 targets and as the ground truth in tests.
///
/// # Safety
/// Same preconditions as [`micro_mm`].
#[inline]
pub unsafe fn micro_mm_scalar(
    nk: usize,
    alpha: f64,
    a: *const f64,
    lda: usize,
    b: *const f64,
    ldb: usize,
    c: *mut f64,
    ldc: usize,
) {
    let mut sums = [[0.0f64; MICRO_COLS]; RI];
    for k in 0..nk {
        for i in 0..RI {
            let aik = *a.add(i * lda + k);
            for j in 0..MICRO_COLS {
                sums[i][j] += aik * *b.add(k * ldb + j);
            }
        }
    }
    for i in 0..RI {
        for j in 0..MICRO_COLS {
            let cij = c.add(i * ldc + j);
            *cij += alpha * sums[i][j];
        }
    }
}

/// Scalar fallback for edge tiles that don't fill a full micro-kernel
/// shape: right-edge strip, bottom-edge strip, and the bottom-right
/// corner, all handled by this single triple loop (`mini_mm` in the
/// source notation).
///
/// # Safety
/// `a`, `b`, `c` must describe non-aliasing, in-bounds `ni`×`nk`,
/// `nk`×`nj`, `ni`×`nj` row-major regions respectively.
pub unsafe fn mini_mm(
    ni: usize,
    nj: usize,
    nk: usize,
    alpha: f64,
    a: *const f64,
    lda: usize,
    b: *const f64,
    ldb: usize,
    c: *mut f64,
    ldc: usize,
) {
    for i in 0..ni {
        for j in 0..nj {
            let mut sum = 0.0f64;
            for k in 0..nk {
                sum += *a.add(i * lda + k) * *b.add(k * ldb + j);
            }
            let cij = c.add(i * ldc + j);
            *cij += alpha * sum;
        }
    }
}

/// Scales a `ni`×`nj` tile of `C` in place by `beta` (`block_mul` in
/// the source notation). `beta == 0.0` zeroes the tile without reading
/// stale/uninitialized contents, matching IEEE semantics used by the
/// reference (`0.0 * NaN` is still NaN, which is intentional: we do
/// not special-case `beta == 0` to dodge NaNs already present in `C`).
pub fn scale_tile(ni: usize, nj: usize, beta: f64, c: &mut [f64], ldc: usize) {
    for i in 0..ni {
        let row = &mut c[i * ldc..i * ldc + nj];
        for v in row.iter_mut() {
            *v *= beta;
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::*;

    use super::{MICRO_COLS, RI, RJ};

    /// AVX2+FMA realization of [`super::micro_mm`]. Holds a 3×4 grid
    /// of `__m256d` accumulators (12 registers) in place of the
    /// scalar `sums` array.
    ///
    /// # Safety
    /// Same preconditions as [`super::micro_mm`]; in addition the CPU
    /// must support `avx2` and `fma` (checked by the caller via
    /// [`super::has_avx2_fma`]).
    #[target_feature(enable = "avx2,fma")]
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn micro_mm_avx2(
        nk: usize,
        alpha: f64,
        a: *const f64,
        lda: usize,
        b: *const f64,
        ldb: usize,
        c: *mut f64,
        ldc: usize,
    ) {
        let valpha = _mm256_set1_pd(alpha);
        let mut sums = [[_mm256_setzero_pd(); RJ]; RI];

        for k in 0..nk {
            let mut bv = [_mm256_setzero_pd(); RJ];
            for j in 0..RJ {
                bv[j] = _mm256_loadu_pd(b.add(k * ldb + j * 4));
            }
            for i in 0..RI {
                let av = _mm256_broadcast_sd(&*a.add(i * lda + k));
                for j in 0..RJ {
                    sums[i][j] = _mm256_fmadd_pd(av, bv[j], sums[i][j]);
                }
            }
        }

        for i in 0..RI {
            for j in 0..RJ {
                let dst = c.add(i * ldc + j * 4);
                let cv = _mm256_loadu_pd(dst);
                let cv = _mm256_fmadd_pd(valpha, sums[i][j], cv);
                _mm256_storeu_pd(dst, cv);
            }
        }
        debug_assert_eq!(MICRO_COLS, RJ * 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(nk: usize, alpha: f64, a: &[f64], lda: usize, b: &[f64], ldb: usize) -> Vec<f64> {
        let mut out = vec![0.0; RI * MICRO_COLS];
        for i in 0..RI {
            for j in 0..MICRO_COLS {
                let mut sum = 0.0;
                for k in 0..nk {
                    sum += a[i * lda + k] * b[k * ldb + j];
                }
                out[i * MICRO_COLS + j] = alpha * sum;
            }
        }
        out
    }

    #[test]
    fn scalar_micro_kernel_matches_triple_loop() {
        let nk = 17;
        let lda = nk;
        let ldb = MICRO_COLS;
        let ldc = MICRO_COLS;
        let a: Vec<f64> = (0..RI * lda).map(|i| (i % 7) as f64 * 0.5).collect();
        let b: Vec<f64> = (0..nk * ldb).map(|i| (i % 5) as f64 * 0.25).collect();
        let mut c = vec![0.0; RI * ldc];
        let alpha = 1.5;

        unsafe {
            micro_mm_scalar(
                nk, alpha, a.as_ptr(), lda, b.as_ptr(), ldb, c.as_mut_ptr(), ldc,
            );
        }

        let expected = reference(nk, alpha, &a, lda, &b, ldb);
        for i in 0..RI {
            for j in 0..MICRO_COLS {
                assert!((c[i * ldc + j] - expected[i * MICRO_COLS + j]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn avx2_micro_kernel_matches_scalar_when_available() {
        if !has_avx2_fma() {
            return;
        }
        let nk = 32;
        let lda = nk;
        let ldb = MICRO_COLS;
        let ldc = MICRO_COLS;
        let a: Vec<f64> = (0..RI * lda).map(|i| (i % 11) as f64 * 0.3).collect();
        let b: Vec<f64> = (0..nk * ldb).map(|i| (i % 13) as f64 * 0.7).collect();
        let mut c_scalar = vec![0.0; RI * ldc];
        let mut c_avx2 = vec![0.0; RI * ldc];
        let alpha = -2.25;

        unsafe {
            micro_mm_scalar(
                nk,
                alpha,
                a.as_ptr(),
                lda,
                b.as_ptr(),
                ldb,
                c_scalar.as_mut_ptr(),
                ldc,
            );
            micro_mm(
                nk,
                alpha,
                a.as_ptr(),
                lda,
                b.as_ptr(),
                ldb,
                c_avx2.as_mut_ptr(),
                ldc,
            );
        }

        for i in 0..c_scalar.len() {
            assert!((c_scalar[i] - c_avx2[i]).abs() < 1e-9, "index {i}");
        }
    }

    #[test]
    fn mini_mm_handles_non_multiple_sizes() {
        let (ni, nj, nk) = (2usize, 3usize, 5usize);
        let a: Vec<f64> = (0..ni * nk).map(|i| i as f64 + 1.0).collect();
        let b: Vec<f64> = (0..nk * nj).map(|i| (i as f64) * 0.5).collect();
        let mut c = vec![0.0; ni * nj];
        unsafe {
            mini_mm(
                ni,
                nj,
                nk,
                2.0,
                a.as_ptr(),
                nk,
                b.as_ptr(),
                nj,
                c.as_mut_ptr(),
                nj,
            );
        }
        for i in 0..ni {
            for j in 0..nj {
                let mut sum = 0.0;
                for k in 0..nk {
                    sum += a[i * nk + k] * b[k * nj + j];
                }
                assert!((c[i * nj + j] - 2.0 * sum).abs() < 1e-9);
            }
        }
    }
}
