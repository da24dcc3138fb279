//! Benchmark harness: initializes an N×N matrix and a right-hand side
//! `b`, runs the distributed LU factorization, solves `Ax = b` against
//! the gathered result on rank 0, and dumps the solution vector.
//!
//! This binary is the (excluded-from-core) PolyBench harness described
//! in `spec.md` §1/§6, reworked per `SPEC_FULL.md` EXPANSION 4/5: a
//! `clap` CLI stands in for the `NN` compile-time macro, and the
//! `LAPACKE_dgetrs` triangular solve of `examples/original_source/
//! linear-algebra/solvers/ludcmp/ludcmp-mkl.c` becomes a small
//! harness-local forward/back substitution, since triangular solve is
//! explicitly out of scope for the `lu` core module.

use std::io::Write as _;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use mpi::traits::*;

use distlu::grid::ProcessGrid;
use distlu::lu;

/// Distributed block-cyclic LU factorization benchmark.
#[derive(Parser, Debug)]
#[command(name = "lu_bench", version, about)]
struct Args {
    /// Problem size N (replaces the PolyBench `NN` macro).
    #[arg(short = 'n', long, default_value_t = 512)]
    size: usize,

    /// Block size B. Auto-decremented at startup until it evenly
    /// divides `grid_side * N`, mirroring the original's
    /// `while (n % (psizes[0] * block_size) != 0) block_size--;` loop.
    #[arg(short = 'b', long = "block-size", default_value_t = 40)]
    block_size: usize,

    /// Rayon thread-pool size. Defaults to the ambient
    /// `RAYON_NUM_THREADS` / available parallelism.
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Enable the leading-dimension-padded GEMM path.
    #[arg(long)]
    pad: bool,

    /// Where to dump the solution vector x. Defaults to stderr.
    #[arg(long = "dump-x")]
    dump_x: Option<std::path::PathBuf>,
}

/// Mirrors `ludcmp-mkl.c`'s `init_array`: `b[i] = (i+1)/n/2.0 + 4`,
/// `A[i][j] = -(j % n)/n + 1` for `j <= i`, zero above the diagonal,
/// unit diagonal — lower triangular, diagonally dominant-ish, and
/// factorable without pivoting by construction. Identical on every
/// rank since each rank computes it from `n` alone (no broadcast
/// needed), matching `lu::factor`'s "identical on every rank at
/// entry" precondition.
fn init_array(n: usize) -> (Vec<f64>, Vec<f64>) {
    let fn_ = n as f64;
    let mut a = vec![0.0; n * n];
    let mut b = vec![0.0; n];
    for i in 0..n {
        b[i] = (i + 1) as f64 / fn_ / 2.0 + 4.0;
        for j in 0..=i {
            a[i * n + j] = -((j % n) as f64) / fn_ + 1.0;
        }
        a[i * n + i] = 1.0;
    }
    (a, b)
}

/// Solves `Ax = b` against the unpivoted LU factors packed into `a`
/// (L unit lower triangular in the strict lower part, U upper
/// triangular including the diagonal): forward substitution against L
/// followed by back substitution against U. Stands in for
/// `LAPACKE_dgetrs`, kept at the harness level per `SPEC_FULL.md`
/// EXPANSION 5.
fn solve(a: &[f64], n: usize, b: &[f64]) -> Vec<f64> {
    let mut y = b.to_vec();
    for i in 0..n {
        let mut sum = y[i];
        for k in 0..i {
            sum -= a[i * n + k] * y[k];
        }
        y[i] = sum;
    }
    let mut x = y;
    for i in (0..n).rev() {
        let mut sum = x[i];
        for k in (i + 1)..n {
            sum -= a[i * n + k] * x[k];
        }
        x[i] = sum / a[i * n + i];
    }
    x
}

/// Dumps `x` in the `begin dump: x` / `end dump: x` format of
/// `POLYBENCH_DUMP_START`/`POLYBENCH_DUMP_BEGIN`/`POLYBENCH_DUMP_END`,
/// twenty `%0.2lf `-equivalent values per line.
fn dump_x(x: &[f64], mut out: impl std::io::Write) -> std::io::Result<()> {
    writeln!(out, "begin dump: x")?;
    for (i, v) in x.iter().enumerate() {
        if i % 20 == 0 {
            writeln!(out)?;
        }
        write!(out, "{v:.2} ")?;
    }
    writeln!(out)?;
    writeln!(out, "end dump: x")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let universe = mpi::initialize().context("failed to initialize MPI")?;
    let world = universe.world();

    let args = Args::parse();
    let grid = ProcessGrid::new(world).context("failed to build process grid")?;

    let mut block_size = args.block_size.min(args.size).max(1);
    while args.size % (grid.rows() * block_size) != 0 && block_size > 1 {
        block_size -= 1;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads.unwrap_or(0))
        .build()
        .context("failed to build rayon thread pool")?;

    let (mut a, b) = init_array(args.size);

    if grid.rank() == 0 {
        info!(
            "lu_bench: n={} grid={}x{} block={} pad={}",
            args.size,
            grid.rows(),
            grid.cols(),
            block_size,
            args.pad
        );
    }

    let start = Instant::now();
    lu::factor(&grid, args.size, block_size, &pool, args.pad, &mut a)
        .context("LU factorization failed")?;
    let elapsed = start.elapsed();

    if grid.rank() == 0 {
        println!("lu_bench: n={} elapsed={:?}", args.size, elapsed);

        let x = solve(&a, args.size, &b);
        match &args.dump_x {
            Some(path) => {
                let file =
                    std::fs::File::create(path).with_context(|| format!("creating {path:?}"))?;
                dump_x(&x, file)?;
            }
            None => {
                let stderr = std::io::stderr();
                dump_x(&x, stderr.lock())?;
            }
        }
    }

    Ok(())
}
