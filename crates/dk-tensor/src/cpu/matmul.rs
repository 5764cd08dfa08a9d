//! Row-partitioned matrix product.
//!
//! The output rows of `C = A @ B` are independent, so they are cut into
//! tiles of whole rows and the tiles are spread over the backend's pool.

use rayon::prelude::*;
use rayon::ThreadPool;

/// Below this many multiply-adds a product runs on the calling thread.
const PARALLEL_THRESHOLD: usize = 1 << 16;

/// Output rows per parallel task.
const ROW_TILE: usize = 64;

pub(crate) fn matmul_rows(
    a: &[f32],
    b: &[f32],
    m: usize,
    k: usize,
    n: usize,
    pool: Option<&ThreadPool>,
) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    if m == 0 || n == 0 {
        return c;
    }

    match pool {
        Some(pool) if m * k * n >= PARALLEL_THRESHOLD => pool.install(|| {
            c.par_chunks_mut(ROW_TILE * n)
                .enumerate()
                .for_each(|(tile, chunk)| compute_rows(a, b, chunk, tile * ROW_TILE, k, n));
        }),
        _ => compute_rows(a, b, &mut c, 0, k, n),
    }
    c
}

/// Fill `out` (a run of whole output rows starting at `first_row`).
fn compute_rows(a: &[f32], b: &[f32], out: &mut [f32], first_row: usize, k: usize, n: usize) {
    for (r, out_row) in out.chunks_mut(n).enumerate() {
        let a_row = &a[(first_row + r) * k..(first_row + r + 1) * k];
        if n == 1 {
            // matrix-vector: the hot path of single-token decoding
            out_row[0] = a_row.iter().zip(b).map(|(x, y)| x * y).sum();
            continue;
        }
        for (p, &a_val) in a_row.iter().enumerate() {
            let b_row = &b[p * n..(p + 1) * n];
            for (o, &b_val) in out_row.iter_mut().zip(b_row) {
                *o += a_val * b_val;
            }
        }
    }
}
