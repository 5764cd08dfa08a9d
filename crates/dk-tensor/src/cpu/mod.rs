pub mod matmul;
pub mod unary;

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Straightforward loops; matrix products are split by output row over a
/// rayon pool of `n_threads` workers owned by the backend. Everything else
/// runs on the calling thread. Clones share the pool.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    n_threads: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl CpuBackend {
    /// Single-threaded backend. Spawns no workers.
    pub fn new() -> Self {
        CpuBackend {
            n_threads: 1,
            pool: None,
        }
    }

    /// Backend whose matrix products run on a pool of `n_threads` workers
    /// (min 1). The pool lives as long as the backend.
    pub fn with_threads(n_threads: usize) -> Result<Self> {
        let n_threads = n_threads.max(1);
        if n_threads == 1 {
            return Ok(Self::new());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("dk-cpu-{i}"))
            .build()
            .map_err(|e| TensorError::ThreadPool(e.to_string()))?;
        Ok(CpuBackend {
            n_threads,
            pool: Some(Arc::new(pool)),
        })
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_same_len(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(TensorError::LengthMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn n_threads(&self) -> usize {
        self.n_threads
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        if a.len() != m * k || b.len() != k * n {
            return Err(TensorError::MatmulMismatch {
                m,
                k,
                n,
                a_len: a.len(),
                b_len: b.len(),
            });
        }
        Ok(matmul::matmul_rows(a, b, m, k, n, self.pool.as_deref()))
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        check_same_len(a, b)?;
        Ok(a.iter().zip(b).map(|(x, y)| x + y).collect())
    }

    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        check_same_len(a, b)?;
        Ok(a.iter().zip(b).map(|(x, y)| x * y).collect())
    }

    fn rms_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        if weight.len() != hidden_size {
            return Err(TensorError::LengthMismatch {
                expected: hidden_size,
                got: weight.len(),
            });
        }
        if hidden_size == 0 || x.len() % hidden_size != 0 {
            return Err(TensorError::Other(format!(
                "rms_norm: x.len()={} is not a multiple of hidden_size={}",
                x.len(),
                hidden_size
            )));
        }

        let mut result = Vec::with_capacity(x.len());
        for row in x.chunks_exact(hidden_size) {
            let mean_sq = row.iter().map(|v| v * v).sum::<f32>() / hidden_size as f32;
            let inv_rms = 1.0 / (mean_sq + eps).sqrt();
            result.extend(row.iter().zip(weight).map(|(v, w)| v * w * inv_rms));
        }
        Ok(result)
    }

    fn softmax(&self, x: &[f32], width: usize) -> Result<Vec<f32>> {
        if width == 0 || x.len() % width != 0 {
            return Err(TensorError::Other(format!(
                "softmax: x.len()={} is not a multiple of width={}",
                x.len(),
                width
            )));
        }
        let mut result = x.to_vec();
        for row in result.chunks_exact_mut(width) {
            unary::softmax_in_place(row);
        }
        Ok(result)
    }

    fn rope(
        &self,
        q: &[f32],
        k: &[f32],
        head_dim: usize,
        pos: usize,
        n_heads_q: usize,
        n_heads_k: usize,
        freq_base: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        if q.len() != n_heads_q * head_dim {
            return Err(TensorError::LengthMismatch {
                expected: n_heads_q * head_dim,
                got: q.len(),
            });
        }
        if k.len() != n_heads_k * head_dim {
            return Err(TensorError::LengthMismatch {
                expected: n_heads_k * head_dim,
                got: k.len(),
            });
        }

        let mut q_out = q.to_vec();
        let mut k_out = k.to_vec();
        unary::rope_in_place(&mut q_out, head_dim, pos, freq_base);
        unary::rope_in_place(&mut k_out, head_dim, pos, freq_base);
        Ok((q_out, k_out))
    }

    fn silu(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(x.iter().map(|&v| unary::silu(v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_matmul_basic() {
        let b = backend();
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let c = b
            .matmul(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0], 2, 2, 2)
            .unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matvec() {
        let b = CpuBackend::with_threads(3).unwrap();
        // [out=3, in=2] @ [2]
        let w = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let c = b.matmul(&w, &[2.0, 5.0], 3, 2, 1).unwrap();
        assert_eq!(c, vec![2.0, 5.0, 7.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let b = backend();
        let err = b.matmul(&[1.0, 2.0, 3.0], &[1.0, 2.0], 2, 2, 1).unwrap_err();
        assert!(matches!(err, TensorError::MatmulMismatch { a_len: 3, .. }));
    }

    #[test]
    fn test_zero_threads_clamped() {
        assert_eq!(CpuBackend::with_threads(0).unwrap().n_threads(), 1);
    }

    #[test]
    fn test_clones_share_one_pool() {
        let b = CpuBackend::with_threads(2).unwrap();
        let c = b.clone();
        assert_eq!(c.n_threads(), 2);
        assert!(Arc::ptr_eq(b.pool.as_ref().unwrap(), c.pool.as_ref().unwrap()));
        assert_eq!(b.pool.as_ref().unwrap().current_num_threads(), 2);
    }

    #[test]
    fn test_add_mul() {
        let b = backend();
        assert_eq!(b.add(&[1.0, 2.0], &[3.0, 4.0]).unwrap(), vec![4.0, 6.0]);
        assert_eq!(b.mul(&[2.0, 3.0], &[4.0, 5.0]).unwrap(), vec![8.0, 15.0]);
        assert!(b.add(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_silu() {
        let r = backend().silu(&[0.0, 1.0]).unwrap();
        assert_relative_eq!(r[0], 0.0);
        assert_relative_eq!(r[1], 0.7310586, epsilon = 1e-5);
    }

    #[test]
    fn test_softmax_rows() {
        let r = backend().softmax(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.0], 3).unwrap();
        assert_relative_eq!(r[..3].iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(r[0] < r[1] && r[1] < r[2]);
        assert_relative_eq!(r[4], 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rms_norm() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let r = backend().rms_norm(&x, &[1.0; 4], 1e-5, 4).unwrap();
        let rms = (7.5f32 + 1e-5).sqrt();
        assert_relative_eq!(r[0], 1.0 / rms, epsilon = 1e-5);
        assert_relative_eq!(r[3], 4.0 / rms, epsilon = 1e-5);
    }

    #[test]
    fn test_rope_zero_pos_is_identity() {
        let q = vec![1.0, 2.0, 3.0, 4.0];
        let (q_out, k_out) = backend().rope(&q, &q, 4, 0, 1, 1, 10000.0).unwrap();
        assert_eq!(q_out, q);
        assert_eq!(k_out, q);
    }

    #[test]
    fn test_rope_preserves_pair_norm() {
        let q = vec![3.0, 4.0];
        let (q_out, _) = backend().rope(&q, &q, 2, 7, 1, 1, 10000.0).unwrap();
        let norm = (q_out[0] * q_out[0] + q_out[1] * q_out[1]).sqrt();
        assert_relative_eq!(norm, 5.0, epsilon = 1e-5);
    }
}
