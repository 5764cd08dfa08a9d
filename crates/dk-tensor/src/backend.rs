use std::fmt::Debug;

use crate::error::Result;

/// Kernels a transformer forward pass needs from a compute device.
///
/// Data is passed in as f32 slices and returned as owned vectors. A backend
/// is immutable once built and may be shared across threads; any internal
/// parallelism is bounded by `n_threads()`.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Short backend name ("cpu", ...).
    fn name(&self) -> &str;

    /// Thread budget the backend uses for a single kernel call.
    fn n_threads(&self) -> usize;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Element-wise addition.
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise multiplication.
    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// RMS normalization over rows of `hidden_size` elements:
    /// `x[i] * weight[i] / sqrt(mean(x^2) + eps)`.
    fn rms_norm(&self, x: &[f32], weight: &[f32], eps: f32, hidden_size: usize)
        -> Result<Vec<f32>>;

    /// Softmax over consecutive chunks of `width` elements.
    fn softmax(&self, x: &[f32], width: usize) -> Result<Vec<f32>>;

    /// Rotary position embedding for one token.
    ///
    /// - `q`: [n_heads_q, head_dim], `k`: [n_heads_k, head_dim]
    /// - `pos`: absolute sequence position of the token
    /// - `freq_base`: RoPE theta (10000.0 for the original LLaMA)
    ///
    /// Returns (rotated_q, rotated_k).
    #[allow(clippy::too_many_arguments)]
    fn rope(
        &self,
        q: &[f32],
        k: &[f32],
        head_dim: usize,
        pos: usize,
        n_heads_q: usize,
        n_heads_k: usize,
        freq_base: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)>;

    /// SiLU activation: x * sigmoid(x).
    fn silu(&self, x: &[f32]) -> Result<Vec<f32>>;
}
