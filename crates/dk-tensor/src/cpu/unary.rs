//! Scalar element-wise kernels shared by the CPU backend.

#[inline]
pub(crate) fn silu(v: f32) -> f32 {
    v / (1.0 + (-v).exp())
}

/// Numerically stable softmax of one row, in place.
pub(crate) fn softmax_in_place(row: &mut [f32]) {
    let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in row.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }
    for v in row.iter_mut() {
        *v /= sum;
    }
}

/// Rotate consecutive (even, odd) pairs of every head by the RoPE angle for `pos`.
pub(crate) fn rope_in_place(x: &mut [f32], head_dim: usize, pos: usize, freq_base: f32) {
    for head in x.chunks_mut(head_dim) {
        for i in 0..head_dim / 2 {
            let theta = pos as f32 * freq_base.powf(-2.0 * i as f32 / head_dim as f32);
            let (sin_theta, cos_theta) = theta.sin_cos();
            let x0 = head[2 * i];
            let x1 = head[2 * i + 1];
            head[2 * i] = x0 * cos_theta - x1 * sin_theta;
            head[2 * i + 1] = x0 * sin_theta + x1 * cos_theta;
        }
    }
}
