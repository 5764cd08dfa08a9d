use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// Dequantize `numel` elements of raw little-endian GGUF data to f32.
///
/// Fails with `TensorError::Truncated` when `data` is shorter than the
/// format requires; the caller gets an error instead of an out-of-bounds read.
pub fn dequantize(dtype: DType, data: &[u8], numel: usize) -> Result<Vec<f32>> {
    let needed = dtype.storage_size(numel);
    if data.len() < needed {
        return Err(TensorError::Truncated {
            dtype: dtype.to_string(),
            needed,
            available: data.len(),
        });
    }
    let data = &data[..needed];

    Ok(match dtype {
        DType::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        DType::F16 => data
            .chunks_exact(2)
            .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        DType::Q4_0 => dequantize_q4_0(data, numel),
        DType::Q8_0 => dequantize_q8_0(data, numel),
    })
}

/// Q4_0: per 18-byte block, an f16 scale then 16 bytes holding 32 nibbles.
///
/// GGUF packs the first 16 values in the low nibbles and the last 16 in the
/// high nibbles. Each value is `(nibble - 8) * scale`.
fn dequantize_q4_0(data: &[u8], numel: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(numel.div_ceil(32) * 32);
    for block in data.chunks_exact(18) {
        let scale = half::f16::from_le_bytes([block[0], block[1]]).to_f32();
        let quants = &block[2..];
        let mut values = [0.0f32; 32];
        for (j, &byte) in quants.iter().enumerate() {
            values[j] = ((byte & 0x0F) as i32 - 8) as f32 * scale;
            values[j + 16] = ((byte >> 4) as i32 - 8) as f32 * scale;
        }
        out.extend_from_slice(&values);
    }
    out.truncate(numel);
    out
}

/// Q8_0: per 34-byte block, an f16 scale then 32 signed bytes.
fn dequantize_q8_0(data: &[u8], numel: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(numel.div_ceil(32) * 32);
    for block in data.chunks_exact(34) {
        let scale = half::f16::from_le_bytes([block[0], block[1]]).to_f32();
        out.extend(block[2..].iter().map(|&q| q as i8 as f32 * scale));
    }
    out.truncate(numel);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn f16_bytes(v: f32) -> [u8; 2] {
        half::f16::from_f32(v).to_le_bytes()
    }

    #[test]
    fn test_f32_passthrough() {
        let raw: Vec<u8> = [1.5f32, -2.0, 0.25]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let out = dequantize(DType::F32, &raw, 3).unwrap();
        assert_eq!(out, vec![1.5, -2.0, 0.25]);
    }

    #[test]
    fn test_f16() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&f16_bytes(0.5));
        raw.extend_from_slice(&f16_bytes(-3.0));
        let out = dequantize(DType::F16, &raw, 2).unwrap();
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[1], -3.0);
    }

    #[test]
    fn test_q8_0_block() {
        let mut raw = f16_bytes(0.5).to_vec();
        raw.extend((0..32).map(|i| (i as i8 - 16) as u8));
        let out = dequantize(DType::Q8_0, &raw, 32).unwrap();
        assert_relative_eq!(out[0], -8.0);
        assert_relative_eq!(out[16], 0.0);
        assert_relative_eq!(out[31], 7.5);
    }

    #[test]
    fn test_q4_0_nibble_order() {
        let mut raw = f16_bytes(1.0).to_vec();
        // low nibble 9 -> +1 for element j, high nibble 7 -> -1 for element j + 16
        raw.extend(std::iter::repeat(0x79u8).take(16));
        let out = dequantize(DType::Q4_0, &raw, 32).unwrap();
        assert_relative_eq!(out[0], 1.0);
        assert_relative_eq!(out[15], 1.0);
        assert_relative_eq!(out[16], -1.0);
        assert_relative_eq!(out[31], -1.0);
    }

    #[test]
    fn test_partial_block_is_trimmed() {
        let mut raw = f16_bytes(2.0).to_vec();
        raw.extend(std::iter::repeat(1u8).take(32));
        let out = dequantize(DType::Q8_0, &raw, 5).unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_truncated_input() {
        let err = dequantize(DType::F32, &[0u8; 7], 2).unwrap_err();
        assert!(matches!(err, TensorError::Truncated { needed: 8, available: 7, .. }));
    }
}
