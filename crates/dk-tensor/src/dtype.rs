use std::fmt;

/// Storage formats a GGUF tensor may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// IEEE 754 half precision.
    F16,
    /// 4-bit blocks: f16 scale + 32 packed nibbles.
    Q4_0,
    /// 8-bit blocks: f16 scale + 32 signed bytes.
    Q8_0,
}

impl DType {
    /// Bytes per element for plain types, bytes per block for quantized ones.
    ///
    /// - F32: 4
    /// - F16: 2
    /// - Q4_0: 18 per 32 elements (2-byte scale + 16 bytes of nibbles)
    /// - Q8_0: 34 per 32 elements (2-byte scale + 32 bytes of quants)
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::Q4_0 => 18,
            DType::Q8_0 => 34,
        }
    }

    /// GGUF type id -> `DType`. Ids this crate cannot dequantize map to `None`.
    pub fn from_gguf_type(id: u32) -> Option<DType> {
        match id {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            2 => Some(DType::Q4_0),
            8 => Some(DType::Q8_0),
            _ => None,
        }
    }

    pub fn to_gguf_type(&self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::F16 => 1,
            DType::Q4_0 => 2,
            DType::Q8_0 => 8,
        }
    }

    /// Elements per quantization block, 1 for plain types.
    pub fn block_size(&self) -> usize {
        match self {
            DType::F32 | DType::F16 => 1,
            DType::Q4_0 | DType::Q8_0 => 32,
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, DType::Q4_0 | DType::Q8_0)
    }

    /// Raw byte size of `numel` elements stored in this format.
    pub fn storage_size(&self, numel: usize) -> usize {
        numel.div_ceil(self.block_size()) * self.size_in_bytes()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::Q4_0 => write!(f, "q4_0"),
            DType::Q8_0 => write!(f, "q8_0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_size() {
        assert_eq!(DType::F32.storage_size(10), 40);
        assert_eq!(DType::F16.storage_size(10), 20);
        // 33 elements need two blocks.
        assert_eq!(DType::Q4_0.storage_size(33), 36);
        assert_eq!(DType::Q8_0.storage_size(32), 34);
    }

    #[test]
    fn test_gguf_ids() {
        assert_eq!(DType::from_gguf_type(8), Some(DType::Q8_0));
        assert_eq!(DType::Q4_0.to_gguf_type(), 2);
        assert!(DType::from_gguf_type(999).is_none());
        // Q4_K is a real GGUF type but has no dequantizer here.
        assert!(DType::from_gguf_type(12).is_none());
    }

    #[test]
    fn test_is_quantized() {
        assert!(DType::Q4_0.is_quantized());
        assert!(!DType::F16.is_quantized());
    }
}
