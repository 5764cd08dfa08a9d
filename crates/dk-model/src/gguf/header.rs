use std::io::{Read, Write};

use crate::error::{ModelError, Result};

/// ASCII "GGUF".
pub const GGUF_MAGIC: [u8; 4] = [0x47, 0x47, 0x55, 0x46];

/// Version written by `GgufBuilder`.
pub const GGUF_VERSION: u32 = 3;

/// Tensor data alignment used when `general.alignment` is absent.
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

/// Parsed GGUF file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub n_tensors: u64,
    pub n_kv: u64,
}

impl GgufHeader {
    /// Read and validate the magic, version (u32 LE), tensor count and KV
    /// count (u64 LE each).
    ///
    /// Versions 2 and 3 share this layout; version 1 used 32-bit counts and
    /// is rejected.
    pub fn parse(reader: &mut impl Read) -> Result<GgufHeader> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let version = u32::from_le_bytes(buf4);
        if !(2..=3).contains(&version) {
            return Err(ModelError::UnsupportedVersion(version));
        }

        let mut buf8 = [0u8; 8];
        reader.read_exact(&mut buf8)?;
        let n_tensors = u64::from_le_bytes(buf8);

        reader.read_exact(&mut buf8)?;
        let n_kv = u64::from_le_bytes(buf8);

        Ok(GgufHeader {
            version,
            n_tensors,
            n_kv,
        })
    }

    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&GGUF_MAGIC)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.n_tensors.to_le_bytes())?;
        writer.write_all(&self.n_kv.to_le_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_write_then_parse() {
        let header = GgufHeader {
            version: 3,
            n_tensors: 7,
            n_kv: 12,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 24);
        assert_eq!(GgufHeader::parse(&mut Cursor::new(buf)).unwrap(), header);
    }

    #[test]
    fn test_bad_magic() {
        let err = GgufHeader::parse(&mut Cursor::new(b"GGML\x03\0\0\0".to_vec())).unwrap_err();
        assert!(matches!(err, ModelError::InvalidMagic(_)));
    }

    #[test]
    fn test_version_one_rejected() {
        let mut buf = GGUF_MAGIC.to_vec();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        let err = GgufHeader::parse(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedVersion(1)));
    }
}
