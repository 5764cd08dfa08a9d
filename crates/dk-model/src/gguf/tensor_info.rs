use std::io::{Read, Write};

use dk_tensor::DType;

use crate::error::{ModelError, Result};
use super::metadata::{read_gguf_string, write_gguf_string};

/// GGML supports at most four dimensions.
const MAX_DIMS: u32 = 4;

/// Describes a single tensor stored within a GGUF file.
#[derive(Debug, Clone)]
pub struct GgufTensorInfo {
    /// Tensor name (e.g. "blk.0.attn_q.weight").
    pub name: String,
    /// Dimension sizes, innermost first (GGML `ne` order).
    pub dims: Vec<u64>,
    pub dtype: DType,
    /// Byte offset from the start of the tensor data section.
    pub offset: u64,
}

impl GgufTensorInfo {
    pub fn numel(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Raw byte size of this tensor's data in the file.
    pub fn data_size(&self) -> usize {
        self.dtype.storage_size(self.numel())
    }

    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        write_gguf_string(writer, &self.name)?;
        writer.write_all(&(self.dims.len() as u32).to_le_bytes())?;
        for d in &self.dims {
            writer.write_all(&d.to_le_bytes())?;
        }
        writer.write_all(&self.dtype.to_gguf_type().to_le_bytes())?;
        writer.write_all(&self.offset.to_le_bytes())?;
        Ok(())
    }
}

/// Parse `n_tensors` entries: name, u32 n_dims, n_dims x u64 sizes,
/// u32 type id, u64 data offset.
pub fn parse_tensor_infos(reader: &mut impl Read, n_tensors: u64) -> Result<Vec<GgufTensorInfo>> {
    let mut infos = Vec::with_capacity((n_tensors as usize).min(4096));
    for _ in 0..n_tensors {
        let name = read_gguf_string(reader)?;

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let n_dims = u32::from_le_bytes(buf4);
        if n_dims > MAX_DIMS {
            return Err(ModelError::Other(format!(
                "tensor '{}' has {} dimensions (max {})",
                name, n_dims, MAX_DIMS
            )));
        }

        let mut dims = Vec::with_capacity(n_dims as usize);
        let mut buf8 = [0u8; 8];
        for _ in 0..n_dims {
            reader.read_exact(&mut buf8)?;
            dims.push(u64::from_le_bytes(buf8));
        }

        reader.read_exact(&mut buf4)?;
        let type_id = u32::from_le_bytes(buf4);
        let dtype = DType::from_gguf_type(type_id).ok_or(ModelError::UnsupportedGgufType(type_id))?;

        reader.read_exact(&mut buf8)?;
        let offset = u64::from_le_bytes(buf8);

        infos.push(GgufTensorInfo {
            name,
            dims,
            dtype,
            offset,
        });
    }
    Ok(infos)
}
