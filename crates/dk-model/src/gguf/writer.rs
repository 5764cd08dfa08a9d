//! GGUF v3 image builder.
//!
//! Produces byte-exact files that `GgufFile` can read back. Used to write
//! small synthetic models for tests and fixtures.
//!
//! ```
//! use dk_model::gguf::{GgufBuilder, GgufFile};
//!
//! let bytes = GgufBuilder::new()
//!     .add_string("general.architecture", "llama")
//!     .add_tensor_f32("output_norm.weight", &[4], &[1.0; 4])
//!     .build()
//!     .unwrap();
//! let file = GgufFile::from_bytes(bytes).unwrap();
//! assert_eq!(file.tensor_f32("output_norm.weight").unwrap(), vec![1.0; 4]);
//! ```

use std::path::Path;

use dk_tensor::DType;

use crate::error::{ModelError, Result};
use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT, GGUF_VERSION};
use super::metadata::{write_gguf_string, GgufMetadataValue};
use super::tensor_info::GgufTensorInfo;

#[derive(Debug, Default)]
pub struct GgufBuilder {
    metadata: Vec<(String, GgufMetadataValue)>,
    tensors: Vec<(String, Vec<u64>, DType, Vec<u8>)>,
}

impl GgufBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add(mut self, key: &str, value: GgufMetadataValue) -> Self {
        self.metadata.push((key.to_string(), value));
        self
    }

    #[must_use]
    pub fn add_string(self, key: &str, value: &str) -> Self {
        self.add(key, GgufMetadataValue::String(value.to_string()))
    }

    #[must_use]
    pub fn add_u32(self, key: &str, value: u32) -> Self {
        self.add(key, GgufMetadataValue::U32(value))
    }

    #[must_use]
    pub fn add_f32(self, key: &str, value: f32) -> Self {
        self.add(key, GgufMetadataValue::F32(value))
    }

    #[must_use]
    pub fn add_bool(self, key: &str, value: bool) -> Self {
        self.add(key, GgufMetadataValue::Bool(value))
    }

    #[must_use]
    pub fn add_string_array<S: AsRef<str>>(self, key: &str, values: &[S]) -> Self {
        let values = values
            .iter()
            .map(|s| GgufMetadataValue::String(s.as_ref().to_string()))
            .collect();
        self.add(key, GgufMetadataValue::Array(8, values))
    }

    #[must_use]
    pub fn add_f32_array(self, key: &str, values: &[f32]) -> Self {
        let values = values.iter().map(|&v| GgufMetadataValue::F32(v)).collect();
        self.add(key, GgufMetadataValue::Array(6, values))
    }

    #[must_use]
    pub fn add_i32_array(self, key: &str, values: &[i32]) -> Self {
        let values = values.iter().map(|&v| GgufMetadataValue::I32(v)).collect();
        self.add(key, GgufMetadataValue::Array(5, values))
    }

    /// Add an F32 tensor. `dims` are innermost first.
    #[must_use]
    pub fn add_tensor_f32(self, name: &str, dims: &[u64], data: &[f32]) -> Self {
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.add_tensor_raw(name, dims, DType::F32, bytes)
    }

    /// Add a tensor whose bytes are already encoded in `dtype`.
    #[must_use]
    pub fn add_tensor_raw(
        mut self,
        name: &str,
        dims: &[u64],
        dtype: DType,
        bytes: Vec<u8>,
    ) -> Self {
        self.tensors.push((name.to_string(), dims.to_vec(), dtype, bytes));
        self
    }

    /// Serialize: header, metadata, tensor table, then aligned tensor data.
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        GgufHeader {
            version: GGUF_VERSION,
            n_tensors: self.tensors.len() as u64,
            n_kv: self.metadata.len() as u64,
        }
        .write(&mut out)?;

        for (key, value) in &self.metadata {
            write_gguf_string(&mut out, key)?;
            out.extend_from_slice(&value.type_id().to_le_bytes());
            value.write_payload(&mut out)?;
        }

        let mut offset = 0usize;
        let mut infos = Vec::with_capacity(self.tensors.len());
        for (name, dims, dtype, bytes) in &self.tensors {
            let info = GgufTensorInfo {
                name: name.clone(),
                dims: dims.clone(),
                dtype: *dtype,
                offset: offset as u64,
            };
            if info.data_size() != bytes.len() {
                return Err(ModelError::TensorShape {
                    name: name.clone(),
                    expected: info.data_size(),
                    got: bytes.len(),
                });
            }
            info.write(&mut out)?;
            offset = (offset + bytes.len()).next_multiple_of(GGUF_DEFAULT_ALIGNMENT);
            infos.push(info);
        }

        let data_start = out.len().next_multiple_of(GGUF_DEFAULT_ALIGNMENT);
        for (info, (_, _, _, bytes)) in infos.iter().zip(&self.tensors) {
            out.resize(data_start + info.offset as usize, 0);
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.build()?)?;
        Ok(())
    }
}
