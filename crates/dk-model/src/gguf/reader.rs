use std::io::Cursor;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::error::{ModelError, Result};
use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT};
use super::metadata::GgufMetadata;
use super::tensor_info::{self, GgufTensorInfo};

/// How the bytes of a GGUF file are brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Map the file instead of reading it into a heap buffer.
    pub use_mmap: bool,
    /// Pin mapped pages in RAM (unix only; ignored without `use_mmap`).
    pub use_mlock: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            use_mmap: true,
            use_mlock: false,
        }
    }
}

enum FileBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Mapped(m) => m,
            FileBytes::Owned(v) => v,
        }
    }
}

/// A parsed GGUF file.
///
/// The header, metadata and tensor table are parsed eagerly; tensor data is
/// sliced out of the mapped (or read) bytes on demand.
pub struct GgufFile {
    pub header: GgufHeader,
    pub metadata: GgufMetadata,
    pub tensor_infos: Vec<GgufTensorInfo>,
    bytes: FileBytes,
    /// Byte offset within the file where tensor data begins (aligned).
    data_offset: usize,
}

impl GgufFile {
    /// Memory-map and parse a GGUF file.
    pub fn open(path: &Path) -> Result<GgufFile> {
        Self::open_with(path, OpenOptions::default())
    }

    pub fn open_with(path: &Path, options: OpenOptions) -> Result<GgufFile> {
        let bytes = if options.use_mmap {
            let file = std::fs::File::open(path)?;
            // SAFETY: the mapping is read-only and owned by the returned
            // GgufFile; concurrent truncation of the file by another process
            // is outside this library's contract.
            let mmap = unsafe { Mmap::map(&file)? };
            if options.use_mlock {
                lock_pages(&mmap);
            }
            FileBytes::Mapped(mmap)
        } else {
            if options.use_mlock {
                warn!("use_mlock requires use_mmap; ignoring");
            }
            FileBytes::Owned(std::fs::read(path)?)
        };
        Self::parse(bytes)
    }

    /// Parse a GGUF image that is already in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<GgufFile> {
        Self::parse(FileBytes::Owned(bytes))
    }

    fn parse(bytes: FileBytes) -> Result<GgufFile> {
        let mut reader = Cursor::new(&bytes[..]);
        let header = GgufHeader::parse(&mut reader)?;
        let metadata = GgufMetadata::parse_kv(&mut reader, header.n_kv)?;
        let tensor_infos = tensor_info::parse_tensor_infos(&mut reader, header.n_tensors)?;

        let alignment = match metadata.get_u32("general.alignment") {
            Ok(a) if a > 0 && a.is_power_of_two() => a as usize,
            Ok(a) => {
                return Err(ModelError::Other(format!("invalid general.alignment {}", a)));
            }
            Err(_) => GGUF_DEFAULT_ALIGNMENT,
        };
        let table_end = reader.position() as usize;
        let data_offset = table_end.next_multiple_of(alignment);

        debug!(
            version = header.version,
            n_tensors = header.n_tensors,
            n_kv = header.n_kv,
            data_offset,
            "parsed GGUF header"
        );

        Ok(GgufFile {
            header,
            metadata,
            tensor_infos,
            bytes,
            data_offset,
        })
    }

    pub fn tensor_info(&self, name: &str) -> Option<&GgufTensorInfo> {
        self.tensor_infos.iter().find(|t| t.name == name)
    }

    /// Raw bytes of a tensor, bounds-checked against the file size.
    pub fn tensor_data(&self, info: &GgufTensorInfo) -> Result<&[u8]> {
        let start = usize::try_from(info.offset)
            .ok()
            .and_then(|off| off.checked_add(self.data_offset));
        let end = start.and_then(|s| s.checked_add(info.data_size()));
        match (start, end) {
            (Some(s), Some(e)) if e <= self.bytes.len() => Ok(&self.bytes[s..e]),
            _ => Err(ModelError::TensorOutOfBounds(info.name.clone())),
        }
    }

    /// Load a tensor by name, dequantized to f32.
    pub fn tensor_f32(&self, name: &str) -> Result<Vec<f32>> {
        let info = self
            .tensor_info(name)
            .ok_or_else(|| ModelError::TensorNotFound(name.to_string()))?;
        let raw = self.tensor_data(info)?;
        Ok(dk_tensor::dequantize(info.dtype, raw, info.numel())?)
    }

    /// Whether the bytes come from a memory map.
    pub fn is_mapped(&self) -> bool {
        matches!(self.bytes, FileBytes::Mapped(_))
    }
}

#[cfg(unix)]
fn lock_pages(mmap: &Mmap) {
    if let Err(e) = mmap.lock() {
        warn!("failed to mlock model mapping: {e}");
    }
}

#[cfg(not(unix))]
fn lock_pages(_mmap: &Mmap) {
    warn!("use_mlock is not supported on this platform; ignoring");
}
