use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

use crate::error::{ModelError, Result};

/// Upper bound for speculative preallocation from untrusted length fields.
const MAX_PREALLOC: usize = 1 << 16;

/// A single GGUF metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufMetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    /// Homogeneous array; the element type id is stored for writing back.
    Array(u32, Vec<GgufMetadataValue>),
}

impl GgufMetadataValue {
    fn type_name(&self) -> &'static str {
        match self {
            GgufMetadataValue::U8(_) => "U8",
            GgufMetadataValue::I8(_) => "I8",
            GgufMetadataValue::U16(_) => "U16",
            GgufMetadataValue::I16(_) => "I16",
            GgufMetadataValue::U32(_) => "U32",
            GgufMetadataValue::I32(_) => "I32",
            GgufMetadataValue::U64(_) => "U64",
            GgufMetadataValue::I64(_) => "I64",
            GgufMetadataValue::F32(_) => "F32",
            GgufMetadataValue::F64(_) => "F64",
            GgufMetadataValue::Bool(_) => "Bool",
            GgufMetadataValue::String(_) => "String",
            GgufMetadataValue::Array(..) => "Array",
        }
    }

    /// GGUF value type id:
    /// 0=U8, 1=I8, 2=U16, 3=I16, 4=U32, 5=I32, 6=F32, 7=Bool,
    /// 8=String, 9=Array, 10=U64, 11=I64, 12=F64
    pub fn type_id(&self) -> u32 {
        match self {
            GgufMetadataValue::U8(_) => 0,
            GgufMetadataValue::I8(_) => 1,
            GgufMetadataValue::U16(_) => 2,
            GgufMetadataValue::I16(_) => 3,
            GgufMetadataValue::U32(_) => 4,
            GgufMetadataValue::I32(_) => 5,
            GgufMetadataValue::F32(_) => 6,
            GgufMetadataValue::Bool(_) => 7,
            GgufMetadataValue::String(_) => 8,
            GgufMetadataValue::Array(..) => 9,
            GgufMetadataValue::U64(_) => 10,
            GgufMetadataValue::I64(_) => 11,
            GgufMetadataValue::F64(_) => 12,
        }
    }

    /// Integer value widened to i64, for keys whose writers disagree on width.
    fn as_i64(&self) -> Option<i64> {
        match *self {
            GgufMetadataValue::U8(v) => Some(v as i64),
            GgufMetadataValue::I8(v) => Some(v as i64),
            GgufMetadataValue::U16(v) => Some(v as i64),
            GgufMetadataValue::I16(v) => Some(v as i64),
            GgufMetadataValue::U32(v) => Some(v as i64),
            GgufMetadataValue::I32(v) => Some(v as i64),
            GgufMetadataValue::U64(v) => i64::try_from(v).ok(),
            GgufMetadataValue::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Payload only (no type id), as it appears inside an array or entry.
    pub fn write_payload(&self, writer: &mut impl Write) -> Result<()> {
        match self {
            GgufMetadataValue::U8(v) => writer.write_all(&[*v])?,
            GgufMetadataValue::I8(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::U16(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::I16(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::U32(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::I32(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::U64(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::I64(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::F32(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::F64(v) => writer.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::Bool(v) => writer.write_all(&[*v as u8])?,
            GgufMetadataValue::String(s) => write_gguf_string(writer, s)?,
            GgufMetadataValue::Array(elem_type, values) => {
                writer.write_all(&elem_type.to_le_bytes())?;
                writer.write_all(&(values.len() as u64).to_le_bytes())?;
                for v in values {
                    if v.type_id() != *elem_type {
                        return Err(ModelError::Other(format!(
                            "array element {} does not match element type {}",
                            v.type_name(),
                            elem_type
                        )));
                    }
                    v.write_payload(writer)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for GgufMetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GgufMetadataValue::U8(v) => write!(f, "{v}"),
            GgufMetadataValue::I8(v) => write!(f, "{v}"),
            GgufMetadataValue::U16(v) => write!(f, "{v}"),
            GgufMetadataValue::I16(v) => write!(f, "{v}"),
            GgufMetadataValue::U32(v) => write!(f, "{v}"),
            GgufMetadataValue::I32(v) => write!(f, "{v}"),
            GgufMetadataValue::U64(v) => write!(f, "{v}"),
            GgufMetadataValue::I64(v) => write!(f, "{v}"),
            GgufMetadataValue::F32(v) => write!(f, "{v}"),
            GgufMetadataValue::F64(v) => write!(f, "{v}"),
            GgufMetadataValue::Bool(v) => write!(f, "{v}"),
            GgufMetadataValue::String(s) => f.write_str(s),
            GgufMetadataValue::Array(_, values) => write!(f, "[{} values]", values.len()),
        }
    }
}

/// Collection of GGUF metadata key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct GgufMetadata {
    pub entries: HashMap<String, GgufMetadataValue>,
}

impl GgufMetadata {
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&GgufMetadataValue> {
        self.entries.get(key)
    }

    fn typed<'a, T>(
        &'a self,
        key: &str,
        expected: &str,
        extract: impl Fn(&'a GgufMetadataValue) -> Option<T>,
    ) -> Result<T> {
        let value = self
            .entries
            .get(key)
            .ok_or_else(|| ModelError::MissingKey(key.to_string()))?;
        extract(value).ok_or_else(|| ModelError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            got: value.type_name().to_string(),
        })
    }

    fn typed_array<'a, T>(
        &'a self,
        key: &str,
        expected: &str,
        extract: impl Fn(&'a GgufMetadataValue) -> Option<T>,
    ) -> Result<Vec<T>> {
        let values = self.typed(key, "Array", |v| match v {
            GgufMetadataValue::Array(_, values) => Some(values),
            _ => None,
        })?;
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                extract(v).ok_or_else(|| ModelError::TypeMismatch {
                    key: format!("{}[{}]", key, i),
                    expected: expected.to_string(),
                    got: v.type_name().to_string(),
                })
            })
            .collect()
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        self.typed(key, "String", |v| match v {
            GgufMetadataValue::String(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Any integer type that fits in a u32.
    pub fn get_u32(&self, key: &str) -> Result<u32> {
        self.typed(key, "U32", |v| v.as_i64().and_then(|x| u32::try_from(x).ok()))
    }

    /// Any integer type that fits in an i32.
    pub fn get_i32(&self, key: &str) -> Result<i32> {
        self.typed(key, "I32", |v| v.as_i64().and_then(|x| i32::try_from(x).ok()))
    }

    pub fn get_f32(&self, key: &str) -> Result<f32> {
        self.typed(key, "F32", |v| match *v {
            GgufMetadataValue::F32(x) => Some(x),
            GgufMetadataValue::F64(x) => Some(x as f32),
            _ => None,
        })
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.typed(key, "Bool", |v| match *v {
            GgufMetadataValue::Bool(b) => Some(b),
            _ => None,
        })
    }

    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>> {
        self.typed_array(key, "String", |v| match v {
            GgufMetadataValue::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn get_f32_array(&self, key: &str) -> Result<Vec<f32>> {
        self.typed_array(key, "F32", |v| match *v {
            GgufMetadataValue::F32(x) => Some(x),
            _ => None,
        })
    }

    pub fn get_i32_array(&self, key: &str) -> Result<Vec<i32>> {
        self.typed_array(key, "I32", |v| v.as_i64().and_then(|x| i32::try_from(x).ok()))
    }

    /// Parse `n_kv` entries: GGUF string key, u32 type id, payload.
    pub fn parse_kv(reader: &mut impl Read, n_kv: u64) -> Result<GgufMetadata> {
        let mut entries = HashMap::new();
        for _ in 0..n_kv {
            let key = read_gguf_string(reader)?;
            let type_id = read_u32(reader)?;
            let value = read_value(reader, type_id)?;
            entries.insert(key, value);
        }
        Ok(GgufMetadata { entries })
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf4 = [0u8; 4];
    reader.read_exact(&mut buf4)?;
    Ok(u32::from_le_bytes(buf4))
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf8 = [0u8; 8];
    reader.read_exact(&mut buf8)?;
    Ok(u64::from_le_bytes(buf8))
}

/// u64 length then that many UTF-8 bytes.
pub(crate) fn read_gguf_string(reader: &mut impl Read) -> Result<String> {
    let len = read_u64(reader)?;
    let mut buf = Vec::with_capacity((len as usize).min(MAX_PREALLOC));
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(ModelError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    String::from_utf8(buf).map_err(|e| ModelError::Other(format!("invalid UTF-8 in string: {}", e)))
}

pub(crate) fn write_gguf_string(writer: &mut impl Write, s: &str) -> Result<()> {
    writer.write_all(&(s.len() as u64).to_le_bytes())?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_value(reader: &mut impl Read, type_id: u32) -> Result<GgufMetadataValue> {
    macro_rules! scalar {
        ($ty:ty, $variant:ident) => {{
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            reader.read_exact(&mut buf)?;
            GgufMetadataValue::$variant(<$ty>::from_le_bytes(buf))
        }};
    }

    Ok(match type_id {
        0 => scalar!(u8, U8),
        1 => scalar!(i8, I8),
        2 => scalar!(u16, U16),
        3 => scalar!(i16, I16),
        4 => scalar!(u32, U32),
        5 => scalar!(i32, I32),
        6 => scalar!(f32, F32),
        7 => {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            GgufMetadataValue::Bool(buf[0] != 0)
        }
        8 => GgufMetadataValue::String(read_gguf_string(reader)?),
        9 => {
            let elem_type = read_u32(reader)?;
            let count = read_u64(reader)? as usize;
            let mut values = Vec::with_capacity(count.min(MAX_PREALLOC));
            for _ in 0..count {
                values.push(read_value(reader, elem_type)?);
            }
            GgufMetadataValue::Array(elem_type, values)
        }
        10 => scalar!(u64, U64),
        11 => scalar!(i64, I64),
        12 => scalar!(f64, F64),
        other => return Err(ModelError::UnsupportedGgufType(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn entry(buf: &mut Vec<u8>, key: &str, value: &GgufMetadataValue) {
        write_gguf_string(buf, key).unwrap();
        buf.extend_from_slice(&value.type_id().to_le_bytes());
        value.write_payload(buf).unwrap();
    }

    #[test]
    fn test_parse_mixed_entries() {
        let mut buf = Vec::new();
        entry(&mut buf, "general.architecture", &GgufMetadataValue::String("llama".into()));
        entry(&mut buf, "llama.block_count", &GgufMetadataValue::U32(2));
        entry(
            &mut buf,
            "tokenizer.ggml.tokens",
            &GgufMetadataValue::Array(8, vec![
                GgufMetadataValue::String("a".into()),
                GgufMetadataValue::String("b".into()),
            ]),
        );

        let meta = GgufMetadata::parse_kv(&mut Cursor::new(buf), 3).unwrap();
        assert_eq!(meta.get_string("general.architecture").unwrap(), "llama");
        assert_eq!(meta.get_u32("llama.block_count").unwrap(), 2);
        assert_eq!(meta.get_string_array("tokenizer.ggml.tokens").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_integer_widths_are_interchangeable() {
        let mut meta = GgufMetadata::default();
        meta.entries.insert("a".into(), GgufMetadataValue::I32(5));
        meta.entries.insert("b".into(), GgufMetadataValue::U64(7));
        meta.entries.insert("c".into(), GgufMetadataValue::I32(-1));
        assert_eq!(meta.get_u32("a").unwrap(), 5);
        assert_eq!(meta.get_i32("b").unwrap(), 7);
        assert!(matches!(meta.get_u32("c"), Err(ModelError::TypeMismatch { .. })));
    }

    #[test]
    fn test_missing_and_mismatch() {
        let mut meta = GgufMetadata::default();
        meta.entries.insert("s".into(), GgufMetadataValue::String("x".into()));
        assert!(matches!(meta.get_u32("nope"), Err(ModelError::MissingKey(_))));
        assert!(matches!(meta.get_f32("s"), Err(ModelError::TypeMismatch { .. })));
    }

    #[test]
    fn test_truncated_string_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(b"abc");
        assert!(read_gguf_string(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_unknown_type_id() {
        let mut buf = Vec::new();
        write_gguf_string(&mut buf, "k").unwrap();
        buf.extend_from_slice(&99u32.to_le_bytes());
        let err = GgufMetadata::parse_kv(&mut Cursor::new(buf), 1).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedGgufType(99)));
    }
}
