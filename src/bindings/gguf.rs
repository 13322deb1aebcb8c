//! GGUF header reader.
//!
//! Reads the magic, version and key/value metadata at the start of a GGUF
//! file. Tensor infos and tensor data are never read, and array values are
//! skipped with only their element type and length recorded, so inspecting a
//! multi-gigabyte model touches a few megabytes at most.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// "GGUF" read as a little-endian u32.
pub const GGUF_MAGIC: u32 = 0x4655_4747;

const MIN_VERSION: u32 = 2;
const MAX_VERSION: u32 = 3;

/// Longest string value accepted; anything larger is a corrupt header.
const MAX_STRING_LEN: u64 = 16 * 1024 * 1024;

/// Deepest array nesting accepted. llama.cpp itself never writes arrays of
/// arrays into model files; one level of nesting is tolerated.
pub const MAX_ARRAY_DEPTH: u32 = 2;

#[derive(Error, Debug)]
pub enum GgufError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Not a GGUF file (magic {0:#010x})")]
    InvalidMagic(u32),

    #[error("Unsupported GGUF version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid metadata value type {0}")]
    InvalidValueType(u32),

    #[error("Invalid string in metadata: {0}")]
    InvalidString(String),

    #[error("Missing metadata key: {0}")]
    MissingKey(String),

    #[error("Metadata arrays nested deeper than {limit} levels")]
    NestingTooDeep { limit: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GgufValueType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Bool,
    String,
    Array,
    Uint64,
    Int64,
    Float64,
}

impl TryFrom<u32> for GgufValueType {
    type Error = GgufError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => GgufValueType::Uint8,
            1 => GgufValueType::Int8,
            2 => GgufValueType::Uint16,
            3 => GgufValueType::Int16,
            4 => GgufValueType::Uint32,
            5 => GgufValueType::Int32,
            6 => GgufValueType::Float32,
            7 => GgufValueType::Bool,
            8 => GgufValueType::String,
            9 => GgufValueType::Array,
            10 => GgufValueType::Uint64,
            11 => GgufValueType::Int64,
            12 => GgufValueType::Float64,
            other => return Err(GgufError::InvalidValueType(other)),
        })
    }
}

impl GgufValueType {
    /// Encoded size of a fixed-width value, `None` for strings and arrays.
    fn fixed_size(self) -> Option<u64> {
        match self {
            GgufValueType::Uint8 | GgufValueType::Int8 | GgufValueType::Bool => Some(1),
            GgufValueType::Uint16 | GgufValueType::Int16 => Some(2),
            GgufValueType::Uint32 | GgufValueType::Int32 | GgufValueType::Float32 => Some(4),
            GgufValueType::Uint64 | GgufValueType::Int64 | GgufValueType::Float64 => Some(8),
            GgufValueType::String | GgufValueType::Array => None,
        }
    }
}

/// A metadata value. Arrays keep only their shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GgufValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array { item_type: GgufValueType, len: u64 },
    Uint64(u64),
    Int64(i64),
    Float64(f64),
}

impl GgufValue {
    /// Any non-negative integer value, widened.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            GgufValue::Uint8(v) => Some(v.into()),
            GgufValue::Uint16(v) => Some(v.into()),
            GgufValue::Uint32(v) => Some(v.into()),
            GgufValue::Uint64(v) => Some(v),
            GgufValue::Int8(v) => u64::try_from(v).ok(),
            GgufValue::Int16(v) => u64::try_from(v).ok(),
            GgufValue::Int32(v) => u64::try_from(v).ok(),
            GgufValue::Int64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Parsed GGUF header.
#[derive(Debug, Clone, Serialize)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata: BTreeMap<String, GgufValue>,
}

impl GgufHeader {
    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.get(key)
    }

    /// `general.architecture`, e.g. "llama" or "qwen2".
    pub fn architecture(&self) -> Option<&str> {
        self.get("general.architecture").and_then(GgufValue::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get("general.name").and_then(GgufValue::as_str)
    }

    /// `<arch>.context_length`.
    pub fn context_length(&self) -> Option<u64> {
        let arch = self.architecture()?;
        self.get(&format!("{arch}.context_length"))
            .and_then(GgufValue::as_u64)
    }

    /// Length of `tokenizer.ggml.tokens`, falling back to `<arch>.vocab_size`.
    pub fn vocab_size(&self) -> Option<u64> {
        if let Some(GgufValue::Array { len, .. }) = self.get("tokenizer.ggml.tokens") {
            return Some(*len);
        }
        let arch = self.architecture()?;
        self.get(&format!("{arch}.vocab_size"))
            .and_then(GgufValue::as_u64)
    }

    /// `general.file_type` as llama.cpp's quantization name.
    pub fn quantization(&self) -> Option<&'static str> {
        let file_type = self.get("general.file_type").and_then(GgufValue::as_u64)?;
        Some(match file_type {
            0 => "F32",
            1 => "F16",
            2 => "Q4_0",
            3 => "Q4_1",
            7 => "Q8_0",
            8 => "Q5_0",
            9 => "Q5_1",
            10 => "Q2_K",
            11 => "Q3_K_S",
            12 => "Q3_K_M",
            13 => "Q3_K_L",
            14 => "Q4_K_S",
            15 => "Q4_K_M",
            16 => "Q5_K_S",
            17 => "Q5_K_M",
            18 => "Q6_K",
            32 => "BF16",
            _ => "unknown",
        })
    }
}

/// Summary of a model file as shown by `alpaca --inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub architecture: String,
    pub name: Option<String>,
    pub gguf_version: u32,
    pub tensor_count: u64,
    pub n_vocab: Option<u64>,
    pub context_length: Option<u64>,
    pub quantization: Option<String>,
    pub file_size: u64,
}

/// Read the header of the GGUF file at `path`.
pub fn read_header(path: &Path) -> Result<GgufHeader, GgufError> {
    let file = File::open(path)?;
    parse_header(BufReader::new(file))
}

/// Read a model file's header and summarize it.
pub fn load_metadata(path: &Path) -> Result<ModelMetadata, GgufError> {
    let file_size = std::fs::metadata(path)?.len();
    let header = read_header(path)?;

    let architecture = header
        .architecture()
        .ok_or_else(|| GgufError::MissingKey("general.architecture".to_string()))?
        .to_string();

    let metadata = ModelMetadata {
        name: header.name().map(str::to_string),
        gguf_version: header.version,
        tensor_count: header.tensor_count,
        n_vocab: header.vocab_size(),
        context_length: header.context_length(),
        quantization: header.quantization().map(str::to_string),
        file_size,
        architecture,
    };

    info!(
        arch = metadata.architecture,
        gguf_version = metadata.gguf_version,
        tensors = metadata.tensor_count,
        n_vocab = metadata.n_vocab,
        context_length = metadata.context_length,
        "Read GGUF metadata"
    );

    Ok(metadata)
}

/// Parse a GGUF header from the start of `reader`.
pub fn parse_header<R: Read>(mut reader: R) -> Result<GgufHeader, GgufError> {
    let magic = read_u32(&mut reader)?;
    if magic != GGUF_MAGIC {
        return Err(GgufError::InvalidMagic(magic));
    }

    let version = read_u32(&mut reader)?;
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(GgufError::UnsupportedVersion(version));
    }

    let tensor_count = read_u64(&mut reader)?;
    let kv_count = read_u64(&mut reader)?;

    let mut metadata = BTreeMap::new();
    for _ in 0..kv_count {
        let key = read_string(&mut reader)?;
        let value_type = GgufValueType::try_from(read_u32(&mut reader)?)?;
        let value = read_value(&mut reader, value_type)?;
        metadata.insert(key, value);
    }

    Ok(GgufHeader {
        version,
        tensor_count,
        metadata,
    })
}

fn read_value<R: Read>(reader: &mut R, value_type: GgufValueType) -> Result<GgufValue, GgufError> {
    Ok(match value_type {
        GgufValueType::Uint8 => GgufValue::Uint8(read_array::<1, _>(reader)?[0]),
        GgufValueType::Int8 => GgufValue::Int8(i8::from_le_bytes(read_array(reader)?)),
        GgufValueType::Uint16 => GgufValue::Uint16(u16::from_le_bytes(read_array(reader)?)),
        GgufValueType::Int16 => GgufValue::Int16(i16::from_le_bytes(read_array(reader)?)),
        GgufValueType::Uint32 => GgufValue::Uint32(read_u32(reader)?),
        GgufValueType::Int32 => GgufValue::Int32(i32::from_le_bytes(read_array(reader)?)),
        GgufValueType::Float32 => GgufValue::Float32(f32::from_le_bytes(read_array(reader)?)),
        GgufValueType::Bool => GgufValue::Bool(read_array::<1, _>(reader)?[0] != 0),
        GgufValueType::String => GgufValue::String(read_string(reader)?),
        GgufValueType::Uint64 => GgufValue::Uint64(read_u64(reader)?),
        GgufValueType::Int64 => GgufValue::Int64(i64::from_le_bytes(read_array(reader)?)),
        GgufValueType::Float64 => GgufValue::Float64(f64::from_le_bytes(read_array(reader)?)),
        GgufValueType::Array => {
            let item_type = GgufValueType::try_from(read_u32(reader)?)?;
            let len = read_u64(reader)?;
            skip_items(reader, item_type, len, 1)?;
            GgufValue::Array { item_type, len }
        }
    })
}

/// Skip `len` items of an array sitting `depth` levels deep.
fn skip_items<R: Read>(
    reader: &mut R,
    item_type: GgufValueType,
    len: u64,
    depth: u32,
) -> Result<(), GgufError> {
    if let Some(size) = item_type.fixed_size() {
        let total = size
            .checked_mul(len)
            .ok_or_else(|| GgufError::InvalidString(format!("array of {len} items overflows")))?;
        return skip_bytes(reader, total);
    }

    for _ in 0..len {
        match item_type {
            GgufValueType::String => {
                let n = read_u64(reader)?;
                check_string_len(n)?;
                skip_bytes(reader, n)?;
            }
            GgufValueType::Array => {
                if depth >= MAX_ARRAY_DEPTH {
                    return Err(GgufError::NestingTooDeep {
                        limit: MAX_ARRAY_DEPTH,
                    });
                }
                let nested_type = GgufValueType::try_from(read_u32(reader)?)?;
                let nested_len = read_u64(reader)?;
                skip_items(reader, nested_type, nested_len, depth + 1)?;
            }
            _ => unreachable!("fixed-size types handled above"),
        }
    }
    Ok(())
}

fn skip_bytes<R: Read>(reader: &mut R, n: u64) -> Result<(), GgufError> {
    let skipped = io::copy(&mut reader.by_ref().take(n), &mut io::sink())?;
    if skipped != n {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated GGUF metadata").into());
    }
    Ok(())
}

fn check_string_len(n: u64) -> Result<(), GgufError> {
    if n > MAX_STRING_LEN {
        return Err(GgufError::InvalidString(format!("length {n} exceeds limit")));
    }
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, GgufError> {
    let n = read_u64(reader)?;
    check_string_len(n)?;
    let mut buf = vec![0u8; n as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| GgufError::InvalidString(e.to_string()))
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> Result<[u8; N], GgufError> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, GgufError> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, GgufError> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}

/// Synthetic GGUF files for tests and benchmarks.
///
/// The files carry only the header metadata llama.cpp reads for the
/// vocabulary and training context queries; there are no tensors.
#[doc(hidden)]
pub mod test_support {
    use std::io;
    use std::path::{Path, PathBuf};

    use super::GGUF_MAGIC;

    pub fn put_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_kv_string(buf: &mut Vec<u8>, key: &str, value: &str) {
        put_string(buf, key);
        buf.extend_from_slice(&8u32.to_le_bytes());
        put_string(buf, value);
    }

    pub fn put_kv_u32(buf: &mut Vec<u8>, key: &str, value: u32) {
        put_string(buf, key);
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Magic, version, zero tensors and `kv_count` metadata entries to follow.
    pub fn put_preamble(buf: &mut Vec<u8>, version: u32, kv_count: u64) {
        buf.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&kv_count.to_le_bytes());
    }

    /// A header whose only key holds `depth` arrays nested inside each other,
    /// each of length one, around a single `u8`.
    pub fn nested_array_header(depth: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        put_preamble(&mut buf, 3, 1);
        put_string(&mut buf, "general.nested");
        buf.extend_from_slice(&9u32.to_le_bytes());
        for _ in 1..depth {
            buf.extend_from_slice(&9u32.to_le_bytes());
            buf.extend_from_slice(&1u64.to_le_bytes());
        }
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.push(0);
        buf
    }

    /// Header metadata of a llama.cpp model file.
    #[derive(Debug, Clone)]
    pub struct ModelFile<'a> {
        pub arch: &'a str,
        pub name: &'a str,
        pub n_vocab: u32,
        pub n_ctx: u32,
        pub file_type: Option<u32>,
    }

    impl<'a> ModelFile<'a> {
        pub fn new(arch: &'a str, n_vocab: u32, n_ctx: u32) -> Self {
            Self {
                arch,
                name: "test model",
                n_vocab,
                n_ctx,
                file_type: None,
            }
        }

        pub fn name(mut self, name: &'a str) -> Self {
            self.name = name;
            self
        }

        pub fn file_type(mut self, file_type: u32) -> Self {
            self.file_type = Some(file_type);
            self
        }

        /// Architecture, name, optional file type, context length, a token
        /// array and a float score array.
        pub fn header(&self) -> Vec<u8> {
            let kv_count = 5 + u64::from(self.file_type.is_some());
            let mut buf = Vec::new();
            put_preamble(&mut buf, 3, kv_count);

            put_kv_string(&mut buf, "general.architecture", self.arch);
            put_kv_string(&mut buf, "general.name", self.name);
            if let Some(file_type) = self.file_type {
                put_kv_u32(&mut buf, "general.file_type", file_type);
            }
            put_kv_u32(&mut buf, &format!("{}.context_length", self.arch), self.n_ctx);

            put_string(&mut buf, "tokenizer.ggml.tokens");
            buf.extend_from_slice(&9u32.to_le_bytes());
            buf.extend_from_slice(&8u32.to_le_bytes());
            buf.extend_from_slice(&u64::from(self.n_vocab).to_le_bytes());
            for i in 0..self.n_vocab {
                put_string(&mut buf, &format!("<0x{i:04X}>"));
            }

            put_string(&mut buf, "tokenizer.ggml.scores");
            buf.extend_from_slice(&9u32.to_le_bytes());
            buf.extend_from_slice(&6u32.to_le_bytes());
            buf.extend_from_slice(&u64::from(self.n_vocab).to_le_bytes());
            for _ in 0..self.n_vocab {
                buf.extend_from_slice(&0.0f32.to_le_bytes());
            }

            buf
        }

        /// Write the header to `dir/file_name` and return the full path.
        pub fn write_to(&self, dir: &Path, file_name: &str) -> io::Result<PathBuf> {
            let path = dir.join(file_name);
            std::fs::write(&path, self.header())?;
            Ok(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_parse_model_header() {
        let bytes = ModelFile::new("llama", 32000, 2048).header();
        let header = parse_header(bytes.as_slice()).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.architecture(), Some("llama"));
        assert_eq!(header.name(), Some("test model"));
        assert_eq!(header.vocab_size(), Some(32000));
        assert_eq!(header.context_length(), Some(2048));
        assert_eq!(
            header.get("tokenizer.ggml.scores"),
            Some(&GgufValue::Array {
                item_type: GgufValueType::Float32,
                len: 32000
            })
        );
    }

    #[test]
    fn test_vocab_size_falls_back_to_arch_key() {
        let mut buf = Vec::new();
        put_preamble(&mut buf, 2, 2);
        put_kv_string(&mut buf, "general.architecture", "gpt2");
        put_kv_u32(&mut buf, "gpt2.vocab_size", 50257);

        let header = parse_header(buf.as_slice()).unwrap();
        assert_eq!(header.vocab_size(), Some(50257));
        assert_eq!(header.context_length(), None);
    }

    #[test]
    fn test_bad_magic() {
        let err = parse_header(&b"GGML\x03\x00\x00\x00"[..]).unwrap_err();
        assert!(matches!(err, GgufError::InvalidMagic(_)));
    }

    #[test]
    fn test_unsupported_version() {
        let mut buf = GGUF_MAGIC.to_le_bytes().to_vec();
        buf.extend_from_slice(&1u32.to_le_bytes());
        let err = parse_header(buf.as_slice()).unwrap_err();
        assert!(matches!(err, GgufError::UnsupportedVersion(1)));
    }

    #[test]
    fn test_truncated_header() {
        let full = ModelFile::new("llama", 100, 512).header();
        let err = parse_header(&full[..full.len() / 2]).unwrap_err();
        assert!(matches!(err, GgufError::Io(_)));
    }

    #[test]
    fn test_load_metadata_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = ModelFile::new("llama", 32000, 2048)
            .write_to(dir.path(), "llama.gguf")
            .unwrap();

        let meta = load_metadata(&path).unwrap();
        assert_eq!(meta.architecture, "llama");
        assert_eq!(meta.n_vocab, Some(32000));
        assert_eq!(meta.context_length, Some(2048));
        assert_eq!(meta.quantization, None);
        assert!(meta.file_size > 0);
    }

    #[test]
    fn test_nested_array_within_limit() {
        let header = parse_header(nested_array_header(MAX_ARRAY_DEPTH).as_slice()).unwrap();
        assert_eq!(
            header.get("general.nested"),
            Some(&GgufValue::Array {
                item_type: GgufValueType::Array,
                len: 1
            })
        );
    }

    #[test]
    fn test_deeply_nested_arrays_rejected() {
        for depth in [MAX_ARRAY_DEPTH + 1, 100_000] {
            let err = parse_header(nested_array_header(depth).as_slice()).unwrap_err();
            assert!(matches!(
                err,
                GgufError::NestingTooDeep {
                    limit: MAX_ARRAY_DEPTH
                }
            ));
        }
    }
}
