//! GGUF header decoding
//!
//! Reads the fixed preamble and the metadata key/value section of a GGUF file.
//! Tensor descriptors and weights are never touched.

use crate::types::model::ModelHeader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// "GGUF" read as a little-endian u32
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Size of the fixed preamble in bytes
pub const PREAMBLE_LEN: usize = 24;

/// Upper bound for a single key or string value
const MAX_STRING_LEN: u64 = 16 * 1024 * 1024;

/// Initial capacity of the shared string scratch buffer
const SCRATCH_CAPACITY: usize = 256;

/// Metadata value type tags
mod tag {
    pub const I8: u32 = 1;
    pub const U16: u32 = 2;
    pub const I16: u32 = 3;
    pub const U32_LEGACY: u32 = 0;
    pub const U32: u32 = 4;
    pub const I32: u32 = 5;
    pub const F32: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
    pub const ARRAY: u32 = 9;
    pub const U64: u32 = 10;
    pub const I64: u32 = 11;
    pub const F64: u32 = 12;
}

#[derive(Debug, Error)]
enum HeaderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic 0x{0:08X}")]
    BadMagic(u32),
    #[error("unknown metadata type tag {0}")]
    UnknownType(u32),
    #[error("declared length {0} exceeds limit")]
    TooLarge(u64),
}

/// Metadata values the header exposes; everything else is skipped
#[derive(Debug, Clone)]
enum MetaValue {
    U32(u32),
    Str(String),
}

struct HeaderReader<R> {
    reader: R,
    scratch: Vec<u8>,
}

impl<R: Read> HeaderReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            scratch: Vec::with_capacity(SCRATCH_CAPACITY),
        }
    }

    fn read_u32(&mut self) -> Result<u32, HeaderError> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64, HeaderError> {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a length-prefixed string into the scratch buffer.
    ///
    /// The buffer only grows when `len` exceeds what it already holds.
    fn read_string(&mut self) -> Result<String, HeaderError> {
        let len = self.read_u64()?;
        if len > MAX_STRING_LEN {
            return Err(HeaderError::TooLarge(len));
        }
        let len = len as usize;
        if len > self.scratch.len() {
            self.scratch.resize(len, 0);
        }
        self.reader.read_exact(&mut self.scratch[..len])?;

        let bytes = &self.scratch[..len];
        let bytes = bytes.strip_suffix(b"\0").unwrap_or(bytes);
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn skip(&mut self, len: u64) -> Result<(), HeaderError> {
        let copied = io::copy(&mut (&mut self.reader).take(len), &mut io::sink())?;
        if copied < len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }

    fn skip_value(&mut self, type_tag: u32) -> Result<(), HeaderError> {
        match type_tag {
            tag::STRING => {
                let len = self.read_u64()?;
                self.skip(len)
            }
            tag::ARRAY => {
                let element_type = self.read_u32()?;
                let count = self.read_u64()?;
                match fixed_width(element_type) {
                    Some(width) => {
                        let total = count
                            .checked_mul(width)
                            .ok_or(HeaderError::TooLarge(count))?;
                        self.skip(total)
                    }
                    None => {
                        for _ in 0..count {
                            self.skip_value(element_type)?;
                        }
                        Ok(())
                    }
                }
            }
            other => match fixed_width(other) {
                Some(width) => self.skip(width),
                None => Err(HeaderError::UnknownType(other)),
            },
        }
    }

    fn read_value(&mut self, type_tag: u32) -> Result<Option<MetaValue>, HeaderError> {
        match type_tag {
            tag::U32_LEGACY | tag::U32 => Ok(Some(MetaValue::U32(self.read_u32()?))),
            tag::STRING => Ok(Some(MetaValue::Str(self.read_string()?))),
            other => {
                self.skip_value(other)?;
                Ok(None)
            }
        }
    }

    fn read_header(mut self) -> Result<ModelHeader, HeaderError> {
        let magic = self.read_u32()?;
        if magic != GGUF_MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }
        let version = self.read_u32()?;
        let tensor_count = self.read_u64()?;
        let metadata_count = self.read_u64()?;

        let mut metadata = HashMap::new();
        for _ in 0..metadata_count {
            let key = self.read_string()?;
            let type_tag = self.read_u32()?;
            if let Some(value) = self.read_value(type_tag)? {
                metadata.insert(key, value);
            }
        }

        Ok(build_header(version, tensor_count, &metadata))
    }
}

/// Byte width of fixed-size value types
fn fixed_width(type_tag: u32) -> Option<u64> {
    match type_tag {
        tag::I8 | tag::BOOL => Some(1),
        tag::U16 | tag::I16 => Some(2),
        tag::U32_LEGACY | tag::U32 | tag::I32 | tag::F32 => Some(4),
        tag::U64 | tag::I64 | tag::F64 => Some(8),
        _ => None,
    }
}

fn build_header(version: u32, tensor_count: u64, metadata: &HashMap<String, MetaValue>) -> ModelHeader {
    let string = |key: &str| match metadata.get(key) {
        Some(MetaValue::Str(s)) => s.clone(),
        _ => String::new(),
    };
    let number = |key: &str| match metadata.get(key) {
        Some(MetaValue::U32(v)) => *v,
        _ => 0,
    };

    let architecture = string("general.architecture");
    let arch_number = |suffix: &str| number(&format!("{}.{}", architecture, suffix));

    ModelHeader {
        version,
        tensor_count,
        context_length: arch_number("context_length"),
        embedding_length: arch_number("embedding_length"),
        block_count: arch_number("block_count"),
        head_count: arch_number("attention.head_count"),
        head_count_kv: arch_number("attention.head_count_kv"),
        feed_forward_length: arch_number("feed_forward_length"),
        file_type: number("general.file_type"),
        size_label: string("general.size_label"),
        architecture,
    }
}

/// Parse the header of the GGUF file at `path`.
///
/// Returns `None` for unreadable, truncated or non-GGUF files.
pub fn parse_header(path: impl AsRef<Path>) -> Option<ModelHeader> {
    let path = path.as_ref();
    let result = File::open(path)
        .map_err(HeaderError::from)
        .and_then(|file| HeaderReader::new(BufReader::new(file)).read_header());

    match result {
        Ok(header) => Some(header),
        Err(e) => {
            tracing::debug!("Failed to parse GGUF header {}: {}", path.display(), e);
            None
        }
    }
}

/// Parse a GGUF header held in memory
pub fn parse_header_bytes(bytes: &[u8]) -> Option<ModelHeader> {
    match HeaderReader::new(bytes).read_header() {
        Ok(header) => Some(header),
        Err(e) => {
            tracing::debug!("Failed to parse in-memory GGUF header: {}", e);
            None
        }
    }
}

/// Check only the magic number of the file at `path`
pub fn has_gguf_magic(path: impl AsRef<Path>) -> bool {
    let mut buf = [0u8; 4];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut buf))
        .map(|_| u32::from_le_bytes(buf) == GGUF_MAGIC)
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds GGUF headers for tests
    pub(crate) struct HeaderBuilder {
        version: u32,
        tensor_count: u64,
        entries: Vec<Vec<u8>>,
    }

    impl HeaderBuilder {
        pub(crate) fn new() -> Self {
            Self {
                version: 3,
                tensor_count: 0,
                entries: Vec::new(),
            }
        }

        fn key(key: &str) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&((key.len() + 1) as u64).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.push(0);
            out
        }

        pub(crate) fn u32(mut self, key: &str, value: u32) -> Self {
            let mut entry = Self::key(key);
            entry.extend_from_slice(&0u32.to_le_bytes());
            entry.extend_from_slice(&value.to_le_bytes());
            self.entries.push(entry);
            self
        }

        pub(crate) fn string(mut self, key: &str, value: &str) -> Self {
            let mut entry = Self::key(key);
            entry.extend_from_slice(&8u32.to_le_bytes());
            entry.extend_from_slice(&((value.len() + 1) as u64).to_le_bytes());
            entry.extend_from_slice(value.as_bytes());
            entry.push(0);
            self.entries.push(entry);
            self
        }

        pub(crate) fn raw(mut self, key: &str, type_tag: u32, payload: &[u8]) -> Self {
            let mut entry = Self::key(key);
            entry.extend_from_slice(&type_tag.to_le_bytes());
            entry.extend_from_slice(payload);
            self.entries.push(entry);
            self
        }

        pub(crate) fn build(&self) -> Vec<u8> {
            let mut out = Vec::new();
            out.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
            out.extend_from_slice(&self.version.to_le_bytes());
            out.extend_from_slice(&self.tensor_count.to_le_bytes());
            out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
            for entry in &self.entries {
                out.extend_from_slice(entry);
            }
            out
        }
    }

    fn llama_header() -> HeaderBuilder {
        HeaderBuilder::new()
            .string("general.architecture", "llama")
            .u32("general.file_type", 15)
            .string("general.size_label", "7B")
            .u32("llama.context_length", 4096)
            .u32("llama.embedding_length", 4096)
            .u32("llama.block_count", 32)
            .u32("llama.attention.head_count", 32)
            .u32("llama.attention.head_count_kv", 8)
            .u32("llama.feed_forward_length", 11008)
    }

    #[test]
    fn test_parse_full_header() {
        let header = parse_header_bytes(&llama_header().build()).expect("header should parse");
        assert_eq!(header.architecture, "llama");
        assert_eq!(header.version, 3);
        assert_eq!(header.context_length, 4096);
        assert_eq!(header.embedding_length, 4096);
        assert_eq!(header.block_count, 32);
        assert_eq!(header.head_count, 32);
        assert_eq!(header.head_count_kv, 8);
        assert_eq!(header.feed_forward_length, 11008);
        assert_eq!(header.file_type, 15);
        assert_eq!(header.size_label, "7B");
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let bytes = HeaderBuilder::new()
            .string("general.architecture", "qwen2")
            .u32("qwen2.block_count", 28)
            .build();
        let header = parse_header_bytes(&bytes).expect("header should parse");
        assert_eq!(header.block_count, 28);
        assert_eq!(header.context_length, 0);
        assert_eq!(header.head_count_kv, 0);
        assert_eq!(header.size_label, "");
    }

    #[test]
    fn test_keys_of_other_architectures_are_ignored() {
        let bytes = HeaderBuilder::new()
            .string("general.architecture", "llama")
            .u32("qwen2.context_length", 32768)
            .build();
        let header = parse_header_bytes(&bytes).expect("header should parse");
        assert_eq!(header.context_length, 0);
    }

    #[test]
    fn test_present_zero_file_type() {
        let bytes = HeaderBuilder::new().u32("general.file_type", 0).build();
        let header = parse_header_bytes(&bytes).expect("header should parse");
        assert_eq!(header.file_type, 0);
        assert_eq!(header.architecture, "");
    }

    #[test]
    fn test_other_types_are_skipped() {
        let mut array = Vec::new();
        array.extend_from_slice(&8u32.to_le_bytes());
        array.extend_from_slice(&2u64.to_le_bytes());
        for token in ["<s>", "</s>"] {
            array.extend_from_slice(&(token.len() as u64).to_le_bytes());
            array.extend_from_slice(token.as_bytes());
        }

        let bytes = HeaderBuilder::new()
            .string("general.architecture", "llama")
            .raw("general.alignment_f32", 6, &1.5f32.to_le_bytes())
            .raw("tokenizer.ggml.tokens", 9, &array)
            .raw("general.flag", 7, &[1])
            .raw("general.big", 10, &7u64.to_le_bytes())
            .u32("llama.block_count", 40)
            .build();
        let header = parse_header_bytes(&bytes).expect("header should parse");
        assert_eq!(header.block_count, 40);
    }

    #[test]
    fn test_long_strings_grow_scratch_buffer() {
        let long_label = "x".repeat(SCRATCH_CAPACITY * 4);
        let bytes = HeaderBuilder::new()
            .string("general.size_label", "7B")
            .string("general.name", &long_label)
            .string("general.architecture", "llama")
            .build();
        let header = parse_header_bytes(&bytes).expect("header should parse");
        assert_eq!(header.size_label, "7B");
        assert_eq!(header.architecture, "llama");
    }

    #[test]
    fn test_bad_magic_returns_none() {
        let mut bytes = llama_header().build();
        bytes[0] = b'X';
        assert!(parse_header_bytes(&bytes).is_none());
    }

    #[test]
    fn test_truncated_metadata_returns_none() {
        let bytes = llama_header().build();
        assert!(parse_header_bytes(&bytes[..bytes.len() - 3]).is_none());
        assert!(parse_header_bytes(&bytes[..PREAMBLE_LEN - 1]).is_none());
    }

    #[test]
    fn test_unknown_type_tag_returns_none() {
        let bytes = HeaderBuilder::new().raw("general.weird", 99, &[0, 0, 0, 0]).build();
        assert!(parse_header_bytes(&bytes).is_none());
    }

    #[test]
    fn test_nonexistent_path_returns_none() {
        assert!(parse_header("/definitely/not/a/model.gguf").is_none());
    }

    #[test]
    fn test_parse_header_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.gguf");
        std::fs::write(&path, llama_header().build()).expect("write");

        let header = parse_header(&path).expect("header should parse");
        assert_eq!(header.architecture, "llama");
        assert!(has_gguf_magic(&path));
    }

    #[test]
    fn test_has_gguf_magic_rejects_other_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello world").expect("write");
        assert!(!has_gguf_magic(&path));
    }
}
