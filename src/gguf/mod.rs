//! GGUF model file inspection
//!
//! Header decoding plus filename heuristics for files whose header is unreadable.

pub mod filename;
pub mod parser;

pub use filename::{
    extract_architecture, extract_context_length, extract_params, extract_quantization,
    hints_from_file_name,
};
pub use parser::{has_gguf_magic, parse_header, parse_header_bytes, GGUF_MAGIC};
