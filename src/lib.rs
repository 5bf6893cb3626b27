//! llamadash library
//!
//! Control plane for locally running llama-server backends: model discovery,
//! GGUF header parsing, metrics scraping and the dashboard protocol.

pub mod app;
pub mod discovery;
pub mod gguf;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod system;
pub mod types;
