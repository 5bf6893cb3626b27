//! System utilities
//!
//! Clock, GPU registry and host resource sampling.

pub mod clock;
pub mod gpu;
pub mod resources;

pub use clock::{Clock, SystemClock};
pub use gpu::GpuRegistry;
