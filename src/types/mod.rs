//! Shared type definitions
//!
//! This module contains all shared data types used across the control plane.

pub mod config;
pub mod json;
pub mod log;
pub mod metrics;
pub mod model;
