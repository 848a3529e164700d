//! Parley Common - Shared types, utilities, and configuration for Parley.
//!
//! This crate provides:
//! - Configuration types and layered loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup and request tracing helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    ChatConfig, Config, MemoryConfig, NetworkConfig, ObservabilityConfig, RetryConfig,
    UpstreamConfig,
};
pub use error::Error;
pub use validation::{Validate, ValidationError, ValidationResult};
