//! Configuration validation for Parley.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{
    ChatConfig, Config, MemoryConfig, NetworkConfig, ObservabilityConfig, RetryConfig,
    UpstreamConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Collapse a list of section errors into one result.
fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.network,
            &self.upstream,
            &self.retry,
            &self.memory,
            &self.chat,
            &self.observability,
        ];

        collect(
            sections
                .iter()
                .filter_map(|section| section.validate().err())
                .collect(),
        )
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "network.port".into(),
            });
        }

        if self.bind.parse::<std::net::IpAddr>().is_err() {
            return Err(invalid("network.bind", format!("'{}' is not an IP address", self.bind)));
        }

        Ok(())
    }
}

impl Validate for UpstreamConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.api_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(invalid(
                "upstream.api_url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(invalid("upstream.api_url", e.to_string())),
        }

        if self.api_key().is_none() {
            errors.push(ValidationError::MissingField {
                field: "upstream.api_key".into(),
            });
        }

        if self.api_version.trim().is_empty() {
            errors.push(invalid("upstream.api_version", "must not be empty"));
        }

        if self.model.trim().is_empty() {
            errors.push(invalid("upstream.model", "must not be empty"));
        }

        if self.max_tokens == 0 {
            errors.push(invalid("upstream.max_tokens", "must be greater than 0"));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                errors.push(invalid("upstream.temperature", "must be between 0.0 and 1.0"));
            }
        }

        if self.timeout_secs == 0 {
            errors.push(invalid("upstream.timeout_secs", "must be greater than 0"));
        }

        collect(errors)
    }
}

impl Validate for RetryConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

impl Validate for MemoryConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.compression_threshold == 0 {
            errors.push(invalid("memory.compression_threshold", "must be at least 1"));
        }

        if self.pairs_per_pass == 0 || self.pairs_per_pass > self.compression_threshold {
            errors.push(invalid(
                "memory.pairs_per_pass",
                format!(
                    "must be between 1 and compression_threshold ({})",
                    self.compression_threshold
                ),
            ));
        }

        if self.max_idle_secs == 0 {
            errors.push(invalid("memory.max_idle_secs", "must be greater than 0"));
        }

        if self.sweep_interval_secs == 0 {
            errors.push(invalid("memory.sweep_interval_secs", "must be greater than 0"));
        }

        collect(errors)
    }
}

impl Validate for ChatConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_message_chars == 0 {
            return Err(invalid("chat.max_message_chars", "must be greater than 0"));
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        const FORMATS: &[&str] = &["json", "pretty"];

        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_level",
                format!("must be one of {}", LEVELS.join(", ")),
            ));
        }

        if !FORMATS.contains(&self.log_format.as_str()) {
            return Err(invalid(
                "observability.log_format",
                format!("must be one of {}", FORMATS.join(", ")),
            ));
        }

        Ok(())
    }
}
