//! Configuration management for Parley.
//!
//! Configuration lives in `~/.parley/config.json`, with credentials optionally split
//! out into `~/.parley/secrets.json` (see [`crate::config_loader`]).
//!
//! # Configuration Priority
//!
//! 1. Environment variables (PARLEY_* prefix, plus the Anthropic ones below)
//! 2. `secrets.json` values
//! 3. `config.json` values
//! 4. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PARLEY_CONFIG_DIR` → configuration directory
//! - `PARLEY_BIND_ADDRESS` → network.bind
//! - `PARLEY_PORT` → network.port
//! - `ANTHROPIC_API_KEY` → upstream.api_key
//! - `ANTHROPIC_API_URL` → upstream.api_url
//! - `PARLEY_MODEL` → upstream.model
//! - `PARLEY_MAX_TOKENS` → upstream.max_tokens
//! - `PARLEY_SYSTEM_PROMPT` → upstream.system_prompt
//! - `PARLEY_COMPRESSION_THRESHOLD` → memory.compression_threshold
//! - `PARLEY_PAIRS_PER_PASS` → memory.pairs_per_pass
//! - `PARLEY_SESSION_MAX_IDLE_SECS` → memory.max_idle_secs
//! - `PARLEY_LOG_LEVEL` → observability.log_level
//! - `PARLEY_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PARLEY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |dirs| dirs.home_dir().join(".parley"),
    )
}

// ============================================================================
// Network Configuration
// ============================================================================

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address.
    /// Default: "127.0.0.1" (local only). Set to "0.0.0.0" for remote access.
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

// ============================================================================
// Upstream (LLM endpoint) Configuration
// ============================================================================

/// Remote model endpoint configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Full messages endpoint URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key sent in the `x-api-key` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Protocol version sent in the `anthropic-version` header
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Default model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Token budget for every request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Default system prompt (overridable per turn)
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<String>,

    /// Sampling temperature (0.0 - 1.0), omitted from requests when unset
    #[serde(default)]
    pub temperature: Option<f64>,

    /// Network timeout per HTTP attempt
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    /// Per-attempt HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured API key, ignoring blank values.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            api_version: default_api_version(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            temperature: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

// Hand-written so the key never lands in logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_version", &self.api_version)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Retry behaviour for transient upstream overload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay; attempt `n` waits `base * n²`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

// ============================================================================
// Conversation Memory Configuration
// ============================================================================

/// Session memory and compression configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Compress once a session holds this many complete user/assistant pairs
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    /// Pairs folded into one summary per compression pass
    #[serde(default = "default_pairs_per_pass")]
    pub pairs_per_pass: usize,

    /// Sessions idle longer than this are evicted
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,

    /// How often the eviction sweep runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Surface compression failures in the turn result instead of only logging them
    #[serde(default)]
    pub report_compression_failures: bool,
}

impl MemoryConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            compression_threshold: default_compression_threshold(),
            pairs_per_pass: default_pairs_per_pass(),
            max_idle_secs: default_max_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            report_compression_failures: false,
        }
    }
}

/// Per-turn input limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Longest accepted user message, in characters
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets held at `warn`.
    ///
    /// Built-in noisy modules (hyper, reqwest, h2, rustls, tokio_util) are
    /// always filtered; this list allows adding custom modules.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// HTTP listener
    #[serde(default)]
    pub network: NetworkConfig,

    /// Remote model endpoint
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Upstream retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session memory and compression
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Chat turn limits
    #[serde(default)]
    pub chat: ChatConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default directory.
    ///
    /// Missing files fall back to defaults; `secrets.json` is merged over `config.json`.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&config_dir())
    }

    /// Load layered configuration from a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let value = crate::config_loader::load_layered_config(dir)?;
        if value.as_object().is_some_and(|o| o.is_empty()) {
            tracing::info!(dir = %dir.display(), "Config files not found, using defaults");
        }

        serde_json::from_value(value)
            .with_context(|| format!("Failed to parse config from {}", dir.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("PARLEY_BIND_ADDRESS") {
            self.network.bind = bind;
        }
        if let Some(port) = parse_var(&lookup, "PARLEY_PORT") {
            self.network.port = port;
        }

        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.upstream.api_key = Some(key);
        }
        if let Some(url) = lookup("ANTHROPIC_API_URL") {
            self.upstream.api_url = url;
        }
        if let Some(model) = lookup("PARLEY_MODEL") {
            self.upstream.model = model;
        }
        if let Some(max_tokens) = parse_var(&lookup, "PARLEY_MAX_TOKENS") {
            self.upstream.max_tokens = max_tokens;
        }
        if let Some(prompt) = lookup("PARLEY_SYSTEM_PROMPT") {
            self.upstream.system_prompt = Some(prompt);
        }

        if let Some(threshold) = parse_var(&lookup, "PARLEY_COMPRESSION_THRESHOLD") {
            self.memory.compression_threshold = threshold;
        }
        if let Some(pairs) = parse_var(&lookup, "PARLEY_PAIRS_PER_PASS") {
            self.memory.pairs_per_pass = pairs;
        }
        if let Some(secs) = parse_var(&lookup, "PARLEY_SESSION_MAX_IDLE_SECS") {
            self.memory.max_idle_secs = secs;
        }

        if let Some(level) = lookup("PARLEY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("PARLEY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "Ignoring unparseable override");
            None
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".into()
}

fn default_api_version() -> String {
    "2023-06-01".into()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_system_prompt() -> Option<String> {
    Some(
        "You are a helpful assistant. Reply with a single JSON object of the form \
         {\"answer\": \"<your reply>\"} and nothing else."
            .into(),
    )
}

fn default_upstream_timeout() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_compression_threshold() -> usize {
    3
}

fn default_pairs_per_pass() -> usize {
    3
}

fn default_max_idle_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_max_message_chars() -> usize {
    32_000
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind, "127.0.0.1");
        assert_eq!(config.network.port, 8080);
        assert_eq!(config.upstream.api_url, "https://api.anthropic.com/v1/messages");
        assert_eq!(config.upstream.api_version, "2023-06-01");
        assert_eq!(config.upstream.timeout_secs, 120);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.memory.compression_threshold, 3);
        assert_eq!(config.memory.pairs_per_pass, 3);
        assert_eq!(config.memory.max_idle(), Duration::from_secs(86_400));
        assert!(!config.memory.report_compression_failures);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "upstream": { "model": "claude-3-haiku-20240307", "max_tokens": 1024 },
            "memory": { "compression_threshold": 5 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.upstream.model, "claude-3-haiku-20240307");
        assert_eq!(config.upstream.max_tokens, 1024);
        assert_eq!(config.upstream.api_version, "2023-06-01");
        assert_eq!(config.memory.compression_threshold, 5);
        assert_eq!(config.memory.pairs_per_pass, 3);
        assert_eq!(config.network.port, 8080);
    }

    #[test]
    fn test_observability_aliases() {
        let json = r#"{ "observability": { "level": "debug", "format": "json" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let upstream = UpstreamConfig {
            api_key: Some("sk-ant-secret-value".into()),
            ..Default::default()
        };
        let rendered = format!("{upstream:?}");
        assert!(!rendered.contains("sk-ant-secret-value"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let upstream = UpstreamConfig {
            api_key: Some("   ".into()),
            ..Default::default()
        };
        assert!(upstream.api_key().is_none());
    }

    #[test]
    fn test_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PARLEY_PORT", "9090"),
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("PARLEY_MODEL", "claude-3-haiku-20240307"),
            ("PARLEY_COMPRESSION_THRESHOLD", "4"),
            ("PARLEY_LOG_FORMAT", "json"),
        ]);
        let mut config = Config::default();
        config.apply_overrides_with(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.network.port, 9090);
        assert_eq!(config.upstream.api_key(), Some("sk-test"));
        assert_eq!(config.upstream.model, "claude-3-haiku-20240307");
        assert_eq!(config.memory.compression_threshold, 4);
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides_with(|k| (k == "PARLEY_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.network.port, 8080);
    }

    #[test]
    fn test_load_from_dir_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{ "network": { "port": 7000 } }"#,
        )
        .unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.network.port, 7000);
        assert_eq!(config.network.bind, "127.0.0.1");
    }

    #[test]
    fn test_load_from_empty_dir_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.network.port, 8080);
        assert!(config.upstream.api_key.is_none());
    }
}
