//! # Engine Configuration
//!
//! The engine consumes a flat key/value table of tunables. It is loaded once from a TOML
//! file (kebab-case keys, every key optional) and is never mutated by the engine.
//!
//! ```toml
//! max-line-length = 16384
//! read-buffer-size = 8192
//! default-timeout = 0          # seconds, 0 disables the timeout
//! enable-process-logging = true
//! enable-color = true
//! id-prefix = "§8"
//! process-log-dir = "logs"
//! strict-control-bytes = false
//! ```

use crate::decoder::{ControlBytePolicy, DecoderOptions};
use crate::error::EngineError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_MAX_LINE_LENGTH: usize = 16384;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;
pub const DEFAULT_STATS_CACHE_WINDOW_MS: u64 = 5000;

/// Tunable parameters read by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    /// Bytes a single output line may hold before it is split with a truncation marker.
    pub max_line_length: usize,
    /// Size of each read from the child's output pipe.
    pub read_buffer_size: usize,
    /// Default timeout in seconds when a run does not override it. Zero disables it.
    pub default_timeout: u64,
    pub enable_process_logging: bool,
    /// Translate ANSI SGR colors into style codes. When off, color sequences are dropped.
    pub enable_color: bool,
    /// Style code written before the `[id]` marker of every output line.
    pub id_prefix: String,
    pub process_log_dir: PathBuf,
    /// Terminate a process that writes raw control bytes instead of silently dropping them.
    pub strict_control_bytes: bool,
    pub language: String,
    /// Lifetime of the bulk memory snapshot on platforms without a per-process memory file.
    pub stats_cache_window_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            default_timeout: 0,
            enable_process_logging: true,
            enable_color: true,
            id_prefix: "§8".to_string(),
            process_log_dir: PathBuf::from("logs"),
            strict_control_bytes: false,
            language: "en_US".to_string(),
            stats_cache_window_ms: DEFAULT_STATS_CACHE_WINDOW_MS,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(
                "No engine configuration at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.max_line_length == 0 {
            return Err(EngineError::Config(
                "max-line-length must be positive".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(EngineError::Config(
                "read-buffer-size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the effective timeout for a run. `None` means the run is never timed out.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        let timeout = requested.unwrap_or(Duration::from_secs(self.default_timeout));
        (!timeout.is_zero()).then_some(timeout)
    }

    pub fn control_byte_policy(&self) -> ControlBytePolicy {
        if self.strict_control_bytes {
            ControlBytePolicy::Terminate
        } else {
            ControlBytePolicy::Skip
        }
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            max_line_length: self.max_line_length,
            styling: self.enable_color,
            control_bytes: self.control_byte_policy(),
        }
    }

    pub fn stats_cache_window(&self) -> Duration {
        Duration::from_millis(self.stats_cache_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_line_length, 16384);
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.default_timeout, 0);
        assert!(config.enable_process_logging);
        assert!(config.enable_color);
        assert_eq!(config.control_byte_policy(), ControlBytePolicy::Skip);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let config = EngineConfig::from_toml_str(
            r#"
            max-line-length = 80
            default-timeout = 30
            enable-color = false
            strict-control-bytes = true
            some-unknown-key = "ignored"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_line_length, 80);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.default_timeout, 30);
        assert!(!config.enable_color);
        assert_eq!(config.control_byte_policy(), ControlBytePolicy::Terminate);
    }

    #[test]
    fn zero_line_length_is_rejected() {
        let err = EngineConfig::from_toml_str("max-line-length = 0").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn effective_timeout_treats_zero_as_disabled() {
        let mut config = EngineConfig::default();
        assert_eq!(config.effective_timeout(None), None);
        assert_eq!(
            config.effective_timeout(Some(Duration::from_secs(2))),
            Some(Duration::from_secs(2))
        );

        config.default_timeout = 10;
        assert_eq!(
            config.effective_timeout(None),
            Some(Duration::from_secs(10))
        );
        assert_eq!(config.effective_timeout(Some(Duration::ZERO)), None);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max-line-length = \"lots\"").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
