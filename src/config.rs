//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MBOXIMPORT_CONFIG` (environment variable)
//! 2. `~/.config/mboximport/config.toml` (Linux/macOS)
//!    `%APPDATA%\mboximport\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! CLI flags override individual fields after loading.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Retry/backoff policy for remote calls.
    pub retry: RetryConfig,
    /// Message sanitizing applied before upload.
    pub import: ImportConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for the log file.
    pub log_dir: Option<PathBuf>,
}

/// Retry/backoff policy for transient remote failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of remote calls per message (first try included).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for a single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Total wait budget across all retries of one message, in milliseconds.
    pub max_elapsed_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Jitter factor in `[0.0, 1.0]`; each delay is scaled by a random
    /// factor in `[1 - jitter, 1 + jitter]`. Zero disables jitter.
    pub jitter: f64,
}

/// Message sanitizing defaults (overridable per run from the CLI).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Wrap bare `Message-ID` values in angle brackets before upload.
    pub fix_msgid: bool,
    /// Rewrite the bogus `text/quoted-printable` Content-Type to `text/plain`.
    pub replace_quoted_printable: bool,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Read buffer size in bytes (default: 1048576 = 1 MB).
    pub read_buffer_size: usize,
    /// Maximum message size in bytes (default: 268435456 = 256 MB).
    pub max_message_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_elapsed_ms: 300_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            fix_msgid: true,
            replace_quoted_printable: true,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024 * 1024,       // 1 MB
            max_message_size: 256 * 1024 * 1024, // 256 MB
        }
    }
}

impl RetryConfig {
    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Cap for a single delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Total wait budget for one message.
    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("MBOXIMPORT_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("mboximport").join("config.toml"))
}

/// Return the directory for the log file.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mboximport")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "info");
        assert_eq!(cfg.retry.max_attempts, 10);
        assert_eq!(cfg.retry.multiplier, 2.0);
        assert!(cfg.import.fix_msgid);
        assert!(cfg.import.replace_quoted_printable);
        assert_eq!(cfg.performance.max_message_size, 256 * 1024 * 1024);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retry.max_attempts, cfg.retry.max_attempts);
        assert_eq!(parsed.general.log_level, cfg.general.log_level);
        assert_eq!(
            parsed.performance.read_buffer_size,
            cfg.performance.read_buffer_size
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[retry]
max_attempts = 3
initial_delay_ms = 50

[import]
fix_msgid = false
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.initial_delay_ms, 50);
        assert!(!cfg.import.fix_msgid);
        // Other fields use defaults
        assert_eq!(cfg.retry.max_delay_ms, 60_000);
        assert!(cfg.import.replace_quoted_printable);
        assert_eq!(cfg.general.log_level, "info");
    }

    #[test]
    fn test_retry_durations() {
        let retry = RetryConfig::default();
        assert_eq!(retry.initial_delay(), Duration::from_secs(1));
        assert_eq!(retry.max_delay(), Duration::from_secs(60));
        assert_eq!(retry.max_elapsed(), Duration::from_secs(300));
    }
}
