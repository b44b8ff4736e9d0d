//! Replay Configuration
//!
//! Loads replay settings from `~/.config/chat-stream/streaming.toml` and
//! resolves them into the [`SessionConfig`] the core takes.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`CHAT_STREAM_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/chat-stream/streaming.toml` (typically
//!   `~/.config/chat-stream/streaming.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [tracker]
//! warn_tracked_responses = 64
//!
//! [session]
//! initial_generation = 0
//! hide_stop_on_reject = true
//!
//! [replay]
//! pretty = false
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chat_stream_core::SessionConfig;

/// Warn threshold environment variable
pub const ENV_WARN_TRACKED: &str = "CHAT_STREAM_WARN_TRACKED";
/// Initial generation environment variable
pub const ENV_INITIAL_GENERATION: &str = "CHAT_STREAM_INITIAL_GENERATION";
/// Hide-stop-on-reject environment variable
pub const ENV_HIDE_STOP_ON_REJECT: &str = "CHAT_STREAM_HIDE_STOP_ON_REJECT";
/// Pretty output environment variable
pub const ENV_PRETTY: &str = "CHAT_STREAM_PRETTY";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Tracker section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerToml {
    /// Warn when more responses than this are tracked at once
    pub warn_tracked_responses: Option<usize>,
}

/// Session section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Generation the request queue starts at
    pub initial_generation: Option<u64>,

    /// Hide the stop-streaming button when a stale chunk is dropped
    pub hide_stop_on_reject: Option<bool>,
}

/// Replay section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayToml {
    /// Pretty-print the final store state
    pub pretty: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Tracker configuration section
    pub tracker: TrackerToml,

    /// Session configuration section
    pub session: SessionToml,

    /// Replay configuration section
    pub replay: ReplayToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved streaming configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug)]
pub struct StreamingConfigFile {
    /// Settings handed to each [`chat_stream_core::StreamSession`]
    pub session: SessionConfig,

    /// Pretty-print replay output
    pub pretty: bool,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for StreamingConfigFile {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            pretty: false,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl StreamingConfigFile {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Session settings
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        self.session.clone()
    }

    /// Check values that would make a session misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a zero warn threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.warn_tracked_responses == 0 {
            return Err(ConfigError::ValidationError(
                "tracker.warn_tracked_responses must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-stream/streaming.toml` or
/// `~/.config/chat-stream/streaming.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-stream").join("streaming.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// merged values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<StreamingConfigFile, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the merged values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<StreamingConfigFile, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `lookup` in place of the process environment
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(
    path: Option<PathBuf>,
    lookup: F,
) -> Result<StreamingConfigFile, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = StreamingConfigFile::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: StreamingToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup);
    config.validate()?;

    Ok(config)
}

fn apply_toml_config(config: &mut StreamingConfigFile, toml: &StreamingToml) {
    if let Some(threshold) = toml.tracker.warn_tracked_responses {
        config.session.warn_tracked_responses = threshold;
    }
    if let Some(generation) = toml.session.initial_generation {
        config.session.initial_generation = generation;
    }
    if let Some(hide) = toml.session.hide_stop_on_reject {
        config.session.hide_stop_on_reject = hide;
    }
    if let Some(pretty) = toml.replay.pretty {
        config.pretty = pretty;
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

fn apply_env_config<F>(config: &mut StreamingConfigFile, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(threshold) = lookup(ENV_WARN_TRACKED) {
        match threshold.parse::<usize>() {
            Ok(n) => {
                config.session.warn_tracked_responses = n;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(var = ENV_WARN_TRACKED, value = %threshold, "Ignoring unparsable value"),
        }
    }
    if let Some(generation) = lookup(ENV_INITIAL_GENERATION) {
        match generation.parse::<u64>() {
            Ok(n) => {
                config.session.initial_generation = n;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(var = ENV_INITIAL_GENERATION, value = %generation, "Ignoring unparsable value"),
        }
    }
    if let Some(hide) = lookup(ENV_HIDE_STOP_ON_REJECT) {
        config.session.hide_stop_on_reject = parse_flag(&hide);
        config.source = ConfigSource::Env;
    }
    if let Some(pretty) = lookup(ENV_PRETTY) {
        config.pretty = parse_flag(&pretty);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Warn threshold override
    pub warn_tracked_responses: Option<usize>,

    /// Initial generation override
    pub initial_generation: Option<u64>,

    /// Hide-stop-on-reject override
    pub hide_stop_on_reject: Option<bool>,

    /// Pretty output override
    pub pretty: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set warn threshold override
    #[must_use]
    pub fn with_warn_tracked_responses(mut self, threshold: usize) -> Self {
        self.warn_tracked_responses = Some(threshold);
        self
    }

    /// Set initial generation override
    #[must_use]
    pub fn with_initial_generation(mut self, generation: u64) -> Self {
        self.initial_generation = Some(generation);
        self
    }

    /// Set hide-stop-on-reject override
    #[must_use]
    pub fn with_hide_stop_on_reject(mut self, hide: bool) -> Self {
        self.hide_stop_on_reject = Some(hide);
        self
    }

    /// Set pretty output override
    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = Some(pretty);
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the result is invalid.
    pub fn apply(&self, config: &mut StreamingConfigFile) -> Result<(), ConfigError> {
        if self.warn_tracked_responses.is_some()
            || self.initial_generation.is_some()
            || self.hide_stop_on_reject.is_some()
            || self.pretty.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(threshold) = self.warn_tracked_responses {
            config.session.warn_tracked_responses = threshold;
        }
        if let Some(generation) = self.initial_generation {
            config.session.initial_generation = generation;
        }
        if let Some(hide) = self.hide_stop_on_reject {
            config.session.hide_stop_on_reject = hide;
        }
        if let Some(pretty) = self.pretty {
            config.pretty = pretty;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
