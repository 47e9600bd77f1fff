//! Configuration loading and typed config structures for tickhook.
//!
//! The canonical configuration lives in `tickhook-config.yaml` at the
//! workspace root. It carries the signature table for one host version,
//! the tick hook's site parameters, the simulated host's settings, and
//! logging options.
//!
//! The secondary-hook offset is host-version specific: another
//! instrumentation layer already redirects control flow a few bytes past
//! the tick routine's entry, and the AFTER redirect has to chain behind it.
//! It therefore lives next to the signature table instead of in code.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

/// Signature name under which the tick routine is looked up by default.
pub const DEFAULT_TICK_SIGNATURE: &str = "on_tick";

/// Bytes from the (jump-followed) tick routine entry to the secondary
/// redirect site for the supported host version.
pub const DEFAULT_SECONDARY_OFFSET: u64 = 23;

/// Environment variable overriding `logging.level`.
pub const ENV_LOG_LEVEL: &str = "TICKHOOK_LOG_LEVEL";

/// Environment variable overriding `tick.secondary_offset`.
pub const ENV_SECONDARY_OFFSET: &str = "TICKHOOK_SECONDARY_OFFSET";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {variable}")]
    InvalidOverride {
        /// The environment variable name.
        variable: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level tickhook configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TickHookConfig {
    /// Signature table for the supported host version.
    #[serde(default)]
    pub signatures: SignatureSetConfig,

    /// Tick hook site parameters.
    #[serde(default)]
    pub tick: TickSiteConfig,

    /// Simulated host settings.
    #[serde(default)]
    pub host: HostConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TickHookConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `TICKHOOK_LOG_LEVEL` overrides `logging.level`
    /// - `TICKHOOK_SECONDARY_OFFSET` overrides `tick.secondary_offset`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] / [`ConfigError::Invalid`] if the
    /// result is unusable.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, applying environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::parse_without_env(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without consulting the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse_without_env(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if an override is present
    /// but malformed.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if an override is present
    /// but malformed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(raw) = lookup(ENV_SECONDARY_OFFSET) {
            self.tick.secondary_offset =
                parse_offset(&raw).ok_or(ConfigError::InvalidOverride {
                    variable: ENV_SECONDARY_OFFSET,
                    value: raw,
                })?;
        }
        Ok(())
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the tick signature name is empty
    /// or the host would never tick at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.signature.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "tick.signature must name a signature".to_owned(),
            });
        }
        if self.host.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "host.tick_interval_ms must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Accept decimal or `0x`-prefixed hexadecimal offsets.
fn parse_offset(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => trimmed.parse().ok(),
    }
}

/// Named byte patterns for one host version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignatureSetConfig {
    /// Host build the patterns were taken from.
    #[serde(default = "default_host_version")]
    pub host_version: String,

    /// Signature name -> pattern.
    #[serde(default = "default_signature_entries")]
    pub entries: BTreeMap<String, SignatureConfig>,
}

impl Default for SignatureSetConfig {
    fn default() -> Self {
        Self {
            host_version: default_host_version(),
            entries: default_signature_entries(),
        }
    }
}

/// A single named byte pattern.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignatureConfig {
    /// Space-separated hex bytes, `??` for wildcards.
    pub pattern: String,

    /// Signed displacement applied to the match address.
    #[serde(default)]
    pub offset: i64,
}

/// Where and how the tick hook attaches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickSiteConfig {
    /// Signature name of the tick routine.
    #[serde(default = "default_tick_signature")]
    pub signature: String,

    /// Bytes from the tick routine entry to the secondary redirect site.
    #[serde(default = "default_secondary_offset")]
    pub secondary_offset: u64,

    /// Follow a relative jump planted at the entry before applying
    /// `secondary_offset`.
    #[serde(default = "default_true")]
    pub follow_jump: bool,
}

impl Default for TickSiteConfig {
    fn default() -> Self {
        Self {
            signature: default_tick_signature(),
            secondary_offset: DEFAULT_SECONDARY_OFFSET,
            follow_jump: true,
        }
    }
}

/// Simulated host settings used by the `tickhook-host` driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostConfig {
    /// Load address of the synthetic code image.
    #[serde(default = "default_image_base")]
    pub image_base: u64,

    /// Offset of the tick routine inside the image.
    #[serde(default = "default_routine_offset")]
    pub routine_offset: u64,

    /// Real-time milliseconds between host ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Number of ticks to run before exiting.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            image_base: default_image_base(),
            routine_offset: default_routine_offset(),
            tick_interval_ms: default_tick_interval_ms(),
            max_ticks: default_max_ticks(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error) used when
    /// `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_host_version() -> String {
    "simhost-1.0".to_owned()
}

fn default_signature_entries() -> BTreeMap<String, SignatureConfig> {
    let mut entries = BTreeMap::new();
    entries.insert(
        DEFAULT_TICK_SIGNATURE.to_owned(),
        SignatureConfig {
            pattern: "55 8B EC 53 56 57 A1 ?? ?? ?? ?? 40 A3 ?? ?? ?? ?? E8".to_owned(),
            offset: 0,
        },
    );
    entries
}

fn default_tick_signature() -> String {
    DEFAULT_TICK_SIGNATURE.to_owned()
}

const fn default_secondary_offset() -> u64 {
    DEFAULT_SECONDARY_OFFSET
}

const fn default_true() -> bool {
    true
}

const fn default_image_base() -> u64 {
    0x0040_0000
}

const fn default_routine_offset() -> u64 {
    0x1A0
}

const fn default_tick_interval_ms() -> u64 {
    33
}

const fn default_max_ticks() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_owned()
}
