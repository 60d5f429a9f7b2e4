//! Governance configuration
//!
//! Read once at process start. Describes the listener, logging, the rate
//! limit quotas, the per-dependency breaker settings, the retry policy and
//! the generation backends.
//!
//! ## Loading Strategy
//! 1. `TALEWEAVER_CONFIG` names the file, if set
//! 2. Otherwise the standard locations are probed (see [`probe_config_paths`])
//! 3. With no file at all, built-in defaults are used
//! 4. `TALEWEAVER_BIND` and `TALEWEAVER_LOG_FORMAT` override file values
//!
//! Format is detected by extension (`.toml` or `.json`).
//!
//! ## Example
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [rate_limits.image_generation]
//! max_requests = 10
//! window_seconds = 60
//!
//! [dependencies.image-gen]
//! failure_threshold = 5
//! reset_timeout_seconds = 30
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 100
//! max_delay_ms = 10000
//! jitter = true
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taleweaver_common::resilience::{
    CircuitBreakerConfig, LimitSpec, RateLimiterConfig, RetryPolicy, DEFAULT_LIMIT_TYPE,
    IMAGE_GENERATION_LIMIT,
};
use taleweaver_domain::constants::{DEPENDENCY_IMAGE_GEN, DEPENDENCY_STORY_GEN};
use thiserror::Error;

/// Names the config file explicitly
pub const ENV_CONFIG_PATH: &str = "TALEWEAVER_CONFIG";
/// Overrides `server.bind`
pub const ENV_BIND: &str = "TALEWEAVER_BIND";
/// Overrides `logging.format`
pub const ENV_LOG_FORMAT: &str = "TALEWEAVER_LOG_FORMAT";

const CONFIG_FILE_NAMES: [&str; 4] =
    ["taleweaver.toml", "config.toml", "taleweaver.json", "config.json"];

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML format: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON format: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported config format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Invalid {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Quota per limit type; `default` and `image_generation` are always present
    #[serde(default)]
    pub rate_limits: BTreeMap<String, LimitSpec>,
    /// Breaker settings per dependency; `image-gen` and `story-gen` are always present
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyConfig>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub backends: BackendsConfig,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        let mut config = Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            rate_limits: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            retry: RetrySettings::default(),
            backends: BackendsConfig::default(),
        };
        config.fill_builtin_entries();
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(ConfigError::invalid(
                "logging.format",
                format!("expected \"json\" or \"pretty\", got \"{other}\""),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: LogFormat::default() }
    }
}

fn default_log_level() -> String {
    "info,taleweaver=debug".to_string()
}

/// Breaker settings for one dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyConfig {
    pub failure_threshold: u32,
    pub reset_timeout_seconds: u64,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout_seconds: 30 }
    }
}

impl From<DependencyConfig> for CircuitBreakerConfig {
    fn from(config: DependencyConfig) -> Self {
        CircuitBreakerConfig::new(
            config.failure_threshold,
            Duration::from_secs(config.reset_timeout_seconds),
        )
    }
}

/// Retry policy as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> bool {
    true
}

/// Upstream generation services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendsConfig {
    #[serde(default = "default_image_url")]
    pub image_url: String,
    #[serde(default = "default_story_url")]
    pub story_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            image_url: default_image_url(),
            story_url: default_story_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_image_url() -> String {
    "http://127.0.0.1:9001/v1/images".to_string()
}

fn default_story_url() -> String {
    "http://127.0.0.1:9002/v1/stories".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl GovernanceConfig {
    /// Add the built-in limit types and dependencies the file left out
    fn fill_builtin_entries(&mut self) {
        self.rate_limits.entry(DEFAULT_LIMIT_TYPE.to_string()).or_insert(LimitSpec::new(100, 60));
        self.rate_limits
            .entry(IMAGE_GENERATION_LIMIT.to_string())
            .or_insert(LimitSpec::new(10, 60));
        for dependency in [DEPENDENCY_IMAGE_GEN, DEPENDENCY_STORY_GEN] {
            self.dependencies.entry(dependency.to_string()).or_default();
        }
    }

    /// Check every bound the resilience layer relies on
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, spec) in &self.rate_limits {
            if spec.max_requests == 0 {
                return Err(ConfigError::invalid(
                    format!("rate_limits.{name}.max_requests"),
                    "must be greater than 0",
                ));
            }
            if spec.window_seconds == 0 {
                return Err(ConfigError::invalid(
                    format!("rate_limits.{name}.window_seconds"),
                    "must be greater than 0",
                ));
            }
        }

        for (name, dependency) in &self.dependencies {
            if dependency.failure_threshold == 0 {
                return Err(ConfigError::invalid(
                    format!("dependencies.{name}.failure_threshold"),
                    "must be greater than 0",
                ));
            }
            if dependency.reset_timeout_seconds == 0 {
                return Err(ConfigError::invalid(
                    format!("dependencies.{name}.reset_timeout_seconds"),
                    "must be greater than 0",
                ));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be greater than 0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "retry.base_delay_ms",
                format!(
                    "{} exceeds retry.max_delay_ms ({})",
                    self.retry.base_delay_ms, self.retry.max_delay_ms
                ),
            ));
        }

        if self.backends.image_url.trim().is_empty() {
            return Err(ConfigError::invalid("backends.image_url", "must not be empty"));
        }
        if self.backends.story_url.trim().is_empty() {
            return Err(ConfigError::invalid("backends.story_url", "must not be empty"));
        }
        if self.backends.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "backends.request_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Quotas for the rate limiter
    pub fn rate_limiter_config(&self) -> Result<RateLimiterConfig, ConfigError> {
        RateLimiterConfig::with_limits(
            self.rate_limits.iter().map(|(name, spec)| (name.clone(), *spec)),
        )
        .map_err(|e| ConfigError::invalid("rate_limits", e.to_string()))
    }

    /// Per-dependency breaker settings
    pub fn breaker_configs(&self) -> HashMap<String, CircuitBreakerConfig> {
        self.dependencies
            .iter()
            .map(|(name, dependency)| (name.clone(), CircuitBreakerConfig::from(*dependency)))
            .collect()
    }

    /// The retry policy for generation calls
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::builder()
            .max_attempts(self.retry.max_attempts)
            .base_delay(Duration::from_millis(self.retry.base_delay_ms))
            .max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .jitter(self.retry.jitter)
            .build()
            .map_err(|e| ConfigError::invalid("retry", e.to_string()))
    }
}

/// Load configuration with the standard fallback strategy
///
/// # Errors
/// Returns `ConfigError` if a named file is missing, a file cannot be
/// parsed, an override is malformed or validation fails.
pub fn load() -> Result<GovernanceConfig, ConfigError> {
    let mut config = match std::env::var_os(ENV_CONFIG_PATH) {
        Some(path) => load_from_file(Some(PathBuf::from(path)))?,
        None => match probe_config_paths() {
            Some(path) => load_from_file(Some(path))?,
            None => {
                tracing::info!("No config file found, using built-in defaults");
                GovernanceConfig::default()
            }
        },
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `ConfigError` if the file is missing, unreadable or malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<GovernanceConfig, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound { path: p });
            }
            p
        }
        None => probe_config_paths()
            .ok_or_else(|| ConfigError::NotFound { path: PathBuf::from(CONFIG_FILE_NAMES[0]) })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|source| ConfigError::Read { path: config_path.clone(), source })?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content, by file extension
///
/// # Errors
/// Returns `ConfigError` if the format is unsupported or parsing fails.
pub fn parse_config(contents: &str, path: &Path) -> Result<GovernanceConfig, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let mut config: GovernanceConfig = match extension {
        "toml" => toml::from_str(contents)?,
        "json" => serde_json::from_str(contents)?,
        _ => return Err(ConfigError::UnsupportedFormat { extension: extension.to_string() }),
    };
    config.fill_builtin_entries();
    Ok(config)
}

/// Probe the standard locations for a config file
///
/// Searches the current working directory, then the executable's directory,
/// for `taleweaver.toml`, `config.toml`, `taleweaver.json` and `config.json`.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) =
        std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }

    let found = dirs
        .iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file());

    if let Some(path) = &found {
        tracing::debug!(path = %path.display(), "Found config file");
    }
    found
}

/// Apply `TALEWEAVER_BIND` and `TALEWEAVER_LOG_FORMAT`
///
/// # Errors
/// Returns `ConfigError::Invalid` if an override cannot be parsed.
pub fn apply_env_overrides(config: &mut GovernanceConfig) -> Result<(), ConfigError> {
    if let Ok(bind) = std::env::var(ENV_BIND) {
        config.server.bind = bind.parse().map_err(|e| {
            ConfigError::invalid("server.bind", format!("{ENV_BIND}={bind:?}: {e}"))
        })?;
    }
    if let Ok(format) = std::env::var(ENV_LOG_FORMAT) {
        config.logging.format = format.parse()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_include_builtin_entries() {
        let config = GovernanceConfig::default();
        assert_eq!(config.rate_limits[DEFAULT_LIMIT_TYPE], LimitSpec::new(100, 60));
        assert_eq!(config.rate_limits[IMAGE_GENERATION_LIMIT], LimitSpec::new(10, 60));
        assert_eq!(config.dependencies[DEPENDENCY_IMAGE_GEN], DependencyConfig::default());
        assert_eq!(config.dependencies[DEPENDENCY_STORY_GEN], DependencyConfig::default());
        assert_eq!(config.server.bind, default_bind());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [rate_limits.image_generation]
            max_requests = 4
            window_seconds = 30

            [dependencies.image-gen]
            failure_threshold = 3
            reset_timeout_seconds = 10
        "#;
        let config = parse_config(toml, Path::new("taleweaver.toml")).unwrap();

        assert_eq!(config.rate_limits[IMAGE_GENERATION_LIMIT], LimitSpec::new(4, 30));
        assert_eq!(config.rate_limits[DEFAULT_LIMIT_TYPE], LimitSpec::new(100, 60));
        assert_eq!(config.dependencies[DEPENDENCY_IMAGE_GEN].failure_threshold, 3);
        assert_eq!(config.dependencies[DEPENDENCY_STORY_GEN].failure_threshold, 5);
        assert_eq!(config.retry, RetrySettings::default());
    }

    #[test]
    fn test_json_format() {
        let json = r#"{"retry": {"max_attempts": 5, "base_delay_ms": 50}, "logging": {"format": "json"}}"#;
        let config = parse_config(json, Path::new("config.json")).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = parse_config("", Path::new("config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { extension } if extension == "yaml"));
    }

    #[test]
    fn test_validation_names_the_field() {
        let mut config = GovernanceConfig::default();
        config.rate_limits.insert("story".to_string(), LimitSpec::new(0, 60));
        match config.validate().unwrap_err() {
            ConfigError::Invalid { field, .. } => assert_eq!(field, "rate_limits.story.max_requests"),
            other => panic!("unexpected error: {other}"),
        }

        let mut config = GovernanceConfig::default();
        config.retry.base_delay_ms = 20_000;
        match config.validate().unwrap_err() {
            ConfigError::Invalid { field, .. } => assert_eq!(field, "retry.base_delay_ms"),
            other => panic!("unexpected error: {other}"),
        }

        let mut config = GovernanceConfig::default();
        config.dependencies.insert("image-gen".to_string(), DependencyConfig {
            failure_threshold: 5,
            reset_timeout_seconds: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conversions() {
        let config = GovernanceConfig::default();
        let limiter = config.rate_limiter_config().unwrap();
        assert_eq!(limiter.resolve(IMAGE_GENERATION_LIMIT).1, LimitSpec::new(10, 60));

        let breakers = config.breaker_configs();
        assert_eq!(breakers[DEPENDENCY_IMAGE_GEN].reset_timeout, Duration::from_secs(30));

        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.max_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_config("[server]\nport = 1\n", Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
