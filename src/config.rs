//! Configuration management for Botthrottle.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `BOTTHROTTLE__*` environment variables. Individual quotas can also be
//! overridden with `BOT_LIMIT_<PATTERN>` variables.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BotThrottleError, Result};
use crate::ratelimit::{IdentityRegistry, QUOTA_ENV_PREFIX};

/// Prefix for environment overrides of top-level settings.
pub const ENV_PREFIX: &str = "BOTTHROTTLE";

/// Longest accepted window (one year).
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// How many windows pass between sweeps unless configured otherwise.
const DEFAULT_SWEEP_WINDOWS: u64 = 5;

/// Main configuration for the Botthrottle service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotThrottleConfig {
    /// Turns the whole filter on or off
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Window duration in seconds, shared by every identity
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Seconds between counter sweeps; defaults to five windows
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Paths that bypass the filter
    #[serde(default)]
    pub paths: PathsConfig,

    /// Known identities in evaluation order
    #[serde(default = "IdentityRegistry::builtin")]
    pub identities: IdentityRegistry,
}

impl Default for BotThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            window_secs: default_window_secs(),
            sweep_interval_secs: None,
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            identities: IdentityRegistry::builtin(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_window_secs() -> u64 {
    60
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Paths excluded from filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Path prefixes that are never filtered
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,

    /// File extensions (without the dot) that are never filtered
    #[serde(default = "default_excluded_extensions")]
    pub excluded_extensions: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            excluded_prefixes: default_excluded_prefixes(),
            excluded_extensions: default_excluded_extensions(),
        }
    }
}

fn default_excluded_prefixes() -> Vec<String> {
    ["/_next/static", "/_next/image", "/favicon.ico"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_excluded_extensions() -> Vec<String> {
    ["svg", "png", "jpg", "jpeg", "gif", "webp"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl BotThrottleConfig {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: BotThrottleConfig = settings.try_deserialize()?;
        config
            .identities
            .apply_overrides(quota_override_vars(std::env::vars_os()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BotThrottleConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.window_secs == 0 || self.window_secs > MAX_WINDOW_SECS {
            return Err(BotThrottleError::Config(format!(
                "window_secs must be between 1 and {}, got {}",
                MAX_WINDOW_SECS, self.window_secs
            )));
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(BotThrottleError::Config(
                "sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        self.identities.validate()
    }

    /// The window as a chrono duration.
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }

    /// Time between counter sweeps.
    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .sweep_interval_secs
            .unwrap_or(self.window_secs.saturating_mul(DEFAULT_SWEEP_WINDOWS));
        Duration::from_secs(secs)
    }
}

/// Pick the `BOT_LIMIT_*` variables out of a raw environment.
///
/// Variables whose name is not Unicode cannot be overrides and are skipped.
/// Values are decoded lossily so a malformed quota fails to parse instead of
/// vanishing.
fn quota_override_vars<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let key = key.into_string().ok()?;
            key.starts_with(QUOTA_ENV_PREFIX)
                .then(|| (key, value.to_string_lossy().into_owned()))
        })
        .collect()
}
