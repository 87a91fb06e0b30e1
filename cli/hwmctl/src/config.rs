//! Settings for a run.
//!
//! Layered, lowest precedence first:
//! - built-in defaults
//! - a TOML/JSON/YAML file (`--config`, or `config.toml` in the per-user
//!   config directory when present)
//! - `HWM_*` environment variables, e.g. `HWM_STARTUP_ATTEMPTS=30`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use hwm_client::{Credentials, HttpSettings};
use hwm_converge::bootstrap::{self, BootstrapPolicy};
use hwm_reconcile::retry::{
    RetryPolicy, DEFAULT_REACHABILITY_ATTEMPTS, DEFAULT_REACHABILITY_INTERVAL,
    DEFAULT_STARTUP_ATTEMPTS, DEFAULT_STARTUP_INTERVAL,
};
use serde::Deserialize;

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "HWM";

/// Config file name inside the config directory.
const CONFIG_FILE: &str = "config.toml";

fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("com", "hwm", "hwmctl").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log level when `RUST_LOG` is unset.
    pub log_level: String,

    pub api_version: u32,
    pub timeout_secs: u64,
    pub accept_invalid_certs: bool,

    pub task_poll_attempts: u32,
    pub task_poll_interval_secs: u64,

    pub startup_attempts: u32,
    pub startup_interval_secs: u64,
    pub reachability_attempts: u32,
    pub reachability_interval_secs: u64,
    pub settle_delay_secs: u64,

    /// Factory login rotated during first boot.
    pub default_username: String,
    pub default_password: String,

    /// Read NIC addresses from the management controller after an import.
    pub discovery: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let http = HttpSettings::default();
        Self {
            log_level: "info".to_string(),
            api_version: http.api_version,
            timeout_secs: http.timeout.as_secs(),
            accept_invalid_certs: http.accept_invalid_certs,
            task_poll_attempts: http.task_policy.max_attempts,
            task_poll_interval_secs: http.task_policy.interval.as_secs(),
            startup_attempts: DEFAULT_STARTUP_ATTEMPTS,
            startup_interval_secs: DEFAULT_STARTUP_INTERVAL.as_secs(),
            reachability_attempts: DEFAULT_REACHABILITY_ATTEMPTS,
            reachability_interval_secs: DEFAULT_REACHABILITY_INTERVAL.as_secs(),
            settle_delay_secs: bootstrap::DEFAULT_SETTLE_DELAY.as_secs(),
            default_username: bootstrap::DEFAULT_USER.to_string(),
            default_password: bootstrap::DEFAULT_PASSWORD.to_string(),
            discovery: true,
        }
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default location is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (default_config_file(), false),
        };
        Self::from_sources(file, required, None)
    }

    /// Load from an explicit file and environment. `env` replaces the process
    /// environment when given.
    pub fn from_sources(
        file: Option<PathBuf>,
        required: bool,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            builder = builder.add_source(config::File::from(file.as_path()).required(required));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let location = file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());

        builder
            .build()
            .with_context(|| format!("Failed to read settings from {location}"))?
            .try_deserialize()
            .with_context(|| format!("Invalid settings in {location}"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn http(&self) -> HttpSettings {
        HttpSettings {
            api_version: self.api_version,
            timeout: self.timeout(),
            accept_invalid_certs: self.accept_invalid_certs,
            task_policy: RetryPolicy::new(
                self.task_poll_attempts,
                Duration::from_secs(self.task_poll_interval_secs),
            ),
        }
    }

    pub fn bootstrap(&self) -> BootstrapPolicy {
        BootstrapPolicy {
            startup: RetryPolicy::new(
                self.startup_attempts,
                Duration::from_secs(self.startup_interval_secs),
            ),
            reachability: RetryPolicy::new(
                self.reachability_attempts,
                Duration::from_secs(self.reachability_interval_secs),
            ),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            default_credentials: Credentials::new(&self.default_username, &self.default_password),
        }
    }
}
