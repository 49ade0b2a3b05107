//! Configuration loading from `~/.conexus/config.toml` with defaults.

use conexus_runtime::retry::RetryConfig;
use conexus_types::config::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Top-level kernel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Hex-encoded Ed25519 seed for the gateway's own identity.
    /// A fresh identity is generated on every boot when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_secret: Option<String>,
    /// Listener, registry and router settings.
    pub gateway: GatewayConfig,
    /// Backoff policy for retry managers built by the kernel.
    pub retry: RetryConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            identity_secret: None,
            gateway: GatewayConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Load kernel configuration from a TOML file, with defaults.
///
/// A missing, unreadable or invalid file yields the defaults; the kernel
/// never refuses to start over its config file.
pub fn load_config(path: Option<&Path>) -> KernelConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return KernelConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<KernelConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                KernelConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            KernelConfig::default()
        }
    }
}

/// Render a config as TOML, e.g. for `conexus init`.
pub fn render_config(config: &KernelConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    conexus_home().join("config.toml")
}

/// Get the default Conexus home directory.
pub fn conexus_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".conexus")
}
