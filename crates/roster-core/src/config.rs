//! Configuration management for roster.
//!
//! Loads configuration from ${ROSTER_HOME}/config.toml with sensible defaults.
//! Deploy-time values (client id, tenant id, endpoints) can be overridden
//! through environment variables.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding `client_id`.
pub const CLIENT_ID_ENV: &str = "ROSTER_CLIENT_ID";
/// Environment variable overriding `tenant_id`.
pub const TENANT_ID_ENV: &str = "ROSTER_TENANT_ID";
/// Environment variable overriding `authority_host`.
pub const AUTHORITY_HOST_ENV: &str = "ROSTER_AUTHORITY_HOST";
/// Environment variable overriding `graph_base_url`.
pub const GRAPH_BASE_URL_ENV: &str = "ROSTER_GRAPH_BASE_URL";

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for roster configuration and token storage.
    //!
    //! ROSTER_HOME resolution order:
    //! 1. ROSTER_HOME environment variable (if set)
    //! 2. ~/.config/roster (default)

    use std::path::PathBuf;

    /// Returns the roster home directory.
    pub fn roster_home() -> PathBuf {
        if let Ok(home) = std::env::var("ROSTER_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".roster"),
            |h| h.join(".config").join("roster"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        roster_home().join("config.toml")
    }

    /// Returns the path to the persistent token cache.
    pub fn token_cache_path() -> PathBuf {
        roster_home().join("token_cache.json")
    }
}

fn default_authority_host() -> String {
    Config::DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_graph_base_url() -> String {
    Config::DEFAULT_GRAPH_BASE_URL.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![Config::DEFAULT_SCOPE.to_string()]
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application (client) ID of the app registration
    pub client_id: Option<String>,

    /// Directory (tenant) ID or domain
    pub tenant_id: Option<String>,

    /// Identity provider host, without tenant
    #[serde(default = "default_authority_host")]
    pub authority_host: String,

    /// Fixed localhost redirect port (random when unset)
    pub redirect_port: Option<u16>,

    /// Delegated permissions requested at sign-in
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Microsoft Graph base URL
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,

    /// Timeout for each HTTP request in seconds (0 disables)
    pub request_timeout_secs: u32,
}

impl Config {
    const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
    const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
    const DEFAULT_SCOPE: &str = "OnlineMeetingArtifact.Read.All";
    const DEFAULT_REQUEST_TIMEOUT_SECS: u32 = 30;

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    ///
    /// # Errors
    /// Returns an error if the file exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Resolves the client id with precedence: env > config.
    ///
    /// # Errors
    /// Returns an error if neither source provides a value.
    pub fn effective_client_id(&self) -> Result<String> {
        resolve_setting(self.client_id.as_deref(), CLIENT_ID_ENV).with_context(|| {
            format!("No client id configured. Set {CLIENT_ID_ENV} or client_id in config.toml.")
        })
    }

    /// Resolves the tenant id with precedence: env > config.
    ///
    /// # Errors
    /// Returns an error if neither source provides a value.
    pub fn effective_tenant_id(&self) -> Result<String> {
        resolve_setting(self.tenant_id.as_deref(), TENANT_ID_ENV).with_context(|| {
            format!("No tenant id configured. Set {TENANT_ID_ENV} or tenant_id in config.toml.")
        })
    }

    /// Returns the tenant-qualified authority URL.
    ///
    /// # Errors
    /// Returns an error if the tenant is missing or the host is not a valid URL.
    pub fn authority(&self) -> Result<String> {
        let host = resolve_url(Some(&self.authority_host), AUTHORITY_HOST_ENV, "authority host")?
            .unwrap_or_else(default_authority_host);
        let tenant = self.effective_tenant_id()?;
        Ok(format!("{}/{tenant}", host.trim_end_matches('/')))
    }

    /// Resolves the Graph base URL with precedence: env > config > default.
    ///
    /// # Errors
    /// Returns an error if the resolved value is not a valid URL.
    pub fn effective_graph_base_url(&self) -> Result<String> {
        let url = resolve_url(Some(&self.graph_base_url), GRAPH_BASE_URL_ENV, "Graph base URL")?
            .unwrap_or_else(default_graph_base_url);
        Ok(url.trim_end_matches('/').to_string())
    }

    /// Returns the per-request timeout, or None if disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(u64::from(self.request_timeout_secs)))
        }
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: None,
            tenant_id: None,
            authority_host: default_authority_host(),
            redirect_port: None,
            scopes: default_scopes(),
            graph_base_url: default_graph_base_url(),
            request_timeout_secs: Self::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Resolves a plain string setting with precedence: env > config.
fn resolve_setting(config_value: Option<&str>, env_var: &str) -> Option<String> {
    if let Ok(value) = std::env::var(env_var) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    config_value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Resolves a URL setting with precedence: env > config, validating the result.
fn resolve_url(config_value: Option<&str>, env_var: &str, label: &str) -> Result<Option<String>> {
    let Some(value) = resolve_setting(config_value, env_var) else {
        return Ok(None);
    };
    url::Url::parse(&value).with_context(|| format!("Invalid {label}: {value}"))?;
    Ok(Some(value))
}
