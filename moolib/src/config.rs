//! On-disk configuration for mailcow-cli.
//!
//! A TOML file holds the default server name plus one `[servers."..."]`
//! table per instance. The API token lives here, so the file is expected to
//! be user-readable only.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_SSL_VERIFY: bool = true;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    /// Name of the server table used when none is requested explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL (the mailcow UI location), e.g. `https://mail.example.com`.
    pub url: String,
    /// Token for API access.
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Settings {
    /// Load settings from `path`, failing with a hint when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "could not find {}. Run --create-example-config and try again!",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| Error::Config(format!("failed to parse {}: {}", path.display(), err)))
    }

    /// Resolve the server table to use: an explicit name, or the configured
    /// default.
    pub fn server(&self, name: Option<&str>) -> Result<(&str, &ServerConfig)> {
        let name = match name {
            Some(name) => name,
            None => self.defaults.server.as_deref().ok_or_else(|| {
                Error::Config("no server requested and no default server configured".to_string())
            })?,
        };
        let (name, server) = self.servers.get_key_value(name).ok_or_else(|| {
            Error::Config(format!("server {name:?} is not present in the configuration"))
        })?;
        Ok((name.as_str(), server))
    }

    /// Effective TLS verification for one server (server entry overrides
    /// defaults, absent means verify).
    #[must_use]
    pub fn ssl_verify(&self, server: &ServerConfig) -> bool {
        server
            .ssl_verify
            .or(self.defaults.ssl_verify)
            .unwrap_or(DEFAULT_SSL_VERIFY)
    }

    /// Effective request timeout in seconds for one server.
    #[must_use]
    pub fn timeout(&self, server: &ServerConfig) -> u64 {
        server
            .timeout
            .or(self.defaults.timeout)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

/// Default configuration file location, e.g.
/// `~/.config/mailcow-cli/config.toml`.
#[must_use]
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailcow-cli")
        .join("config.toml")
}

/// Write an example configuration, refusing to clobber an existing file.
pub fn create_example(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(Error::Config(format!(
            "file {} already exists!",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut servers = BTreeMap::new();
    servers.insert(
        "mail.example.com".to_string(),
        ServerConfig {
            url: "https://mail.example.com".to_string(),
            token: "123456-abcde-123456-abcde-123456".to_string(),
            ssl_verify: None,
            timeout: None,
        },
    );
    let example = Settings {
        defaults: Defaults {
            server: Some("mail.example.com".to_string()),
            ssl_verify: Some(true),
            timeout: Some(15),
        },
        servers,
    };

    let content = toml::to_string_pretty(&example)
        .map_err(|err| Error::Config(format!("failed to serialize example config: {err}")))?;
    fs::write(path, content)?;
    log::info!("wrote example configuration to {}", path.display());
    Ok(())
}
