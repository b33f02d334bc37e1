//! Server settings
//!
//! Layered lowest to highest: built-in defaults, JSON config file,
//! `REMCACHE_*` environment variables, command-line flags. Settings are read
//! once at start-up and never reloaded.

use remcache_cache::{BlobstoreConfig, CacheConfig};
use remcache_core::{
    DigestFunction, Error, Result, DEFAULT_LISTEN_ADDR, REMCACHE_DIGEST_FUNCTION_VAR,
    REMCACHE_DISK_ROOT_VAR, REMCACHE_LISTEN_VAR, REMCACHE_LOG_FORMAT_VAR,
};
use remcache_utils::{LogFormat, XdgPaths};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Address the HTTP server binds to
    pub listen: String,
    /// Serve Prometheus metrics on `/metrics`
    pub metrics: bool,
    pub log_format: LogFormat,
    pub cache: CacheConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            metrics: true,
            log_format: LogFormat::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Values given on the command line; `None` leaves the lower layer in place
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub listen: Option<String>,
    pub disk_root: Option<PathBuf>,
    pub digest_function: Option<DigestFunction>,
    pub log_format: Option<LogFormat>,
}

impl ServerSettings {
    /// Resolve every layer. Without `--config`, the XDG config file is used
    /// when it exists.
    pub fn load(config_path: Option<&Path>, overrides: &SettingsOverrides) -> Result<Self> {
        let mut settings = match config_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = XdgPaths::config_file();
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.apply_overrides(overrides);
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
            .map_err(|e| Error::configuration(format!("{}: {e}", path.display())))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::configuration(format!("invalid settings: {e}")))
    }

    /// Apply `REMCACHE_*` variables through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(listen) = lookup(REMCACHE_LISTEN_VAR) {
            self.listen = listen;
        }
        if let Some(root) = lookup(REMCACHE_DISK_ROOT_VAR) {
            self.cache.blobstore = BlobstoreConfig::Disk {
                root: PathBuf::from(root),
            };
        }
        if let Some(function) = lookup(REMCACHE_DIGEST_FUNCTION_VAR) {
            self.cache.digest_function = function.parse()?;
        }
        if let Some(format) = lookup(REMCACHE_LOG_FORMAT_VAR) {
            self.log_format = format.parse()?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(listen) = &overrides.listen {
            self.listen = listen.clone();
        }
        if let Some(root) = &overrides.disk_root {
            self.cache.blobstore = BlobstoreConfig::Disk { root: root.clone() };
        }
        if let Some(function) = overrides.digest_function {
            self.cache.digest_function = function;
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            Error::configuration(format!("invalid listen address '{}': {e}", self.listen))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.cache.validate()
    }
}
