use std::env;
use std::path::{Path, PathBuf};

/// XDG Base Directory paths for remcache
pub struct XdgPaths;

impl XdgPaths {
    /// Get XDG_CONFIG_HOME/remcache or fallback
    pub fn config_dir() -> PathBuf {
        Self::resolve(env::var("XDG_CONFIG_HOME").ok(), ".config")
    }

    /// Get XDG_CACHE_HOME/remcache or fallback
    pub fn cache_dir() -> PathBuf {
        Self::resolve(env::var("XDG_CACHE_HOME").ok(), ".cache")
    }

    /// Default configuration file location
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Default root of the disk blobstore
    pub fn blob_root() -> PathBuf {
        Self::cache_dir().join("blobs")
    }

    /// Default directory for in-progress upload spool files
    pub fn spool_dir() -> PathBuf {
        Self::cache_dir().join("uploads")
    }

    fn resolve(xdg_value: Option<String>, home_fallback: &str) -> PathBuf {
        xdg_value
            .filter(|v| !v.is_empty() && Path::new(v).is_absolute())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|home| home.join(home_fallback))
                    .unwrap_or_else(|| PathBuf::from(home_fallback))
            })
            .join("remcache")
    }
}
