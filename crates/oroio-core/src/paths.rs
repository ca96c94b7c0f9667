//! Standard paths used by oroio tools

use std::path::{Path, PathBuf};

/// Encrypted key list
pub const KEYS_FILE: &str = "keys.enc";
/// Active key index, plain decimal text
pub const CURRENT_FILE: &str = "current";
/// Usage cache written by the fetch command
pub const CACHE_FILE: &str = "list_cache.b64";
/// age identity used to encrypt the key list
pub const IDENTITY_FILE: &str = "identity.key";
/// Configuration file name inside the config directory
pub const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "OROIO_DIR";

/// Standard oroio paths
#[derive(Debug, Clone)]
pub struct Paths {
    /// Data directory ($OROIO_DIR or ~/.oroio)
    pub data: PathBuf,
    /// Config directory (~/.config/oroio)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = std::env::var_os(DATA_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".oroio")
            });

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("oroio");

        Self { data, config }
    }

    /// Use a different data directory
    pub fn with_data(mut self, dir: &Path) -> Self {
        self.data = dir.to_path_buf();
        self
    }

    pub fn keys_file(&self) -> PathBuf {
        self.data.join(KEYS_FILE)
    }

    pub fn current_file(&self) -> PathBuf {
        self.data.join(CURRENT_FILE)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.data.join(CACHE_FILE)
    }

    pub fn identity_file(&self) -> PathBuf {
        self.data.join(IDENTITY_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join(CONFIG_FILE)
    }
}
