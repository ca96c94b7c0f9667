//! Key operations exposed to front ends
//!
//! Every operation returns a plain result object instead of an error, so a
//! caller on the other side of a process boundary always gets something it
//! can show. Successful mutations re-run the alert check on a fresh view.

use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use oroio_core::paths::{CACHE_FILE, CURRENT_FILE, KEYS_FILE};
use oroio_core::{Config, Paths};
use oroio_notify::Notifier;

use crate::alerts::{Alert, AlertEngine, Thresholds};
use crate::cache::{merge, KeyInfo, UsageCache};
use crate::error::{KeyError, Result};
use crate::fetch::{CommandFetcher, UsageFetcher};
use crate::vault::{mask, Vault};

/// Files that `read_data` is allowed to return
pub const DATA_FILES: [&str; 3] = [KEYS_FILE, CURRENT_FILE, CACHE_FILE];

/// Outcome of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

impl From<Result<String>> for OpResult {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

/// The key vault, usage cache and alert engine behind one facade
pub struct KeyService {
    vault: Vault,
    cache: UsageCache,
    fetcher: Box<dyn UsageFetcher>,
    alerts: Arc<AlertEngine>,
}

impl KeyService {
    pub fn new(
        vault: Vault,
        cache: UsageCache,
        fetcher: Box<dyn UsageFetcher>,
        alerts: Arc<AlertEngine>,
    ) -> Self {
        Self {
            vault,
            cache,
            fetcher,
            alerts,
        }
    }

    /// Wire up the standard vault, cache and fetch command for `paths`
    pub fn from_config(paths: &Paths, config: &Config, notifier: Box<dyn Notifier>) -> Self {
        let fetcher = CommandFetcher::new(
            config.fetch_command.clone(),
            &paths.data,
            Duration::from_secs(config.fetch_timeout_secs),
        );
        let alerts = AlertEngine::new(notifier, Thresholds::from_config(config));

        Self::new(
            Vault::open(paths),
            UsageCache::new(&paths.cache_file()),
            Box::new(fetcher),
            Arc::new(alerts),
        )
    }

    /// All keys with their usage, read fresh from disk
    pub fn list_keys(&self) -> Vec<KeyInfo> {
        merge(self.vault.list(), self.cache.load())
    }

    /// The active key with its usage
    pub fn current_key(&self) -> Option<KeyInfo> {
        self.list_keys().into_iter().find(|k| k.is_current)
    }

    pub fn add_key(&self, key: &str) -> OpResult {
        self.mutate("add", || {
            let index = self.vault.add(key)?;
            Ok(format!("Added key #{} ({})", index, mask(key.trim())))
        })
    }

    pub fn remove_key(&self, index: usize) -> OpResult {
        self.mutate("remove", || {
            let active = self.vault.remove(index)?;
            // Cache rows and suppression entries are keyed by index too
            self.cache.remove_index(index)?;
            self.alerts.forget_key(index);
            Ok(match active {
                Some(active) => format!("Removed key #{}, key #{} is active", index, active),
                None => format!("Removed key #{}, no keys left", index),
            })
        })
    }

    pub fn use_key(&self, index: usize) -> OpResult {
        self.mutate("use", || {
            self.vault.use_key(index)?;
            Ok(format!("Switched to key #{}", index))
        })
    }

    /// Run the fetch command and re-read the cache it wrote
    pub fn refresh_cache(&self) -> OpResult {
        self.mutate("refresh", || {
            let secrets = self.vault.secrets()?;
            self.fetcher.fetch(&secrets, self.cache.path())?;

            let records = self.cache.load();
            let covered = records.keys().filter(|i| **i <= secrets.len()).count();
            Ok(format!(
                "Refreshed usage for {} of {} keys",
                covered,
                secrets.len()
            ))
        })
    }

    /// Run the alert check against a fresh view
    pub fn check(&self) -> Vec<Alert> {
        self.alerts.check(&self.list_keys())
    }

    /// Raw contents of one of the data files. Any other name is not found.
    pub fn read_data(&self, filename: &str) -> Option<Vec<u8>> {
        if !DATA_FILES.contains(&filename) {
            debug!(filename, "refusing to read non-data file");
            return None;
        }
        fs::read(self.vault.paths().data.join(filename)).ok()
    }

    fn mutate(&self, op: &str, f: impl FnOnce() -> Result<String>) -> OpResult {
        let result = f();
        match &result {
            Ok(_) => {
                self.check();
            }
            Err(e @ (KeyError::Storage(_) | KeyError::Io(_) | KeyError::Fetch(_))) => {
                warn!(op, "operation failed: {}", e)
            }
            Err(e) => debug!(op, "operation rejected: {}", e),
        }
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_result_json_shape() {
        let ok = serde_json::to_value(OpResult::ok("Switched to key #1")).unwrap();
        assert_eq!(
            ok,
            serde_json::json!({"success": true, "message": "Switched to key #1"})
        );

        let err = serde_json::to_value(OpResult::err("Key #4 not found (2 keys stored)")).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"success": false, "error": "Key #4 not found (2 keys stored)"})
        );
    }

    #[test]
    fn test_op_result_from_error_uses_message() {
        let result = OpResult::from(Err::<String, _>(KeyError::NotFound { index: 3, count: 1 }));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Key #3 not found (1 keys stored)"));

        let result = OpResult::from(Err::<String, _>(KeyError::InvalidInput(
            "Key cannot be empty".to_string(),
        )));
        assert_eq!(result.error.as_deref(), Some("Key cannot be empty"));
    }

    #[test]
    fn test_data_files_allow_list() {
        assert_eq!(DATA_FILES, ["keys.enc", "current", "list_cache.b64"]);
    }
}
