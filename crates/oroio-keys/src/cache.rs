//! Usage cache and the merged key view
//!
//! The cache file is produced by the external fetch command. This side
//! reads it, and re-indexes it when a key is removed so rows keep matching
//! the vault. Every read goes back to disk.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::codec::{decode_cache, encode_cache, Usage};
use crate::error::Result;
use crate::vault::{write_atomic, Credential};

/// Read-only view of `list_cache.b64`
pub struct UsageCache {
    path: PathBuf,
}

impl UsageCache {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all usage records. An absent or unreadable file has no records.
    pub fn load(&self) -> BTreeMap<usize, Usage> {
        match fs::read(&self.path) {
            Ok(bytes) => decode_cache(&String::from_utf8_lossy(&bytes)),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read usage cache {}: {}", self.path.display(), e);
                }
                BTreeMap::new()
            }
        }
    }

    /// Usage for a single key index
    pub fn get(&self, index: usize) -> Option<Usage> {
        self.load().remove(&index)
    }

    /// Drop the row of a removed key and shift later rows down by one
    pub fn remove_index(&self, removed: usize) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let records = shift_after_remove(self.load(), removed);
        let encoded = encode_cache(&records, Utc::now().timestamp());

        if let Err(e) = write_atomic(&self.path, encoded.as_bytes()) {
            // Stale rows would be attached to the wrong keys
            let _ = fs::remove_file(&self.path);
            return Err(e);
        }

        debug!(removed, rows = records.len(), "re-indexed usage cache");
        Ok(())
    }
}

fn shift_after_remove(records: BTreeMap<usize, Usage>, removed: usize) -> BTreeMap<usize, Usage> {
    records
        .into_iter()
        .filter(|(index, _)| *index != removed)
        .map(|(index, usage)| {
            if index > removed {
                (index - 1, usage)
            } else {
                (index, usage)
            }
        })
        .collect()
}

/// A key joined with its usage record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub key: String,
    pub index: usize,
    pub is_current: bool,
    /// `None` means no usage data has been fetched for this key
    pub usage: Option<Usage>,
}

/// Join vault keys with cache records by index
pub fn merge(credentials: Vec<Credential>, mut usage: BTreeMap<usize, Usage>) -> Vec<KeyInfo> {
    credentials
        .into_iter()
        .map(|c| KeyInfo {
            usage: usage.remove(&c.index),
            key: c.secret,
            index: c.index,
            is_current: c.is_current,
        })
        .collect()
}
