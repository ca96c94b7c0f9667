//! Vault - Encrypted key list with an active-key pointer
//!
//! All keys live in a single encrypted file (`keys.enc`) as a JSON array in
//! insertion order. Keys are addressed by their 1-based position, so removing
//! a key shifts every later key down by one. The active pointer is stored
//! separately as plain decimal text (`current`).
//!
//! Every mutation re-reads the vault from disk and replaces files atomically
//! (write to a sibling temp file, then rename).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use oroio_core::Paths;

use crate::cipher::{AgeCipher, Cipher};
use crate::error::{KeyError, Result};

/// A stored key, as listed by the vault
#[derive(Clone, PartialEq)]
pub struct Credential {
    /// 1-based position in the vault
    pub index: usize,
    /// The raw key
    pub secret: String,
    /// Whether this is the active key
    pub is_current: bool,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &mask(&self.secret))
            .field("is_current", &self.is_current)
            .finish()
    }
}

/// The key vault
pub struct Vault {
    paths: Paths,
    keys_path: PathBuf,
    current_path: PathBuf,
    cipher: Box<dyn Cipher>,
}

impl Vault {
    /// Create a vault in the data directory of `paths` with an explicit cipher
    pub fn new(paths: &Paths, cipher: Box<dyn Cipher>) -> Self {
        Self {
            paths: paths.clone(),
            keys_path: paths.keys_file(),
            current_path: paths.current_file(),
            cipher,
        }
    }

    /// Create a vault using the age identity stored in the data directory
    pub fn open(paths: &Paths) -> Self {
        Self::new(paths, Box::new(AgeCipher::new(&paths.identity_file())))
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// List keys in order. An absent or unreadable vault lists as empty.
    pub fn list(&self) -> Vec<Credential> {
        let secrets = match self.load_secrets() {
            Ok(secrets) => secrets,
            Err(e) => {
                warn!("Treating unreadable vault as empty: {}", e);
                Vec::new()
            }
        };

        let active = resolve_active(self.read_active(), secrets.len());

        secrets
            .into_iter()
            .enumerate()
            .map(|(i, secret)| Credential {
                index: i + 1,
                secret,
                is_current: active == Some(i + 1),
            })
            .collect()
    }

    /// The active key, if any
    pub fn current(&self) -> Option<Credential> {
        self.list().into_iter().find(|c| c.is_current)
    }

    /// All keys in index order. Unlike `list`, read failures are errors.
    pub fn secrets(&self) -> Result<Vec<String>> {
        self.load_secrets()
    }

    /// Add a key and return its index. The first key becomes active.
    pub fn add(&self, secret: &str) -> Result<usize> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(KeyError::InvalidInput("Key cannot be empty".to_string()));
        }

        let mut secrets = self.load_secrets()?;
        if let Some(pos) = secrets.iter().position(|s| s == secret) {
            return Err(KeyError::InvalidInput(format!(
                "Key already exists as #{}",
                pos + 1
            )));
        }

        let was_empty = secrets.is_empty();
        secrets.push(secret.to_string());
        self.save_secrets(&secrets)?;

        let index = secrets.len();
        if was_empty {
            self.write_active(Some(index))?;
        }

        info!(index, "added key");
        Ok(index)
    }

    /// Remove a key and return the new active index.
    ///
    /// If the active key is removed, the key that moves into its position
    /// becomes active, or the new last key when it was at the end. An
    /// active key after the removed one keeps pointing at the same key.
    pub fn remove(&self, index: usize) -> Result<Option<usize>> {
        let mut secrets = self.load_secrets()?;
        let count = secrets.len();
        check_range(index, count)?;

        let active = resolve_active(self.read_active(), count);

        secrets.remove(index - 1);
        self.save_secrets(&secrets)?;

        let remaining = secrets.len();
        let new_active = match active {
            _ if remaining == 0 => None,
            Some(a) if a == index => Some(index.min(remaining)),
            Some(a) if a > index => Some(a - 1),
            other => other,
        };
        self.write_active(new_active)?;

        info!(index, ?new_active, "removed key");
        Ok(new_active)
    }

    /// Make a key active. Selecting the already active key is fine.
    pub fn use_key(&self, index: usize) -> Result<()> {
        let count = self.load_secrets()?.len();
        check_range(index, count)?;

        self.write_active(Some(index))?;
        info!(index, "switched active key");
        Ok(())
    }

    fn load_secrets(&self) -> Result<Vec<String>> {
        if !self.keys_path.exists() {
            return Ok(Vec::new());
        }

        let encrypted = fs::read(&self.keys_path)
            .map_err(|e| KeyError::storage("Failed to read vault", e))?;
        let plaintext = self.cipher.decrypt(&encrypted)?;

        serde_json::from_slice(&plaintext).map_err(|e| KeyError::storage("Corrupt vault", e))
    }

    fn save_secrets(&self, secrets: &[String]) -> Result<()> {
        ensure_private_dir(&self.paths.data)?;

        let plaintext = serde_json::to_vec(secrets)
            .map_err(|e| KeyError::storage("Failed to serialize vault", e))?;
        let encrypted = self.cipher.encrypt(&plaintext)?;

        write_atomic(&self.keys_path, &encrypted)?;
        debug!(count = secrets.len(), "saved vault");
        Ok(())
    }

    fn read_active(&self) -> Option<usize> {
        fs::read_to_string(&self.current_path)
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    fn write_active(&self, index: Option<usize>) -> Result<()> {
        match index {
            Some(index) => write_atomic(&self.current_path, index.to_string().as_bytes()),
            None => match fs::remove_file(&self.current_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(KeyError::storage("Failed to clear active key", e)),
            },
        }
    }
}

/// Active index for a vault of `count` keys. A missing or out-of-range
/// pointer falls back to the first key.
fn resolve_active(stored: Option<usize>, count: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    match stored {
        Some(index) if (1..=count).contains(&index) => Some(index),
        _ => Some(1),
    }
}

fn check_range(index: usize, count: usize) -> Result<()> {
    if index == 0 || index > count {
        return Err(KeyError::NotFound { index, count });
    }
    Ok(())
}

/// Create the data directory, readable by the owner only
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| KeyError::storage("Failed to create data dir", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| KeyError::storage("Failed to secure data dir", e))?;
    }

    Ok(())
}

/// Replace `path` with `contents` via a temp file and rename, mode 0600
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        KeyError::storage(&format!("Failed to write {}", path.display()), e)
    })
}

/// Redact a key for display.
///
/// Long keys (16+ chars) show 6 leading and 4 trailing characters, medium
/// keys (8-15) show 2 and 2, anything shorter is fully hidden. The middle
/// is always a fixed `****`, so the output is 14 or 8 characters wide.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let n = chars.len();

    let (head, tail) = if n >= 16 {
        (6, 4)
    } else if n >= 8 {
        (2, 2)
    } else {
        return "********".to_string();
    };

    let prefix: String = chars[..head].iter().collect();
    let suffix: String = chars[n - tail..].iter().collect();
    format!("{}****{}", prefix, suffix)
}
