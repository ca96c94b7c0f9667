//! Encryption boundary for the key vault
//!
//! The vault only sees opaque bytes; where the key material comes from is
//! the cipher's business. The shipped cipher uses age (X25519 +
//! ChaCha20-Poly1305) with an identity file that is generated on first write.

use age::secrecy::ExposeSecret;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{KeyError, Result};
use crate::vault::{ensure_private_dir, write_atomic};

/// Encrypts and decrypts the serialized key list
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// age cipher backed by an X25519 identity file
pub struct AgeCipher {
    identity_path: PathBuf,
}

impl AgeCipher {
    pub fn new(identity_path: &Path) -> Self {
        Self {
            identity_path: identity_path.to_path_buf(),
        }
    }

    pub fn has_identity(&self) -> bool {
        self.identity_path.exists()
    }

    fn load_identity(&self) -> Result<age::x25519::Identity> {
        let content = fs::read_to_string(&self.identity_path)
            .map_err(|e| KeyError::storage("Failed to read identity key", e))?;

        content
            .trim()
            .parse::<age::x25519::Identity>()
            .map_err(|e| KeyError::storage("Failed to parse identity", e))
    }

    fn load_or_create_identity(&self) -> Result<age::x25519::Identity> {
        if self.has_identity() {
            return self.load_identity();
        }

        if let Some(parent) = self.identity_path.parent() {
            ensure_private_dir(parent)?;
        }

        let identity = age::x25519::Identity::generate();
        let identity_str = identity.to_string();
        write_atomic(&self.identity_path, identity_str.expose_secret().as_bytes())?;
        info!(path = %self.identity_path.display(), "generated new vault identity");

        Ok(identity)
    }
}

impl Cipher for AgeCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let recipient = self.load_or_create_identity()?.to_public();

        let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient)])
            .ok_or_else(|| KeyError::Storage("No recipients for encryption".to_string()))?;

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| KeyError::storage("Encryption error", e))?;

        writer
            .write_all(plaintext)
            .map_err(|e| KeyError::storage("Encryption error", e))?;

        writer
            .finish()
            .map_err(|e| KeyError::storage("Encryption error", e))?;

        Ok(encrypted)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let identity = self.load_identity()?;

        let decryptor = match age::Decryptor::new(ciphertext)
            .map_err(|e| KeyError::storage("Decryption error", e))?
        {
            age::Decryptor::Recipients(d) => d,
            _ => {
                return Err(KeyError::Storage(
                    "Decryption error: unexpected passphrase encryption".to_string(),
                ))
            }
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(std::iter::once(&identity as &dyn age::Identity))
            .map_err(|e| KeyError::storage("Decryption error", e))?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| KeyError::storage("Decryption error", e))?;

        Ok(decrypted)
    }
}
