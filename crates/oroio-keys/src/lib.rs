//! oroio-keys - Local API key vault for oroio
//!
//! "Rotate keys before they run dry."
//!
//! Keeps a handful of API keys encrypted on disk with one of them marked
//! active, reads per-key balance and expiry data from a cache refreshed by
//! an external fetch command, and raises a desktop alert when a key runs
//! low, is about to expire, or when every key is used up.
//!
//! Uses age encryption (X25519 + ChaCha20-Poly1305) for the key list.

pub mod alerts;
pub mod cache;
pub mod cipher;
pub mod codec;
pub mod error;
pub mod fetch;
pub mod protocol;
pub mod service;
pub mod vault;

pub use alerts::{Alert, AlertEngine, Thresholds};
pub use cache::{KeyInfo, UsageCache};
pub use cipher::{AgeCipher, Cipher};
pub use codec::Usage;
pub use error::KeyError;
pub use fetch::{CommandFetcher, UsageFetcher};
pub use service::{KeyService, OpResult};
pub use vault::{mask, Credential, Vault};
