//! Error types for key operations

use thiserror::Error;

/// Errors returned by vault, cache refresh and fetch operations.
///
/// Malformed cache lines are not represented here: they are dropped
/// while decoding and only show up as missing usage data.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Key #{index} not found ({count} keys stored)")]
    NotFound { index: usize, count: usize },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Usage fetch failed: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyError {
    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{}: {}", context, err))
    }
}

pub type Result<T> = std::result::Result<T, KeyError>;
