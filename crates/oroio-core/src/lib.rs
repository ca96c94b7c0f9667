//! oroio core - Shared functionality for the oroio tools
//!
//! A small local manager for rotating API keys.

pub mod config;
pub mod format;
pub mod paths;

pub use config::Config;
pub use paths::Paths;
