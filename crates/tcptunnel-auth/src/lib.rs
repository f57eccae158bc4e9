//! Client-side authentication helpers
//!
//! Holds the on-disk JWT cache used to avoid re-authenticating against the
//! same proxy server on every run.

pub mod cache;
pub mod config;

pub use cache::{CacheError, LocalCache, TokenCache};
pub use config::AuthClientConfig;
