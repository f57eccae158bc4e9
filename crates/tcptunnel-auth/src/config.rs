use crate::cache::{CacheError, LocalCache, TokenCache};
use std::sync::Arc;
use url::Url;

/// Collaborators for authenticating against a proxy server.
///
/// Unset fields fall back to defaults: the cache to a [`LocalCache`] in the
/// user's configuration directory and TLS to the platform defaults.
#[derive(Clone, Default)]
pub struct AuthClientConfig {
    cache: Option<Arc<dyn TokenCache>>,
    server_url: Option<Url>,
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl AuthClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_server_url(mut self, server_url: Url) -> Self {
        self.server_url = Some(server_url);
        self
    }

    pub fn with_tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The configured cache, or a [`LocalCache`] in the config directory
    pub fn cache(&self) -> Result<Arc<dyn TokenCache>, CacheError> {
        match &self.cache {
            Some(cache) => Ok(cache.clone()),
            None => Ok(Arc::new(LocalCache::new()?)),
        }
    }

    pub fn server_url(&self) -> Option<&Url> {
        self.server_url.as_ref()
    }

    pub fn tls(&self) -> Option<&Arc<rustls::ClientConfig>> {
        self.tls.as_ref()
    }

    /// Cached token for the configured server
    pub fn cached_token(&self) -> Result<String, CacheError> {
        let server_url = self.server_url.as_ref().ok_or(CacheError::NotFound)?;
        self.cache()?.load(server_url)
    }
}

impl std::fmt::Debug for AuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClientConfig")
            .field("cache", &self.cache.is_some())
            .field("server_url", &self.server_url)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
