//! JWT cache keyed by server URL

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cached token not found")]
    NotFound,

    #[error("cached token expired")]
    Expired,

    #[error("cached token invalid: {0}")]
    Invalid(String),

    #[error("could not determine the user configuration directory")]
    ConfigDir,

    #[error("token cache I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Storage for raw JWTs, one per server URL
pub trait TokenCache: Send + Sync {
    /// Return the cached token if it is present and not yet expired
    fn load(&self, server_url: &Url) -> Result<String, CacheError>;

    fn store(&self, server_url: &Url, token: &str) -> Result<(), CacheError>;
}

/// Only `exp` matters to the cache; the server checks everything else.
#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    #[allow(dead_code)]
    exp: u64,
}

/// File-backed cache under `<config dir>/tcptunnel/cache/jwts/`
#[derive(Debug, Clone)]
pub struct LocalCache {
    dir: PathBuf,
}

impl LocalCache {
    /// Cache rooted in the user's configuration directory
    pub fn new() -> Result<Self, CacheError> {
        let base = dirs::config_dir().ok_or(CacheError::ConfigDir)?;
        Ok(Self::with_base_dir(base.join("tcptunnel")))
    }

    /// Cache rooted at `base_dir` (tokens go to `base_dir/cache/jwts`)
    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: base_dir.as_ref().join("cache").join("jwts"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding the token for `server_url`
    pub fn token_path(&self, server_url: &Url) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(server_url.as_str().as_bytes());
        self.dir.join(format!("{:x}.jwt", hasher.finalize()))
    }
}

impl TokenCache for LocalCache {
    fn load(&self, server_url: &Url) -> Result<String, CacheError> {
        let path = self.token_path(server_url);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::NotFound),
            Err(e) => return Err(CacheError::Io(e)),
        };
        let token = raw.trim();

        check_expiry(token)?;
        debug!("Loaded cached token from {}", path.display());
        Ok(token.to_string())
    }

    fn store(&self, server_url: &Url, token: &str) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.token_path(server_url);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(token.as_bytes())?;

        // `mode` only applies to newly created files
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        debug!("Stored token at {}", path.display());
        Ok(())
    }
}

/// Parse the token without verifying its signature and check `exp`.
fn check_expiry(token: &str) -> Result<(), CacheError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;
    validation.leeway = 0;

    match decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(_) => Ok(()),
        Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => Err(CacheError::Expired),
        Err(e) => Err(CacheError::Invalid(e.to_string())),
    }
}
