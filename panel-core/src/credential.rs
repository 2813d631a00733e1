//! API key handling: sanitizing user-supplied keys and persisting one key on disk.

use std::{fs, io, path::PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::error::CoreResult;

/// Clean a pasted API key: trim, strip one pair of matching quotes, keep only printable ASCII.
pub fn sanitize(raw: &str) -> String {
    let mut s = raw.trim();
    for q in ['"', '\''] {
        if s.starts_with(q) && s.ends_with(q) {
            // a lone quote counts as both ends
            s = s.get(1..s.len() - 1).unwrap_or("");
            break;
        }
    }
    s.chars().filter(|c| (' '..='~').contains(c)).collect()
}

/// A sanitized, non-empty API key. Debug output is redacted.
#[derive(Debug)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Sanitize `raw`; `None` when nothing usable remains.
    pub fn parse(raw: &str) -> Option<Self> {
        let clean = sanitize(raw);
        if clean.is_empty() {
            None
        } else {
            Some(Self(SecretString::new(clean.into_boxed_str())))
        }
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.expose())
    }
}

impl Clone for ApiKey {
    fn clone(&self) -> Self {
        Self(SecretString::new(self.expose().into()))
    }
}

/// Result of [`KeyStore::save`].
#[derive(Debug)]
pub struct SavedKey {
    /// The stored key, or `None` when the input sanitized to nothing and the file was removed.
    pub key: Option<ApiKey>,
    /// True when sanitizing changed the input.
    pub cleaned: bool,
}

/// File-backed store holding at most one API key.
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(cfg: &crate::config::KeyStoreCfg) -> Self {
        Self::new(cfg.resolve_path())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Load the stored key. A missing file means no key.
    pub fn load(&self) -> CoreResult<Option<ApiKey>> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(ApiKey::parse(&s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, raw: &str) -> CoreResult<SavedKey> {
        let cleaned = sanitize(raw) != raw;
        let Some(key) = ApiKey::parse(raw) else {
            self.clear()?;
            return Ok(SavedKey { key: None, cleaned });
        };
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, key.expose())?;
        tracing::debug!(path = %self.path.display(), "api key saved");
        Ok(SavedKey {
            key: Some(key),
            cleaned,
        })
    }

    pub fn clear(&self) -> CoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
