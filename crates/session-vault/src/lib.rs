//! Session vault: cookies captured after a successful login, persisted so
//! the next run can skip the credential flow entirely.
//!
//! The vault never fails a run on read. A missing or corrupt file reads as
//! "no stored session" and the caller falls back to credential login.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use browser_port::CookieParam;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const VAULT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault i/o failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("vault serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One persisted cookie. Snake-case on disk; converted to the wire shape at
/// the browser boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl From<CookieParam> for StoredCookie {
    fn from(param: CookieParam) -> Self {
        Self {
            name: param.name,
            value: param.value,
            domain: param.domain,
            path: param.path,
            expires: param.expires,
            http_only: param.http_only,
            secure: param.secure,
            same_site: param.same_site,
        }
    }
}

impl From<StoredCookie> for CookieParam {
    fn from(cookie: StoredCookie) -> Self {
        Self {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            path: cookie.path,
            url: None,
            expires: cookie.expires,
            http_only: cookie.http_only,
            secure: cookie.secure,
            same_site: cookie.same_site,
        }
    }
}

fn default_version() -> u32 {
    VAULT_VERSION
}

/// Everything needed to restore a login: the cookie jar plus capture time.
/// Validity is decided by probing the platform, not by age.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionToken {
    #[serde(default = "default_version")]
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub cookies: Vec<StoredCookie>,
}

impl SessionToken {
    pub fn from_cookies(cookies: Vec<CookieParam>) -> Self {
        Self {
            version: VAULT_VERSION,
            saved_at: Utc::now(),
            cookies: cookies.into_iter().map(StoredCookie::from).collect(),
        }
    }

    pub fn cookie_params(&self) -> Vec<CookieParam> {
        self.cookies
            .iter()
            .cloned()
            .map(CookieParam::from)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// File-backed vault. Absence and corruption both read as no token.
pub struct Vault {
    path: PathBuf,
}

impl Vault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored token, if any. Never errors: unreadable content is
    /// logged and treated as absent so a stale vault cannot wedge a run.
    pub fn load(&self) -> Option<SessionToken> {
        if !self.path.exists() {
            debug!(target: "session-vault", path = %self.path.display(), "no stored session");
            return None;
        }
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    target: "session-vault",
                    path = %self.path.display(),
                    %err,
                    "vault file unreadable; treating as absent"
                );
                return None;
            }
        };
        match serde_json::from_slice::<SessionToken>(&raw) {
            Ok(token) => {
                debug!(
                    target: "session-vault",
                    cookies = token.cookies.len(),
                    saved_at = %token.saved_at,
                    "loaded stored session"
                );
                Some(token)
            }
            Err(err) => {
                warn!(
                    target: "session-vault",
                    path = %self.path.display(),
                    %err,
                    "vault file corrupt; treating as absent"
                );
                None
            }
        }
    }

    /// Persist the token atomically: full serialize to a sibling tmp file,
    /// fsync, rename over the final path.
    pub fn store(&self, token: &SessionToken) -> Result<(), VaultError> {
        let data = serde_json::to_vec_pretty(token)?;
        write_atomic(&self.path, &data)
    }

    /// Remove the stored token. Missing file counts as cleared.
    pub fn clear(&self) -> Result<(), VaultError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(VaultError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    let io = |source| VaultError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io)?;
        }
    }
    let tmp = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .map_err(io)?;
    file.write_all(data).map_err(io)?;
    file.sync_all().map_err(io)?;
    fs::rename(&tmp, path).map_err(io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_token() -> SessionToken {
        let mut cookie = CookieParam::new("li_at", "secret-token");
        cookie.domain = Some(".example.com".to_string());
        cookie.http_only = Some(true);
        SessionToken::from_cookies(vec![cookie])
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::new(dir.path().join("session.json"));

        vault.store(&sample_token()).unwrap();
        let loaded = vault.load().unwrap();

        assert_eq!(loaded.version, VAULT_VERSION);
        assert_eq!(loaded.cookies.len(), 1);
        assert_eq!(loaded.cookies[0].name, "li_at");
        assert_eq!(loaded.cookies[0].domain.as_deref(), Some(".example.com"));
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::new(dir.path().join("absent.json"));
        assert!(vault.load().is_none());
    }

    #[test]
    fn load_corrupt_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{ not json").unwrap();

        let vault = Vault::new(&path);
        assert!(vault.load().is_none());
        // The corrupt file stays in place until the next store overwrites it.
        assert!(path.exists());
    }

    #[test]
    fn store_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::new(dir.path().join("nested/deeper/session.json"));
        vault.store(&sample_token()).unwrap();
        assert!(vault.load().is_some());
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::new(dir.path().join("session.json"));

        vault.clear().unwrap();
        vault.store(&sample_token()).unwrap();
        vault.clear().unwrap();
        assert!(vault.load().is_none());
        vault.clear().unwrap();
    }

    #[test]
    fn cookie_conversion_drops_wire_only_url() {
        let mut param = CookieParam::new("sess", "v");
        param.url = Some("https://example.com".to_string());
        param.secure = Some(true);

        let stored = StoredCookie::from(param);
        let back = CookieParam::from(stored);
        assert_eq!(back.name, "sess");
        assert_eq!(back.secure, Some(true));
        assert!(back.url.is_none());
    }

    #[test]
    fn token_survives_missing_version_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(
            &path,
            br#"{"saved_at":"2025-06-01T10:00:00Z","cookies":[{"name":"a","value":"b"}]}"#,
        )
        .unwrap();

        let token = Vault::new(&path).load().unwrap();
        assert_eq!(token.version, VAULT_VERSION);
        assert_eq!(token.cookies.len(), 1);
    }
}
