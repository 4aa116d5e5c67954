//! Local user identity and its persistence
//!
//! The identity is the application-level username that other clients dial.
//! It is saved once at sign-in and read back at startup to decide whether the
//! client should connect on its own.
//!
//! Two stores are provided:
//!
//! - [`FileIdentityStore`] keeps a small JSON key-value document on disk
//! - [`MemoryIdentityStore`] keeps the value for the life of the process

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Key under which the identity is stored
pub const IDENTITY_KEY: &str = "identity";

/// Application-level username distinguishing call participants
///
/// ```rust
/// use pushcall_client_core::Identity;
///
/// let alice = Identity::new("  alice ").unwrap();
/// assert_eq!(alice.as_str(), "alice");
/// assert!(Identity::new("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Build an identity, trimming surrounding whitespace
    pub fn new(raw: impl AsRef<str>) -> ClientResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ClientError::invalid_identity("identity must not be empty"));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ClientError::invalid_identity(
                "identity must not contain control characters",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Persists the chosen identity across restarts
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Last saved identity, if any
    async fn get(&self) -> ClientResult<Option<Identity>>;

    /// Persist `identity`, replacing any previous value
    async fn save(&self, identity: &Identity) -> ClientResult<()>;

    /// Forget the saved identity
    async fn clear(&self) -> ClientResult<()>;
}

/// Identity store backed by a JSON document on disk
///
/// The document is a flat string map so that other preferences can share the
/// file. Writes go to a sibling temp file which is then renamed over the
/// original.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file a write goes to before it is renamed over the store
    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn load(&self) -> ClientResult<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, prefs: &BTreeMap<String, String>) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.staging_path();
        let body = serde_json::to_vec_pretty(prefs)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn get(&self) -> ClientResult<Option<Identity>> {
        let prefs = self.load().await?;
        match prefs.get(IDENTITY_KEY) {
            Some(raw) => match Identity::new(raw) {
                Ok(identity) => Ok(Some(identity)),
                Err(e) => {
                    warn!(path = %self.path.display(), "Ignoring unusable stored identity: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn save(&self, identity: &Identity) -> ClientResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut prefs = self.load().await?;
        prefs.insert(IDENTITY_KEY.to_string(), identity.as_str().to_string());
        self.store(&prefs).await?;
        debug!(path = %self.path.display(), %identity, "Saved identity");
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut prefs = self.load().await?;
        if prefs.remove(IDENTITY_KEY).is_some() {
            self.store(&prefs).await?;
            debug!(path = %self.path.display(), "Cleared identity");
        }
        Ok(())
    }
}

/// In-process identity store
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identity: parking_lot::Mutex<Option<Identity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `identity`, as if saved by an earlier run
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: parking_lot::Mutex::new(Some(identity)),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get(&self) -> ClientResult<Option<Identity>> {
        Ok(self.identity.lock().clone())
    }

    async fn save(&self, identity: &Identity) -> ClientResult<()> {
        *self.identity.lock() = Some(identity.clone());
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        self.identity.lock().take();
        Ok(())
    }
}
