//! Per-session tracker identity.
//!
//! The identifier is created lazily, persisted in storage that lives only as
//! long as the login session, and reused by every later call. When that
//! storage cannot be used the identity is kept in memory for the lifetime of
//! the process instead; callers never see an error.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Storage key for the session identifier.
pub const SESSION_KEY: &str = "tracker_session_id";

/// Opaque identifier scoping one session's telemetry stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh identifier.
    ///
    /// The prefix is the creation time in base 36 so identifiers roughly sort
    /// by age; the suffix mixes nanosecond time, the process id and 128
    /// random bits through BLAKE3.
    #[must_use]
    pub fn generate() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut random = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&since_epoch.as_nanos().to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        hasher.update(&random);
        let digest = hasher.finalize().to_hex();

        let millis = u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX);
        Self(format!("{}{}", to_base36(millis), &digest[..16]))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Key-value storage scoped to the current session.
pub trait SessionStorage: Send + Sync + fmt::Debug {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// Session storage backed by one file per key in a directory.
///
/// Point it at a per-session runtime directory (`$XDG_RUNTIME_DIR`) so the
/// values disappear when the session ends.
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    dir: PathBuf,
}

impl FileSessionStorage {
    /// Create storage rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::session_storage(format!("invalid key: {key:?}")));
        }
        Ok(self.dir.join(key))
    }
}

impl SessionStorage for FileSessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => {
                let value = value.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|source| Error::DirectoryCreate {
                path: self.dir.clone(),
                source,
            })?;
        }
        std::fs::write(path, value)?;
        Ok(())
    }
}

/// Session storage held in memory.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemorySessionStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self
            .items
            .lock()
            .map_err(|_| Error::session_storage("memory storage poisoned"))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| Error::session_storage("memory storage poisoned"))?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Resolves the session identifier, creating it on first use.
#[derive(Debug)]
pub struct SessionIdentity {
    storage: Option<Box<dyn SessionStorage>>,
    cached: Mutex<Option<SessionId>>,
}

impl SessionIdentity {
    /// Create an identity backed by `storage`.
    #[must_use]
    pub fn new(storage: Box<dyn SessionStorage>) -> Self {
        Self {
            storage: Some(storage),
            cached: Mutex::new(None),
        }
    }

    /// Create an identity with no persistent storage.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            storage: None,
            cached: Mutex::new(None),
        }
    }

    /// Create an identity stored under `dir`, or in memory when `dir` is `None`.
    #[must_use]
    pub fn from_dir(dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) => Self::new(Box::new(FileSessionStorage::new(dir))),
            None => {
                warn!("No session runtime directory; session identity will not be persisted");
                Self::in_memory()
            }
        }
    }

    /// Return the session identifier, creating and persisting it on first use.
    ///
    /// Storage failures are logged and the identifier is held in memory.
    pub fn resolve(&self) -> SessionId {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(id) = cached.as_ref() {
            return id.clone();
        }

        if let Some(storage) = &self.storage {
            match storage.get_item(SESSION_KEY) {
                Ok(Some(value)) => {
                    debug!(session_id = %value, "Reusing session identity");
                    let id = SessionId::new(value);
                    *cached = Some(id.clone());
                    return id;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to read session identity"),
            }
        }

        let id = SessionId::generate();
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.set_item(SESSION_KEY, id.as_str()) {
                warn!(error = %e, "Failed to persist session identity; keeping it in memory");
            }
        }
        info!(session_id = %id, "Created session identity");
        *cached = Some(id.clone());
        id
    }
}
