use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Expiry metadata for the current session.
///
/// The credential itself travels out-of-band (an HTTP-only cookie) and is
/// never seen here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(expires_at: DateTime<Utc>) -> Self {
        Self { expires_at }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Check if the session will expire within `window` and should be refreshed
    pub fn needs_refresh(&self, window: Duration) -> bool {
        Utc::now()
            .checked_add_signed(window)
            .map_or(true, |refresh_at| refresh_at > self.expires_at)
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

/// Holder for the current session's expiry metadata.
///
/// Read by anyone; written only by the refresh coordinator and the
/// escalation path.
pub trait SessionStore: Send + Sync {
    fn get(&self) -> Option<Session>;

    fn set(&self, session: Session) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// Process-local store, lost on exit.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    data: RwLock<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Option<Session> {
        *self.data.read()
    }

    fn set(&self, session: Session) -> Result<()> {
        *self.data.write() = Some(session);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.data.write() = None;
        Ok(())
    }
}

/// Store persisted as JSON in the cache directory, with an in-memory copy
/// for reads.
pub struct FileSessionStore {
    cache_dir: PathBuf,
    data: RwLock<Option<Session>>,
}

impl FileSessionStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            data: RwLock::new(None),
        }
    }

    /// Open the store and load any session already on disk.
    ///
    /// Expired sessions are still loaded: the cookie may outlive the recorded
    /// expiry and the first call will renew it.
    pub fn open(cache_dir: PathBuf) -> Result<Self> {
        let store = Self::new(cache_dir);
        let path = store.session_path();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read session file")?;
            let session: Session = serde_json::from_str(&contents)
                .context("Failed to parse session file")?;
            debug!(expires_at = %session.expires_at, "Session loaded from disk");
            *store.data.write() = Some(session);
        }
        Ok(store)
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Option<Session> {
        *self.data.read()
    }

    fn set(&self, session: Session) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&session)?;
        std::fs::write(&path, contents).context("Failed to write session file")?;
        *self.data.write() = Some(session);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.data.write() = None;
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}
