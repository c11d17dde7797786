use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::Platform;
use crate::storage::KeyValueStore;

/// Current snapshot version
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Key the session snapshot lives under
pub const SESSION_KEY: &str = "session";

/// Lifecycle phase of the block session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Active,
    PendingUnlock,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::PendingUnlock => write!(f, "pending unlock"),
        }
    }
}

/// Persisted form of a non-idle session
///
/// The unlock code is never written out; a restored pending session gets a fresh challenge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub version: String,
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub platforms: Vec<Platform>,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Read-only view of the session handed to callers
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub session_id: Option<Uuid>,
    pub platforms: Vec<Platform>,
    pub started_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub remaining: Duration,
    pub progress: f64,
    /// Time left before the unlock code shows; only set while pending
    pub reveal_remaining: Option<Duration>,
    pub code_revealed: bool,
}

impl SessionStatus {
    pub fn idle(platforms: Vec<Platform>) -> Self {
        Self {
            phase: SessionPhase::Idle,
            session_id: None,
            platforms,
            started_at: None,
            ends_at: None,
            remaining: Duration::zero(),
            progress: 0.0,
            reveal_remaining: None,
            code_revealed: false,
        }
    }
}

/// Durable home of the session snapshot
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the snapshot, ignoring one written by an incompatible version
    pub fn load(&self) -> Result<Option<SessionSnapshot>> {
        let snapshot = self
            .store
            .load::<SessionSnapshot>(SESSION_KEY)
            .context("Failed to load session snapshot")?;

        match snapshot {
            Some(snapshot) if snapshot.version != SNAPSHOT_VERSION => {
                warn!(
                    "Session snapshot version mismatch (expected {}, got {}). Ignoring it.",
                    SNAPSHOT_VERSION, snapshot.version
                );
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        debug!("Saving session snapshot ({})", snapshot.phase);
        self.store
            .save(SESSION_KEY, snapshot)
            .context("Failed to save session snapshot")
    }

    pub fn clear(&self) -> Result<()> {
        self.store
            .remove(SESSION_KEY)
            .context("Failed to clear session snapshot")
    }
}
