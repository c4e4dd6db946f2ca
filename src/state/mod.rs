// src/state/mod.rs
//! Shared per-actor state and global reply counters.
//!
//! Everything the engine counts lives in one [`Snapshot`] behind one lock.
//! A decision pass takes the lock once, so the abuse check and the rate-limit
//! check of the same message see and mutate a consistent record. Nothing
//! else keeps a copy of these counters.

pub mod persist;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::events::{ActorId, ChannelId};
use crate::window::TimestampWindow;

pub const SCHEMA_VERSION: u32 = 1;

/// Everything known about one actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorProfile {
    pub id: ActorId,
    pub name: String,
    pub roles: BTreeSet<String>,
    pub joined_at: DateTime<Utc>,
    /// Every inbound message, suspicious or not.
    pub total_message_count: u64,
    /// Suspicious-event timestamps per channel. Only abuse detection uses these.
    pub suspicious: BTreeMap<ChannelId, TimestampWindow>,
}

impl ActorProfile {
    pub fn new(
        id: impl Into<ActorId>,
        name: impl Into<String>,
        roles: BTreeSet<String>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roles,
            joined_at,
            total_message_count: 0,
            suspicious: BTreeMap::new(),
        }
    }

    /// Fresh suspicious events across all channels, derived from the windows.
    pub fn recent_suspicious_count(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.suspicious
            .values()
            .map(|w| w.count_fresh(now, window))
            .sum()
    }

    /// Trim every channel window and forget channels with nothing left.
    pub fn decay_suspicious(&mut self, now: DateTime<Utc>, window: Duration) {
        for w in self.suspicious.values_mut() {
            w.trim(now, window);
        }
        self.suspicious.retain(|_, w| !w.is_empty());
    }
}

/// Process-wide reply accounting for the current hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalCooldownState {
    pub replies_this_hour: u32,
    /// Set on the first denial past the global cap; cleared on rollover.
    pub cap_reached: bool,
    /// UTC hour index (`unix_secs / 3600`) the counters belong to.
    pub hour_bucket: i64,
    /// Last send time of each cooldown-gated rule.
    pub last_sent: BTreeMap<String, DateTime<Utc>>,
}

/// The persisted unit. Unknown fields are ignored and missing ones default,
/// so snapshots written by other versions still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub schema_version: u32,
    /// Bumped on every mutation through [`StateStore::update`].
    pub revision: u64,
    pub cooldown: GlobalCooldownState,
    /// Replies sent to each actor this hour.
    pub reply_budgets: BTreeMap<ActorId, u32>,
    pub actors: BTreeMap<ActorId, ActorProfile>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            revision: 0,
            cooldown: GlobalCooldownState::default(),
            reply_budgets: BTreeMap::new(),
            actors: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    /// Fetch the actor record, creating it (joined now, zero counters) if absent.
    /// Name and roles are refreshed from the latest observation.
    pub fn ensure_actor(
        &mut self,
        id: &str,
        name: &str,
        roles: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> &mut ActorProfile {
        let profile = self
            .actors
            .entry(id.to_string())
            .or_insert_with(|| ActorProfile::new(id, name, roles.clone(), now));
        if profile.name != name {
            profile.name = name.to_string();
        }
        if &profile.roles != roles {
            profile.roles = roles.clone();
        }
        profile
    }

    pub fn reply_count(&self, actor: &str) -> u32 {
        self.reply_budgets.get(actor).copied().unwrap_or(0)
    }
}

/// Where the primary snapshot and its backup copy live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub primary: PathBuf,
    pub backup: PathBuf,
}

/// Which copy a startup load came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    Backup,
    Empty,
}

/// Single owner of all counters.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<Snapshot>,
}

impl StateStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    /// Load the primary snapshot, else the backup, else start empty.
    pub fn load(paths: &StatePaths) -> (Self, LoadSource) {
        match read_snapshot(&paths.primary) {
            Ok(s) => {
                info!(target: "state", path = %paths.primary.display(), actors = s.actors.len(), "loaded state");
                return (Self::new(s), LoadSource::Primary);
            }
            Err(e) => warn!(target: "state", error = %e, "primary state unusable, trying backup"),
        }
        match read_snapshot(&paths.backup) {
            Ok(s) => {
                info!(target: "state", path = %paths.backup.display(), actors = s.actors.len(), "recovered state from backup");
                (Self::new(s), LoadSource::Backup)
            }
            Err(e) => {
                warn!(target: "state", error = %e, "backup state unusable, starting empty");
                (Self::default(), LoadSource::Empty)
            }
        }
    }

    /// Run `f` against a consistent view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Mutate the state as one step; bumps the revision.
    pub fn update<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut guard = self.inner.lock();
        let out = f(&mut guard);
        guard.revision = guard.revision.wrapping_add(1);
        out
    }

    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().clone()
    }

    /// Serialize under the lock; the caller writes the bytes without holding it.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        let guard = self.inner.lock();
        serde_json::to_vec_pretty(&*guard).map_err(PersistenceError::Serialize)
    }
}

/// Read and parse one snapshot file.
pub fn read_snapshot(path: &Path) -> Result<Snapshot, PersistenceError> {
    let bytes = fs::read(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
