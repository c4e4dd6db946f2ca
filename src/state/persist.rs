// src/state/persist.rs
//! Snapshot persistence: sinks and the periodic save/backup tasks.
//!
//! Writes never run under the state lock and never propagate into message
//! handling. A failed save is logged, counted and retried on the next tick.

use async_trait::async_trait;
use metrics::counter;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::{fs, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{StatePaths, StateStore};
use crate::error::PersistenceError;

/// Which copy of the state a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Primary,
    Backup,
}

impl Slot {
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Primary => "primary",
            Slot::Backup => "backup",
        }
    }
}

#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Store serialized state for `slot`, replacing the previous copy.
    async fn store(&self, slot: Slot, bytes: Vec<u8>) -> Result<(), PersistenceError>;
}

/// Writes snapshots to the configured files via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileSink {
    paths: StatePaths,
}

impl FileSink {
    pub fn new(paths: StatePaths) -> Self {
        Self { paths }
    }

    fn path_for(&self, slot: Slot) -> &Path {
        match slot {
            Slot::Primary => &self.paths.primary,
            Slot::Backup => &self.paths.backup,
        }
    }
}

#[async_trait]
impl SnapshotSink for FileSink {
    async fn store(&self, slot: Slot, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        write_atomic(self.path_for(slot), &bytes).await
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Replace `path` so readers see either the old or the new content, never a torn file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await.map_err(io_err(dir))?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).await.map_err(io_err(path))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Serialize the current state and hand it to the sink once.
pub async fn save_once<S>(store: &StateStore, sink: &S, slot: Slot) -> Result<(), PersistenceError>
where
    S: SnapshotSink + ?Sized,
{
    let bytes = store.to_bytes()?;
    let len = bytes.len();
    sink.store(slot, bytes).await?;
    debug!(target: "state", slot = slot.as_str(), bytes = len, "state written");
    Ok(())
}

/// Like [`save_once`] but logs instead of returning the error.
/// Returns whether the write went through.
pub async fn save_logged<S>(store: &StateStore, sink: &S, slot: Slot) -> bool
where
    S: SnapshotSink + ?Sized,
{
    match save_once(store, sink, slot).await {
        Ok(()) => true,
        Err(e) => {
            counter!("state_save_failures_total", "slot" => slot.as_str()).increment(1);
            warn!(target: "state", slot = slot.as_str(), error = %e, "state write failed; will retry next tick");
            false
        }
    }
}

/// Spawn a background task writing `slot` every `period`.
///
/// Primary saves are skipped while the state revision is unchanged since the
/// last successful write; backups are always written so the backup copy ages
/// predictably. A failed write is attempted again on the next tick.
pub fn spawn_periodic<S>(
    store: Arc<StateStore>,
    sink: Arc<S>,
    slot: Slot,
    period: Duration,
) -> JoinHandle<()>
where
    S: SnapshotSink + ?Sized + 'static,
{
    info!(target: "state", slot = slot.as_str(), period_secs = period.as_secs(), "periodic state writer started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; skip it so startup does not rewrite what was just loaded.
        ticker.tick().await;
        let mut last_written: Option<u64> = None;
        loop {
            ticker.tick().await;
            let revision = store.revision();
            if slot == Slot::Primary && last_written == Some(revision) {
                continue;
            }
            if save_logged(store.as_ref(), sink.as_ref(), slot).await {
                last_written = Some(revision);
            }
        }
    })
}
