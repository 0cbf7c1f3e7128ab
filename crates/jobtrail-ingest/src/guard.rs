//! Run exclusion per logical source
//!
//! Two layers. The in-process registry stops two workers of this process from
//! shipping the same source; an exclusive advisory lock on a file in the state
//! directory stops two processes. The kernel drops the advisory lock when its holder
//! exits, so a process that dies mid-run never leaves the source blocked.
//!
//! The lock file itself is never deleted. Its content only describes the current
//! holder for conflict messages; ownership is the lock, not the file.
//!
//! A [`RunPermit`] releases both when dropped, whatever way the run ended.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::identity::SourceIdentity;

/// Content of a lock file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub host: String,
    pub pid: u32,
    pub run_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn current(run_id: Uuid) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            host,
            pid: std::process::id(),
            run_id,
            acquired_at: Utc::now(),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} pid {} since {}",
            self.host,
            self.pid,
            jobtrail_common::time::format_utc(&self.acquired_at)
        )
    }
}

pub enum GuardOutcome {
    Acquired(RunPermit),
    /// Another run holds the source; not an error
    Conflict { holder: String },
}

impl std::fmt::Debug for GuardOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardOutcome::Acquired(permit) => f
                .debug_tuple("Acquired")
                .field(&permit.run_id)
                .finish(),
            GuardOutcome::Conflict { holder } => {
                f.debug_struct("Conflict").field("holder", holder).finish()
            },
        }
    }
}

/// Result of trying to take the lock file
enum Claim {
    Held(File),
    Busy(String),
}

pub struct ConcurrencyGuard {
    active: Mutex<HashMap<String, Uuid>>,
    lock_dir: Option<PathBuf>,
}

impl ConcurrencyGuard {
    /// Registry only, for single-process use and tests
    pub fn in_memory() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            lock_dir: None,
        }
    }

    /// Registry plus advisory lock files under `dir`
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            lock_dir: Some(dir.into()),
        }
    }

    pub fn is_active(&self, identity: &SourceIdentity) -> bool {
        self.registry().contains_key(&identity.key())
    }

    pub fn lock_path(&self, identity: &SourceIdentity) -> Option<PathBuf> {
        self.lock_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.lock", identity.key())))
    }

    pub async fn acquire(self: &Arc<Self>, identity: &SourceIdentity) -> Result<GuardOutcome> {
        let key = identity.key();
        let run_id = Uuid::new_v4();

        {
            let mut active = self.registry();
            if active.contains_key(&key) {
                return Ok(GuardOutcome::Conflict {
                    holder: "another worker in this process".to_string(),
                });
            }
            active.insert(key.clone(), run_id);
        }

        let lock_file = match self.lock_path(identity) {
            None => None,
            Some(path) => {
                let claimed = tokio::task::spawn_blocking(move || claim_lock_file(&path, run_id))
                    .await
                    .map_err(|e| IngestError::Io(std::io::Error::other(e)))
                    .and_then(|claim| claim);
                match claimed {
                    Ok(Claim::Held(file)) => Some(file),
                    Ok(Claim::Busy(holder)) => {
                        self.forget(&key, run_id);
                        return Ok(GuardOutcome::Conflict { holder });
                    },
                    Err(e) => {
                        self.forget(&key, run_id);
                        return Err(e);
                    },
                }
            },
        };

        debug!(source = %identity, %run_id, "run permit acquired");
        Ok(GuardOutcome::Acquired(RunPermit {
            guard: Arc::clone(self),
            key,
            run_id,
            _lock_file: lock_file,
        }))
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, Uuid>> {
        // the map stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn forget(&self, key: &str, run_id: Uuid) {
        let mut active = self.registry();
        if active.get(key) == Some(&run_id) {
            active.remove(key);
        }
    }
}

/// Take the exclusive lock on `path` without waiting
///
/// The lock belongs to the open file description, so it is released when the
/// returned file is closed or the process exits.
fn claim_lock_file(path: &Path, run_id: Uuid) -> Result<Claim> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;

    if let Err(e) = FileExt::try_lock_exclusive(&file) {
        if is_contended(&e) {
            let holder = read_lock(path).map_or_else(
                || format!("lock file {}", path.display()),
                |h| h.describe(),
            );
            return Ok(Claim::Busy(holder));
        }
        return Err(e.into());
    }

    let body = serde_json::to_vec(&LockInfo::current(run_id))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&body)?;
    file.sync_all()?;
    Ok(Claim::Held(file))
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn read_lock(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

/// Proof that this run owns its source
pub struct RunPermit {
    guard: Arc<ConcurrencyGuard>,
    key: String,
    run_id: Uuid,
    /// Closing the file drops the advisory lock
    _lock_file: Option<File>,
}

impl RunPermit {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.forget(&self.key, self.run_id);
        debug!(key = %self.key, run_id = %self.run_id, "run permit released");
    }
}
