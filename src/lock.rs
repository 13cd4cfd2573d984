//! Per-item agent lock.
//!
//! A lock is a file created with `create_new`, so exactly one process wins
//! the race for an item. The file records who holds it and since when; a
//! lock older than the TTL belongs to a crashed run and is reclaimed.
//! Reclaiming renames the stale file aside first, so two runs that both
//! saw the same stale lock cannot both end up holding the item.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LockRecord {
    owner: Uuid,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

pub struct LockManager {
    dir: PathBuf,
    ttl: Duration,
    owner: Uuid,
}

/// Held lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    owner: Uuid,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_record(path: &Path) -> Option<LockRecord> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<LockRecord>(&raw).ok())
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Only remove the file if it is still ours.
        let ours = read_record(&self.path).is_some_and(|r| r.owner == self.owner);
        if ours {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock");
            }
        }
    }
}

impl LockManager {
    pub fn new(config: &LockConfig) -> Self {
        Self::with_ttl(&config.dir, Duration::from_secs(config.ttl_secs))
    }

    pub fn with_ttl(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            owner: Uuid::new_v4(),
        }
    }

    fn lock_path(&self, item_id: &str) -> PathBuf {
        let safe: String = item_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.lock"))
    }

    /// Try to take the lock for an item.
    ///
    /// `Ok(None)` means another run holds it. A stale lock is removed and
    /// acquisition retried once.
    pub fn try_acquire(&self, item_id: &str) -> Result<Option<LockGuard>> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AppError::Lock(format!("Failed to create lock dir: {e}")))?;
        let path = self.lock_path(item_id);

        if let Some(guard) = self.create(&path)? {
            return Ok(Some(guard));
        }

        let observed = read_record(&path);
        if !self.is_stale(&path, observed.as_ref()) {
            return Ok(None);
        }

        tracing::warn!(item = item_id, path = %path.display(), "Removing stale agent lock");
        self.reclaim(&path, observed.as_ref())
    }

    /// Move the lock we judged stale out of the way, then take it.
    ///
    /// If what was moved is not the record we judged stale, another run
    /// reclaimed the lock first: its file is put back and we back off.
    fn reclaim(&self, path: &Path, observed: Option<&LockRecord>) -> Result<Option<LockGuard>> {
        let aside = path.with_extension(format!("stale-{}", Uuid::new_v4()));
        match std::fs::rename(path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return self.create(path),
            Err(e) => return Err(AppError::Lock(format!("Failed to move stale lock: {e}"))),
        }

        let moved = read_record(&aside);
        if moved.as_ref() != observed {
            // Fails if a third run already holds the path; theirs stands.
            if let Err(e) = std::fs::hard_link(&aside, path) {
                tracing::debug!(path = %path.display(), error = %e, "Lock was taken while restoring");
            }
            let _ = std::fs::remove_file(&aside);
            return Ok(None);
        }

        if let Err(e) = std::fs::remove_file(&aside) {
            tracing::warn!(path = %aside.display(), error = %e, "Failed to remove stale lock");
        }
        self.create(path)
    }

    fn create(&self, path: &Path) -> Result<Option<LockGuard>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(AppError::Lock(format!("Failed to create lock: {e}"))),
        };

        let record = LockRecord {
            owner: self.owner,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        if let Err(e) = file.write_all(serde_json::to_string(&record)?.as_bytes()) {
            let _ = std::fs::remove_file(path);
            return Err(AppError::Lock(format!("Failed to write lock: {e}")));
        }

        Ok(Some(LockGuard {
            path: path.to_path_buf(),
            owner: self.owner,
        }))
    }

    /// Unreadable or unparsable lock files fall back to the file mtime.
    fn is_stale(&self, path: &Path, record: Option<&LockRecord>) -> bool {
        let acquired_at = record.map(|r| r.acquired_at).or_else(|| {
            std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from)
        });

        match acquired_at {
            Some(at) => Utc::now()
                .signed_duration_since(at)
                .to_std()
                .is_ok_and(|age| age > self.ttl),
            None => false,
        }
    }
}
