//! The administrative reader/writer lock guarding configuration-level
//! operations (descriptor saves, bulk renames, truncation bookkeeping)
//! against in-flight lookups.
//!
//! This is distinct from the per-metatile coalescing lock
//! ([`crate::layer::MetaTileLocks`]): acquisition here is *timed*, so a
//! wedged administrative operation surfaces as an error instead of a silent
//! deadlock. A write holder can downgrade to a read without an intervening
//! window where no lock is held.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::timeout;

/// Raised when the configured acquisition timeout elapses.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("timed out after {timeout:?} waiting for the {mode} configuration lock")]
pub struct LockTimeout {
    /// Which side of the lock was requested.
    pub mode: &'static str,
    /// The configured acquisition timeout.
    pub timeout: Duration,
}

/// A reader/writer lock whose acquisitions fail loudly after a timeout.
#[derive(Debug)]
pub struct TimedRwLock {
    inner: Arc<RwLock<()>>,
    acquire_timeout: Duration,
}

/// Shared-side guard of a [`TimedRwLock`].
#[derive(Debug)]
pub struct TimedReadGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Exclusive-side guard of a [`TimedRwLock`].
#[derive(Debug)]
pub struct TimedWriteGuard {
    guard: OwnedRwLockWriteGuard<()>,
}

impl TimedWriteGuard {
    /// Atomically trades the exclusive lock for a shared one. No other
    /// writer can sneak in between.
    #[must_use]
    pub fn downgrade(self) -> TimedReadGuard {
        TimedReadGuard {
            _guard: self.guard.downgrade(),
        }
    }
}

impl TimedRwLock {
    /// Creates a lock with the given acquisition timeout.
    #[must_use]
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(())),
            acquire_timeout,
        }
    }

    /// Acquires the shared side.
    pub async fn read(&self) -> Result<TimedReadGuard, LockTimeout> {
        timeout(self.acquire_timeout, Arc::clone(&self.inner).read_owned())
            .await
            .map(|guard| TimedReadGuard { _guard: guard })
            .map_err(|_| LockTimeout {
                mode: "read",
                timeout: self.acquire_timeout,
            })
    }

    /// Acquires the exclusive side.
    pub async fn write(&self) -> Result<TimedWriteGuard, LockTimeout> {
        timeout(self.acquire_timeout, Arc::clone(&self.inner).write_owned())
            .await
            .map(|guard| TimedWriteGuard { guard })
            .map_err(|_| LockTimeout {
                mode: "write",
                timeout: self.acquire_timeout,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readers_share() {
        let lock = TimedRwLock::new(Duration::from_millis(100));
        let _a = lock.read().await.unwrap();
        let _b = lock.read().await.unwrap();
    }

    #[tokio::test]
    async fn writer_times_out_against_reader() {
        let lock = TimedRwLock::new(Duration::from_millis(50));
        let _reader = lock.read().await.unwrap();
        let err = lock.write().await.unwrap_err();
        assert_eq!(err.mode, "write");
    }

    #[tokio::test]
    async fn downgrade_admits_readers_but_not_writers() {
        let lock = TimedRwLock::new(Duration::from_millis(50));
        let writer = lock.write().await.unwrap();
        let _reader = writer.downgrade();
        assert!(lock.read().await.is_ok());
        assert!(lock.write().await.is_err());
    }

    #[tokio::test]
    async fn released_lock_can_be_retaken() {
        let lock = TimedRwLock::new(Duration::from_millis(50));
        drop(lock.write().await.unwrap());
        assert!(lock.write().await.is_ok());
    }
}
