//! The reader/writer lock that coordinates command execution with
//! persistence snapshots.
//!
//! Neither the [`Store`] nor the [`Persister`] owns this lock: the server
//! assembly code creates one and hands a clone to each side as an explicit
//! capability. Command execution holds the read side (many commands run
//! concurrently); the persistence writer takes the write side only while it
//! copies a consistent view of the store to disk.
//!
//! [`Store`]: ../struct.Store.html
//! [`Persister`]: ../struct.Persister.html

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

/// A cloneable handle to the shared snapshot lock.
#[derive(Debug, Clone, Default)]
pub struct SnapshotLock(Arc<RwLock<()>>);

impl SnapshotLock {
    /// creates a new, unlocked handle
    pub fn new() -> Self {
        SnapshotLock::default()
    }

    /// Acquires the read side. Workers hold this for the duration of a
    /// command's store access, which keeps snapshots from tearing between
    /// a command's steps.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attempts the write side without blocking. The periodic snapshot tick
    /// uses this and skips the tick entirely when a command is in flight.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        match self.0.try_write() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Acquires the write side, blocking. Only the final shutdown snapshot
    /// uses this form.
    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}
