//! This module provides the worker pool that executes decoded commands.
//! The only implementation in use is [`SharedQueueThreadPool`], which feeds
//! a fixed number of threads from a shared crossbeam channel.
//!
//! [`SharedQueueThreadPool`]: ./struct.SharedQueueThreadPool.html
use crate::Result;

/// A trait for the basic functionality of a pool of worker threads
pub trait ThreadPool {
    /// creates a pool with the given number of `threads`
    ///
    /// # Errors
    /// returns an error if any thread could not be started at the OS level
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Spawns a function into the thread pool.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}

mod shared_queue;

pub use self::shared_queue::SharedQueueThreadPool;
