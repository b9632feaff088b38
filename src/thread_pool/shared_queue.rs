use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, error, instrument, warn};

use crate::thread_pool::ThreadPool;
use crate::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A thread pool implemented with a shared job queue (i.e. channel).
///
/// This implementation uses the MPMC [`channel`] provided by the crossbeam
/// crate. Specifically, we are using it as a single producer, multiple
/// consumer. The single producer is this type itself, and the threads in the
/// pool are the consumers.
///
/// If a spawned task panics, the old thread will be destroyed and a new one
/// will be created in its place.
///
/// Calling [`shutdown`] closes the queue so no new work is accepted, then
/// waits for every worker to drain its in-flight job and exit, bounded by a
/// timeout per worker.
///
/// [`channel`]: https://docs.rs/crossbeam/0.8.1/crossbeam/channel/index.html
/// [`shutdown`]: #method.shutdown
pub struct SharedQueueThreadPool {
    /// the sending part of the job channel; None once the pool is shut down
    tx: Option<Sender<Job>>,
    /// workers ack on this channel when they exit
    done_rx: Receiver<()>,
    threads: u32,
}

impl ThreadPool for SharedQueueThreadPool {
    /// create a new thread pool with the given number of `threads`.
    /// Every thread created will have a handle to the receiving end of the channel
    fn new(threads: u32) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        let (done_tx, done_rx) = channel::unbounded::<()>();
        for _ in 0..threads {
            let task_rx = TaskReceiver {
                rx: rx.clone(),
                done_tx: done_tx.clone(),
            };
            thread::Builder::new().spawn(move || run_tasks(task_rx))?;
        }
        Ok(SharedQueueThreadPool {
            tx: Some(tx),
            done_rx,
            threads,
        })
    }

    /// Spawns a function into the thread pool. Work submitted after
    /// [`shutdown`] is refused and dropped.
    ///
    /// [`shutdown`]: #method.shutdown
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.tx {
            Some(tx) => {
                if tx.send(Box::new(job)).is_err() {
                    error!("there are no threads left in the pool, job dropped");
                }
            }
            None => warn!("the pool is shut down, job refused"),
        }
    }
}

impl SharedQueueThreadPool {
    /// Closes the job queue and waits for every worker to exit. The wait is
    /// bounded by `timeout` per worker; workers still running afterwards are
    /// abandoned with a warning.
    pub fn shutdown(&mut self, timeout: Duration) {
        if self.tx.take().is_none() {
            return;
        }
        for _ in 0..self.threads {
            if self.done_rx.recv_timeout(timeout).is_err() {
                warn!("timed out waiting for worker threads to finish");
                break;
            }
        }
    }
}

/// A type that can receive tasks (i.e. closures) from a channel and run them.
/// Additionally, this type is responsible for restarting any threads that panicked
#[derive(Clone, Debug)]
struct TaskReceiver {
    rx: Receiver<Job>,
    done_tx: Sender<()>,
}

impl Drop for TaskReceiver {
    #[instrument]
    fn drop(&mut self) {
        if thread::panicking() {
            debug!("thread panicked, starting a new thread");
            let task_rx = self.clone();
            if let Err(e) = thread::Builder::new().spawn(move || run_tasks(task_rx)) {
                error!("Failed to spawn a thread: {}", e);
            }
        }
    }
}

/// this function waits for a task to arrive on its (wrapped) receiver, and then runs the task
fn run_tasks(rx: TaskReceiver) {
    loop {
        match rx.rx.recv() {
            Ok(task) => {
                debug!("received a new task");
                task();
            }
            Err(_) => {
                debug!("thread exited because the job queue was closed");
                let _ = rx.done_tx.send(());
                break;
            }
        }
    }
}
