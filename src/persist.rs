//! Background persistence of the store to two flat files.
//!
//! Birds and sightings live in `birds` and `sights` inside the configured
//! data directory, one JSON record per line. On startup both files are
//! replayed into the store; afterwards a background thread rewrites them
//! wholesale on a fixed period, skipping any tick that would contend with
//! in-flight commands. Stopping the writer forces one final blocking
//! snapshot so a graceful shutdown loses nothing.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::snapshot::SnapshotLock;
use crate::store::Store;

// file names inside the data directory
const BIRDS_FILE_NAME: &str = "birds";
const SIGHTS_FILE_NAME: &str = "sights";
// how often a snapshot is attempted
const SAVE_PERIOD: Duration = Duration::from_secs(10);
// lines buffered per file before they are flushed to disk
const FLUSH_SIZE: usize = 100;
// how long stop() waits for an in-flight tick plus the final snapshot
const WAIT_TERMINATION_PERIOD: Duration = Duration::from_secs(10);

/// Keeps the two persisted files eventually consistent with the [`Store`]
/// and guarantees a final consistent write at shutdown.
///
/// [`Store`]: ./struct.Store.html
pub struct Persister {
    birds_path: PathBuf,
    sights_path: PathBuf,
    store: Arc<Store>,
    lock: SnapshotLock,
    worker: Option<PersistWorker>,
}

// handles to the background saver thread
struct PersistWorker {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

impl Persister {
    /// creates a persister writing into `data_dir`; nothing touches the disk
    /// until [`load`] runs
    ///
    /// [`load`]: #method.load
    pub fn new(data_dir: &Path, store: Arc<Store>, lock: SnapshotLock) -> Self {
        Persister {
            birds_path: data_dir.join(BIRDS_FILE_NAME),
            sights_path: data_dir.join(SIGHTS_FILE_NAME),
            store,
            lock,
            worker: None,
        }
    }

    /// Creates the data directory and files if they are missing, otherwise
    /// replays every persisted line into the store. Must complete before the
    /// server accepts any traffic.
    ///
    /// # Errors
    /// returns a transport error if the files cannot be created or read, or
    /// a decode error if a persisted line is malformed
    pub fn load(&self) -> Result<()> {
        if let Some(dir) = self.birds_path.parent() {
            fs::create_dir_all(dir)?;
        }
        create_if_missing(&self.birds_path)?;
        create_if_missing(&self.sights_path)?;

        let mut birds = 0_usize;
        replay(&self.birds_path, |bird| {
            birds += 1;
            self.store.add_bird(bird)
        })?;
        let mut sightings = 0_usize;
        replay(&self.sights_path, |sighting| {
            sightings += 1;
            self.store.add_sighting(sighting)
        })?;
        info!("loaded {} birds and {} sightings from disk", birds, sightings);
        Ok(())
    }

    /// Starts the background saver thread. Each tick attempts a non-blocking
    /// write acquisition of the snapshot lock and skips the tick entirely if
    /// a command is mid-execution.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = channel::bounded(1);
        let (done_tx, done_rx) = channel::bounded(1);
        let store = Arc::clone(&self.store);
        let lock = self.lock.clone();
        let birds_path = self.birds_path.clone();
        let sights_path = self.sights_path.clone();
        let handle = thread::spawn(move || {
            run_saver(&store, &lock, &birds_path, &sights_path, &stop_rx, &done_tx);
        });
        self.worker = Some(PersistWorker {
            stop_tx,
            done_rx,
            handle,
        });
        info!("background saver started, period {:?}", SAVE_PERIOD);
    }

    /// Stops the background saver after forcing one final blocking snapshot.
    /// Waits for the saver to quiesce, bounded by a fixed timeout, so the
    /// caller knows persistence is done before tearing down the store.
    pub fn stop(&mut self) {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return,
        };
        let _ = worker.stop_tx.send(());
        match worker.done_rx.recv_timeout(WAIT_TERMINATION_PERIOD) {
            Ok(()) => {
                let _ = worker.handle.join();
                info!("background saver stopped");
            }
            Err(_) => warn!("timed out waiting for the background saver to finish"),
        }
    }
}

// the background saver loop: periodic best-effort snapshots until a stop
// signal arrives, then one unconditional snapshot under the blocking write lock
fn run_saver(
    store: &Store,
    lock: &SnapshotLock,
    birds_path: &Path,
    sights_path: &Path,
    stop_rx: &Receiver<()>,
    done_tx: &Sender<()>,
) {
    let ticker = channel::tick(SAVE_PERIOD);
    loop {
        select! {
            recv(ticker) -> _ => {
                match lock.try_write() {
                    Some(_guard) => {
                        if let Err(e) = snapshot(store, birds_path, sights_path) {
                            // abandoned; retried on the next period
                            error!("error during saving store data to file: {}", e);
                        }
                    }
                    None => debug!("snapshot skipped, commands in flight"),
                }
            }
            recv(stop_rx) -> _ => {
                let _guard = lock.write();
                if let Err(e) = snapshot(store, birds_path, sights_path) {
                    error!("error during the final shutdown snapshot: {}", e);
                }
                let _ = done_tx.send(());
                return;
            }
        }
    }
}

// truncates and rewrites both files from a full snapshot of the store;
// the caller must hold the write side of the snapshot lock
fn snapshot(store: &Store, birds_path: &Path, sights_path: &Path) -> Result<()> {
    let mut birds_file = BatchedFile::create(birds_path)?;
    let mut sights_file = BatchedFile::create(sights_path)?;
    let mut birds = 0_usize;
    let mut sightings = 0_usize;
    for bird in store.snapshot_birds() {
        birds_file.push(serde_json::to_string(&bird)?)?;
        birds += 1;
        for sighting in store.sightings_of(&bird.name) {
            sights_file.push(serde_json::to_string(&sighting)?)?;
            sightings += 1;
        }
    }
    birds_file.finish()?;
    sights_file.finish()?;
    debug!("snapshot wrote {} birds and {} sightings", birds, sightings);
    Ok(())
}

// buffers lines and writes them to a freshly truncated file in fixed-size
// batches, bounding memory during a snapshot
struct BatchedFile {
    file: File,
    batch: Vec<String>,
}

impl BatchedFile {
    fn create(path: &Path) -> Result<Self> {
        Ok(BatchedFile {
            file: File::create(path)?,
            batch: Vec::with_capacity(FLUSH_SIZE),
        })
    }

    fn push(&mut self, line: String) -> Result<()> {
        self.batch.push(line);
        if self.batch.len() >= FLUSH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for line in self.batch.drain(..) {
            writeln!(self.file, "{}", line)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.flush()?;
        self.file.flush()?;
        Ok(())
    }
}

fn create_if_missing(path: &Path) -> Result<()> {
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

// reads a persisted file line by line, decoding each into a record and
// applying it to the store
fn replay<T, F>(path: &Path, mut apply: F) -> Result<()>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<()>,
{
    let file = File::open(path)?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(&line)?;
        apply(record)?;
    }
    Ok(())
}
