//! Executes decoded commands on the worker pool and writes responses back.
//!
//! Submission is fire-and-forget: the multiplexer hands over a raw frame
//! payload and goes back to polling; a worker decodes it, runs it against
//! the store under the snapshot lock's read side, and writes the framed
//! response to the originating connection. Store-level failures become
//! unsuccessful responses; only transport failures are reported back to the
//! multiplexer, which then closes the connection.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam::channel::Sender;
use mio::net::TcpStream;
use mio::Token;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::frame::encode_frame;
use crate::message::{self, Request, Response, ResultData};
use crate::snapshot::SnapshotLock;
use crate::store::{Bird, Sighting, Store};
use crate::thread_pool::{SharedQueueThreadPool, ThreadPool};

/// Shared handle a worker uses to write a response back to a connection.
/// The multiplexer holds the same handle for reading; both sides take the
/// mutex only briefly.
pub type ConnectionHandle = Arc<Mutex<TcpStream>>;

// bound on waiting for in-flight commands during shutdown
const POOL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
// backoff while a non-blocking socket's outbound buffer is full
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Runs commands against the [`Store`] on a bounded worker pool and owns
/// the stop flag that a QUIT command raises to shut the server down.
///
/// [`Store`]: ./struct.Store.html
pub struct Dispatcher {
    pool: SharedQueueThreadPool,
    store: Arc<Store>,
    lock: SnapshotLock,
    stop: Arc<AtomicBool>,
    // connections whose response write failed; drained by the multiplexer
    dead_tx: Sender<Token>,
}

impl Dispatcher {
    /// creates a dispatcher with `workers` threads
    ///
    /// # Errors
    /// returns an error if the worker pool could not be started
    pub fn new(
        workers: u32,
        store: Arc<Store>,
        lock: SnapshotLock,
        stop: Arc<AtomicBool>,
        dead_tx: Sender<Token>,
    ) -> Result<Self> {
        let pool = SharedQueueThreadPool::new(workers)?;
        info!("started worker pool with {} threads", workers);
        Ok(Dispatcher {
            pool,
            store,
            lock,
            stop,
            dead_tx,
        })
    }

    /// Enqueues one raw frame payload for execution and returns immediately.
    /// The response is written asynchronously to `conn`; a failed write
    /// reports `token` on the dead-connection channel instead of surfacing.
    pub fn submit(&self, token: Token, conn: ConnectionHandle, payload: Vec<u8>) {
        let store = Arc::clone(&self.store);
        let lock = self.lock.clone();
        let stop = Arc::clone(&self.stop);
        let dead_tx = self.dead_tx.clone();
        self.pool.spawn(move || {
            if let Err(e) = process(&store, &lock, &stop, &payload, &conn) {
                error!(
                    "failed sending a response on connection {}: {}, it will be closed",
                    token.0, e
                );
                let _ = dead_tx.send(token);
            }
        });
    }

    /// Refuses new work and waits, bounded, for in-flight commands to finish.
    pub fn shutdown(&mut self) {
        self.pool.shutdown(POOL_SHUTDOWN_TIMEOUT);
    }
}

/// Decodes and executes one command, then writes the response.
/// Returns `Err` only for transport failures; everything else is folded
/// into the response itself.
fn process(
    store: &Store,
    lock: &SnapshotLock,
    stop: &AtomicBool,
    payload: &[u8],
    conn: &ConnectionHandle,
) -> io::Result<()> {
    let request = match message::decode::<Request>(payload) {
        Ok(request) => request,
        Err(e) => {
            // the frame itself was well-formed, so the connection is still
            // synchronized; answer with a generic failure and keep it open
            debug!("received an undecodable request payload: {}", e);
            return send(conn, &Response::err(format!("malformed request: {}", e)));
        }
    };
    debug!("executing request: {:?}", request);

    let quit = matches!(request, Request::Quit);
    let response = execute(store, lock, request);
    send(conn, &response)?;

    if quit {
        info!("received command QUIT, server will be stopped");
        stop.store(true, Ordering::SeqCst);
    }
    Ok(())
}

// runs one request against the store while holding the read side of the
// snapshot lock; the lock is released before the response hits the socket
fn execute(store: &Store, lock: &SnapshotLock, request: Request) -> Response {
    let _guard = lock.read();
    let outcome = match request {
        Request::Add {
            name,
            color,
            weight,
            height,
        } => store
            .add_bird(Bird::new(name, color, height, weight))
            .map(|_| None),
        Request::Remove { name } => store.remove_bird(&name).map(|_| None),
        Request::AddSight {
            name,
            location,
            timestamp,
        } => store
            .add_sighting(Sighting {
                name,
                location,
                timestamp,
            })
            .map(|_| None),
        Request::List => Ok(Some(ResultData::Birds(store.list_birds()))),
        Request::ListSights { name, start, end } => store
            .find_sightings(&name, start, end)
            .map(|sightings| Some(ResultData::Sightings(sightings))),
        Request::Quit => Ok(None),
    };
    match outcome {
        Ok(Some(result)) => Response::with_result(result),
        Ok(None) => Response::ok(),
        Err(e) => Response::err(e.to_string()),
    }
}

// frames and writes one response to the connection
fn send(conn: &ConnectionHandle, response: &Response) -> io::Result<()> {
    let payload = message::encode(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let framed = encode_frame(&payload);
    let mut stream = conn.lock().unwrap_or_else(PoisonError::into_inner);
    write_all_nonblocking(&mut stream, &framed)
}

// the stream is registered non-blocking with the multiplexer, so a full
// outbound buffer shows up as WouldBlock; workers wait it out briefly
// rather than surfacing it as a failure
fn write_all_nonblocking(stream: &mut TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed during a response write",
                ))
            }
            Ok(written) => buf = &buf[written..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(WRITE_RETRY_DELAY),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_robin() -> Request {
        Request::Add {
            name: "robin".to_owned(),
            color: "red".to_owned(),
            weight: 1.0,
            height: 2.0,
        }
    }

    #[test]
    fn store_failures_become_unsuccessful_responses() {
        let store = Store::new();
        let lock = SnapshotLock::new();
        assert!(execute(&store, &lock, add_robin()).success);

        let duplicate = execute(&store, &lock, add_robin());
        assert!(!duplicate.success);
        assert!(duplicate.error.unwrap().contains("duplicate key"));

        let missing = execute(
            &store,
            &lock,
            Request::Remove {
                name: "sparrow".to_owned(),
            },
        );
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("not found"));
    }

    #[test]
    fn list_carries_result_data() {
        let store = Store::new();
        let lock = SnapshotLock::new();
        execute(&store, &lock, add_robin());
        let response = execute(&store, &lock, Request::List);
        assert!(response.success);
        match response.result {
            Some(ResultData::Birds(birds)) => {
                assert_eq!(birds.len(), 1);
                assert_eq!(birds[0].name, "robin");
            }
            other => panic!("expected birds, got {:?}", other),
        }
    }

    #[test]
    fn malformed_filter_becomes_an_unsuccessful_response() {
        let store = Store::new();
        let lock = SnapshotLock::new();
        let response = execute(
            &store,
            &lock,
            Request::ListSights {
                name: "(unclosed".to_owned(),
                start: 0,
                end: 10,
            },
        );
        assert!(!response.success);
    }
}
