//! The readiness-based connection multiplexer.
//!
//! A single thread owns the listening socket and a mio poll registry. Each
//! accepted connection is registered for read readiness and given its own
//! [`FrameReader`]; completed frame payloads are handed to the
//! [`Dispatcher`] and the loop goes straight back to polling, so one slow
//! or hostile peer can never stall the others.
//!
//! [`FrameReader`]: ./struct.FrameReader.html
//! [`Dispatcher`]: ./struct.Dispatcher.html

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam::channel::{self, Receiver};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::dispatch::{ConnectionHandle, Dispatcher};
use crate::error::Result;
use crate::frame::FrameReader;
use crate::persist::Persister;
use crate::snapshot::SnapshotLock;
use crate::store::Store;

/// the listening socket's token; connection tokens count up from 1
const LISTENER: Token = Token(0);
// the poll timeout bounds how long a stop signal can go unobserved
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
// scratch buffer for each socket read
const READ_BUFFER_SIZE: usize = 256;
const EVENTS_CAPACITY: usize = 128;

// per-connection state: the frame reader is the only mutable session state,
// and it is touched exclusively by the multiplexer thread
struct Connection {
    stream: ConnectionHandle,
    reader: FrameReader,
}

/// A TCP server for the aviary store.
///
/// Construction wires the components together explicitly, in dependency
/// order: store, snapshot lock, persister, dispatcher. [`run`] then drives
/// the poll loop until a QUIT command raises the stop flag, at which point
/// the dispatcher is drained and the persister writes its final snapshot.
///
/// # Example
/// ```rust,no_run
/// use aviary::{AviaryServer, ServerConfig};
/// # use aviary::Result;
/// # fn main() -> Result<()> {
/// let config = ServerConfig::build("4000", "serverdata", "4")?;
/// let server = AviaryServer::new(config)?;
/// server.run()?;
/// # Ok(())
/// # }
/// ```
///
/// [`run`]: #method.run
pub struct AviaryServer {
    config: ServerConfig,
    dispatcher: Dispatcher,
    persister: Persister,
    stop: Arc<AtomicBool>,
    dead_rx: Receiver<Token>,
}

impl AviaryServer {
    /// Builds the full component stack for `config` and replays any
    /// persisted data into the store. No socket is opened yet.
    ///
    /// # Errors
    /// returns an error if the persisted files cannot be read or the worker
    /// pool cannot be started
    pub fn new(config: ServerConfig) -> Result<AviaryServer> {
        let store = Arc::new(Store::new());
        let lock = SnapshotLock::new();

        let persister = Persister::new(&config.data_dir, Arc::clone(&store), lock.clone());
        persister.load()?;

        let stop = Arc::new(AtomicBool::new(false));
        let (dead_tx, dead_rx) = channel::unbounded();
        let dispatcher = Dispatcher::new(config.workers, store, lock, Arc::clone(&stop), dead_tx)?;

        Ok(AviaryServer {
            config,
            dispatcher,
            persister,
            stop,
            dead_rx,
        })
    }

    /// Binds the listening socket and runs the readiness loop until the stop
    /// flag is raised by a QUIT command. On exit the listener is closed, the
    /// worker pool is drained and the persister writes its final snapshot;
    /// a fatal polling error goes through the same teardown before it is
    /// returned.
    ///
    /// # Errors
    /// returns an error if the listening socket cannot be bound or polling
    /// fails; per-connection errors only ever close that connection
    pub fn run(mut self) -> Result<()> {
        let addr = self.config.socket_addr();
        let mut poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        self.persister.start();
        info!("listening on {}", addr);

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut connections: HashMap<Token, Connection> = HashMap::new();
        let mut next_token = 1_usize;
        let mut outcome: Result<()> = Ok(());

        while !self.stop.load(Ordering::SeqCst) {
            if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // fall through to the teardown below so the worker pool is
                // drained and the final snapshot still runs
                error!("polling failed: {}", e);
                outcome = Err(e.into());
                break;
            }

            // connections whose response write failed on a worker thread
            for token in self.dead_rx.try_iter() {
                close_connection(&poll, &mut connections, token);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => {
                        accept_clients(&poll, &listener, &mut connections, &mut next_token)
                    }
                    token => drive_connection(&poll, &mut connections, token, &self.dispatcher),
                }
            }
        }

        info!("shutting the server down");
        if let Err(e) = poll.registry().deregister(&mut listener) {
            debug!("could not deregister the listener: {}", e);
        }
        drop(listener);
        self.dispatcher.shutdown();
        self.persister.stop();
        info!("server stopped");
        outcome
    }
}

// accepts until the listener reports WouldBlock, registering each new
// connection for read readiness with a fresh frame reader attached
fn accept_clients(
    poll: &Poll,
    listener: &TcpListener,
    connections: &mut HashMap<Token, Connection>,
    next_token: &mut usize,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let token = Token(*next_token);
                *next_token += 1;
                if let Err(e) = poll
                    .registry()
                    .register(&mut stream, token, Interest::READABLE)
                {
                    error!("could not register client {}: {}", peer, e);
                    continue;
                }
                connections.insert(
                    token,
                    Connection {
                        stream: Arc::new(Mutex::new(stream)),
                        reader: FrameReader::new(),
                    },
                );
                info!("new client connected from {}", peer);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!("accepting a connection failed: {}", e);
                break;
            }
        }
    }
}

// pumps one readable connection; closing it on end-of-stream or error
fn drive_connection(
    poll: &Poll,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    dispatcher: &Dispatcher,
) {
    let closed = match connections.get_mut(&token) {
        Some(conn) => match read_ready(conn, token, dispatcher) {
            Ok(eof) => eof,
            Err(e) => {
                info!(
                    "read failed on connection {}: {}, it will be closed",
                    token.0, e
                );
                true
            }
        },
        // already closed via the dead-connection channel; stale event
        None => false,
    };
    if closed {
        close_connection(poll, connections, token);
    }
}

// reads until WouldBlock, feeding every read into the connection's frame
// reader and dispatching each completed payload; Ok(true) means the peer
// closed its end
fn read_ready(conn: &mut Connection, token: Token, dispatcher: &Dispatcher) -> io::Result<bool> {
    let mut buf = [0_u8; READ_BUFFER_SIZE];
    loop {
        let read = {
            let mut stream = conn.stream.lock().unwrap_or_else(PoisonError::into_inner);
            stream.read(&mut buf)
        };
        match read {
            Ok(0) => return Ok(true),
            Ok(count) => {
                // re-feed the remainder whenever a frame completes mid-chunk,
                // so pipelined requests in one read are all dispatched
                let mut offset = 0;
                while offset < count {
                    let (consumed, payload) =
                        conn.reader.push(&buf[offset..count], count - offset);
                    offset += consumed;
                    if let Some(payload) = payload {
                        dispatcher.submit(token, Arc::clone(&conn.stream), payload);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn close_connection(poll: &Poll, connections: &mut HashMap<Token, Connection>, token: Token) {
    if let Some(conn) = connections.remove(&token) {
        let mut stream = conn.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = poll.registry().deregister(&mut *stream) {
            debug!("could not deregister connection {}: {}", token.0, e);
        }
        info!("connection {} closed", token.0);
    }
}
