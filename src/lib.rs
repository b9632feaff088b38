#![deny(missing_docs)]
//! A multithreaded, persistent client-server store for bird observations.
//!
//! This crate provides the server components themselves, as well as an
//! [`aviary-server`] and [`aviary-client`] executable used to run and talk
//! to the store. Data is exchanged over persistent TCP connections using a
//! length-prefixed binary framing protocol.
//!
//! ## Supported Operations
//! The store supports six commands:
//!
//! - `ADD` a new bird (name, color, weight, height); names are unique
//! - `REMOVE` a bird by name, cascading to all of its sightings
//! - `ADD_SIGHT` to record a sighting (location, timestamp) of a known bird
//! - `LIST` all birds, sorted by name
//! - `LIST_SIGHTS` of birds matching a name pattern within a time range
//! - `QUIT` to stop the server gracefully
//!
//! See the [`Request`] and [`Response`] types and the [`Store`] for the
//! exact contracts of these operations.
//!
//! ## Architecture
//! Socket bytes flow through a per-connection [`FrameReader`] into the
//! [`Dispatcher`], which executes the decoded command against the [`Store`]
//! on a bounded worker pool and writes the framed response back. A single
//! thread drives all socket readiness with a mio poll loop
//! ([`AviaryServer`]), so no thread is ever parked on a slow peer. A
//! background [`Persister`] keeps two flat files (one JSON record per line)
//! consistent with the store, coordinating with command execution through a
//! shared [`SnapshotLock`], and writes one final snapshot at shutdown.
//!
//! ## Custom Protocol
//! Every message on the wire, in both directions, is a 4-byte big-endian
//! length followed by that many bytes of JSON payload. Requests decode to
//! [`Request`]; the server always answers with a [`Response`] carrying
//! either result data or a success flag plus error message.
//!
//! [`aviary-server`]: ./bin/aviary-server.rs
//! [`aviary-client`]: ./bin/aviary-client.rs
//! [`Request`]: ./enum.Request.html
//! [`Response`]: ./struct.Response.html
//! [`Store`]: ./struct.Store.html
//! [`FrameReader`]: ./struct.FrameReader.html
//! [`Dispatcher`]: ./struct.Dispatcher.html
//! [`AviaryServer`]: ./struct.AviaryServer.html
//! [`Persister`]: ./struct.Persister.html
//! [`SnapshotLock`]: ./struct.SnapshotLock.html

pub use client::AviaryClient;
pub use config::ServerConfig;
pub use dispatch::{ConnectionHandle, Dispatcher};
pub use error::{AviaryError, Result};
pub use frame::{encode_frame, FrameReader};
pub use message::{Request, Response, ResultData};
pub use persist::Persister;
pub use server::AviaryServer;
pub use snapshot::SnapshotLock;
pub use store::{Bird, Sighting, Store};
pub use thread_pool::{SharedQueueThreadPool, ThreadPool};

mod client;
mod config;
mod dispatch;
mod error;
mod frame;
mod message;
mod persist;
mod server;
mod snapshot;
mod store;
pub mod thread_pool;
