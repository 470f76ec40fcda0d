//! # Statio Net - Non-Blocking Transports
//!
//! `statio-net` owns every socket in the workspace. It provides:
//!
//! - [`Socket`]: a thin owned-fd wrapper over the OS socket API: non-blocking
//!   connect, readiness polling, counted reads, partial writes, UDP datagrams.
//! - [`TcpClient`] / [`TcpServer`]: connected-stream transports driven as
//!   state machines on the cooperative event loop. Clients expose three
//!   events (`connected`, `data_received`, `disconnected`) and a `send`
//!   queue whose wire order matches call order.
//! - [`TlsClient`] / [`TlsServer`]: the same contract with a real TLS
//!   handshake phase in between; `connected` fires only once the handshake
//!   has completed.
//!
//! ## Polling model
//!
//! Nothing here blocks. A connecting client polls write-readiness at a fixed
//! interval (1 ms by default); a connected client polls read-readiness the
//! same way and drains at most one buffer's worth (4096 bytes by default) per
//! turn, rescheduling itself immediately while data keeps arriving. Servers
//! poll their listening socket and hand each accepted connection to a fresh
//! non-blocking client owned by an internal arena; the arena entry is removed
//! one loop turn after the client disconnects.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod socket;
pub(crate) mod tcp_client;
pub(crate) mod tcp_server;
pub(crate) mod tls_client;
pub(crate) mod tls_server;

use statio::MachineError;
use thiserror::Error;

pub use socket::{Endpoint, Interest, Socket, SocketError};
pub use tcp_client::TcpClient;
pub use tcp_server::{ClientAccepted, TcpServer};
pub use tls_client::TlsClient;
pub use tls_server::{TlsClientAccepted, TlsServer};

/// Errors surfaced by the transport clients and servers.
#[derive(Debug, Error)]
pub enum NetError {
    /// An OS-level socket operation failed.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// A trigger was fired out of sequence; this is a caller bug.
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// The TLS engine rejected the configuration or the peer.
    #[error("tls: {0}")]
    Tls(String),
}
