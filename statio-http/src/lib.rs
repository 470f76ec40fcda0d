//! # Statio HTTP - Incremental HTTP/1.1 Client and Server
//!
//! Wire-level HTTP/1.1 driven as state machines over the non-blocking
//! transports: every byte that arrives is appended to a per-connection buffer
//! and the machine is re-fired; whatever cannot be parsed yet simply stays
//! buffered until the next read. Bodies are framed by `Content-Length`,
//! `Transfer-Encoding: chunked` or `Connection: close` (read until EOF), and
//! the three framings latch independently once their headers are seen.
//!
//! Two layers per role:
//!
//! - [`HttpClientProtocol`] / [`HttpServerProtocol`]: pure machines; calls
//!   and bytes in, [`ClientOutput`]/[`ServerOutput`] values out. Fully
//!   testable without a socket.
//! - [`HttpClient`] / [`HttpServer`] + [`HttpServerConnection`]: the same
//!   machines strapped onto `statio-net` transports, exposing subscriber
//!   events in wire order (`response_started` → `header_received`* →
//!   `content_received`* → `response_ended`, and the request-side mirror).
//!
//! Requests and responses are *streamed*, not materialized: callers write
//! `begin` / `send_header` / `send` / `end`, and body chunks surface as they
//! arrive. The client automatically sends `Transfer-Encoding: chunked` when
//! body sending begins; the server answers a `Connection: close` request with
//! a `Connection: close` response, raw body bytes, and a disconnect after the
//! end of the response.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod client;
pub(crate) mod server;
pub(crate) mod wire;

use statio::MachineError;
use statio_net::NetError;
use thiserror::Error;

pub use client::{ClientOutput, HttpClient, HttpClientProtocol};
pub use server::{
    HttpClientAccepted, HttpServer, HttpServerConnection, HttpServerProtocol, ServerOutput,
};
pub use wire::{HttpHeader, RequestStarted, ResponseStarted};

/// Errors surfaced by the HTTP layers.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The underlying transport failed.
    #[error(transparent)]
    Net(#[from] NetError),

    /// A request/response call was made out of sequence; this is a caller
    /// bug.
    #[error(transparent)]
    Machine(#[from] MachineError),
}
