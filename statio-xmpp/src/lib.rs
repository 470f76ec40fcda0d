//! # Statio XMPP - Jabber Client Sessions
//!
//! An XMPP client built from the rest of the workspace: bytes arrive over a
//! [`TlsClient`](statio_net::TlsClient), pass through the progressive and
//! document XML parsers, and drive a login state machine through the full
//! session flow:
//!
//! 1. open the stream and wait for the server's `<stream:stream>`;
//! 2. authenticate with SASL PLAIN; a `<bad-protocol/>` failure triggers
//!    in-band account registration, `<not-authorized/>` is a permanent
//!    credential failure;
//! 3. re-open the stream, bind a resource (learning the full JID), create
//!    the session;
//! 4. announce presence and keep the stream alive with a single space every
//!    minute.
//!
//! In session, roster subscription requests are auto-accepted, `subscribe`
//! presence gets a `subscribed` reply, and inbound presence/messages surface
//! as events.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod client;
pub(crate) mod sasl;
pub(crate) mod stanza;

use statio::MachineError;
use statio_net::NetError;
use statio_xml::XmlError;
use thiserror::Error;

pub use client::{MessageReceived, PresenceReceived, XmppClient};
pub use sasl::plain_credentials;

/// Errors surfaced by the XMPP client.
#[derive(Debug, Error)]
pub enum XmppError {
    /// The underlying transport failed.
    #[error(transparent)]
    Net(#[from] NetError),

    /// A lifecycle call was made out of sequence; this is a caller bug.
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// The server sent XML the parsers reject.
    #[error(transparent)]
    Xml(#[from] XmlError),
}
