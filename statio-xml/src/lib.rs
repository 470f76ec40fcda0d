//! # Statio XML - Progressive Parsing for Streamed Documents
//!
//! A deliberately small XML subset for wire protocols that frame their
//! messages as elements (XMPP above all): elements, attributes (quoted with
//! `'` or `"`), a single text run per element, optional `ns:` prefixes, the
//! five built-in entities, and a recognized-then-discarded XML declaration.
//! No CDATA, comments, DTDs, or URI-bound namespaces.
//!
//! Three layers:
//!
//! - [`XmlElement`] / [`XmlAttribute`]: an insertion-ordered DOM whose
//!   lookups go by lowercased `ns:name` keys. Serializes with single-quoted
//!   attributes; [`escape`]/[`unescape`] handle entity replacement.
//! - [`ProgressiveParser`]: a forward-only tokenizer fed byte text in
//!   arbitrarily small pieces. Tokens come out of a pull queue; whatever
//!   cannot be tokenized yet stays buffered until the next
//!   [`append`](ProgressiveParser::append).
//! - [`DocumentParser`]: stacks tokens into rooted [`XmlElement`] trees and
//!   yields each completed document, failing with
//!   [`XmlError::InvalidFormat`] on mismatched end tags.
//!
//! ```rust
//! use statio_xml::DocumentParser;
//!
//! let mut parser = DocumentParser::new();
//! parser.append("<message from='a@example.com'><body>hi").unwrap();
//! assert!(parser.poll_document().is_none());
//!
//! parser.append("</body></message>").unwrap();
//! let message = parser.poll_document().unwrap();
//! assert_eq!(message.name(), "message");
//! assert_eq!(message.element("body").unwrap().value(), "hi");
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod document;
pub(crate) mod dom;
pub(crate) mod progressive;

use thiserror::Error;

pub use document::DocumentParser;
pub use dom::{escape, unescape, XmlAttribute, XmlElement};
pub use progressive::{ProgressiveParser, XmlToken};

/// Errors from the document layer.
#[derive(Debug, Error)]
pub enum XmlError {
    /// The document is not well formed (for example, an end tag that does
    /// not match the open element).
    #[error("invalid xml: {0}")]
    InvalidFormat(String),

    /// The tokenizer was driven out of sequence; this is an internal bug.
    #[error(transparent)]
    Machine(#[from] statio::MachineError),
}
