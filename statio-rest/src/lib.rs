//! # Statio REST - Pattern-Routed Request Handling
//!
//! A thin routing layer over [`statio_http::HttpServer`]. Operators register
//! handlers per path pattern and method:
//!
//! ```rust,no_run
//! use statio_executor::EventLoop;
//! use statio_rest::Router;
//!
//! let mut event_loop = EventLoop::new();
//! let router = Router::new(&event_loop.scheduler(), Some("www".into())).unwrap();
//!
//! router
//!     .configure("/entities/{entityId}")
//!     .get(|request| {
//!         let id = request.param("entityId").unwrap_or_default();
//!         request
//!             .connection()
//!             .begin("HTTP/1.1", 200, "OK")?
//!             .send_header("Content-Type", "application/json")?
//!             .send(format!("{{ \"Id\": {id} }}").as_bytes())?
//!             .end()?;
//!         Ok(())
//!     });
//!
//! router.bind(9091).unwrap();
//! router.listen(128).unwrap();
//! event_loop.run();
//! ```
//!
//! Patterns split on `?`, `/` and `&`; segments match count-for-count, and
//! `{name}` placeholders capture into the request's parameter map. Patterns
//! are tried in sorted pattern order (not registration order); the first one
//! that matches the path *and* has a handler for the method wins, so avoid
//! registering overlapping patterns. Handler errors become `400` responses
//! carrying the error text. Requests nothing matches fall back to static
//! files under the document root: directories redirect (303) to their
//! `index.html`, missing files answer 404, and file bodies stream out chunk
//! by chunk on the event loop.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod pattern;
pub(crate) mod router;

pub use router::{Request, RouteBinding, Router};
