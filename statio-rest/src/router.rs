//! The router, its per-connection request collectors, and the static-file
//! fallback.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::rc::Rc;

use bytes::BytesMut;
use log::warn;

use statio_executor::Scheduler;
use statio_http::{HttpError, HttpHeader, HttpServer, HttpServerConnection};

use crate::pattern::pattern_matches;

const SERVER_NAME: &str = "statio";
const FILE_CHUNK_SIZE: usize = 4096;

/// A completed request, handed to route handlers.
pub struct Request {
    connection: HttpServerConnection,
    method: String,
    path: String,
    headers: Vec<HttpHeader>,
    content: BytesMut,
    matches: HashMap<String, String>,
}

impl Request {
    /// The connection to respond on.
    pub fn connection(&self) -> &HttpServerConnection {
        &self.connection
    }

    /// The request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path, query string included.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All request headers, in arrival order.
    pub fn headers(&self) -> &[HttpHeader] {
        &self.headers
    }

    /// The request body.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The request body as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// The value a `{name}` placeholder captured, if the matched pattern had
    /// one.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.matches.get(key).map(String::as_str)
    }
}

/// A route handler. Returning `Err` produces a 400 response carrying the
/// error text.
pub type Handler = Rc<dyn Fn(&Request) -> Result<(), Box<dyn Error>>>;

#[derive(Clone, Default)]
struct RouteConfig {
    handlers: HashMap<String, Handler>,
}

struct RouterInner {
    server: HttpServer,
    scheduler: Scheduler,
    /// Keyed by pattern; requests try patterns in sorted-key order.
    routes: BTreeMap<String, RouteConfig>,
    document_root: Option<PathBuf>,
}

/// Routes requests on an [`HttpServer`] to registered handlers, falling back
/// to static files under the document root.
#[derive(Clone)]
pub struct Router {
    inner: Rc<RefCell<RouterInner>>,
}

impl Router {
    /// Creates a router. `document_root` enables the static-file fallback;
    /// without one, unrouted requests answer 404.
    pub fn new(scheduler: &Scheduler, document_root: Option<PathBuf>) -> Result<Self, HttpError> {
        let server = HttpServer::new(scheduler)?;
        let inner = Rc::new(RefCell::new(RouterInner {
            server: server.clone(),
            scheduler: scheduler.clone(),
            routes: BTreeMap::new(),
            document_root,
        }));

        let weak = Rc::downgrade(&inner);
        server.client_accepted().subscribe(move |accepted| {
            if let Some(inner) = weak.upgrade() {
                Router::collect(&inner, accepted.connection.clone());
            }
        });

        Ok(Self { inner })
    }

    /// Registers (or extends) the configuration for `pattern`.
    ///
    /// Requests try patterns in sorted pattern order, whatever the
    /// registration order was; overlapping patterns therefore resolve to the
    /// lexicographically earlier one, so avoid registering overlaps.
    pub fn configure(&self, pattern: &str) -> RouteBinding {
        self.inner
            .borrow_mut()
            .routes
            .entry(pattern.to_string())
            .or_default();
        RouteBinding {
            inner: Rc::clone(&self.inner),
            pattern: pattern.to_string(),
        }
    }

    /// Binds the listening socket.
    pub fn bind(&self, port: u16) -> Result<(), HttpError> {
        self.inner.borrow().server.bind(port)
    }

    /// The bound local address.
    pub fn local_endpoint(&self) -> Result<statio_net::Endpoint, HttpError> {
        self.inner.borrow().server.local_endpoint()
    }

    /// Starts listening.
    pub fn listen(&self, backlog: i32) -> Result<(), HttpError> {
        self.inner.borrow().server.listen(backlog)
    }

    /// Accumulates one connection's request pieces and routes each completed
    /// request.
    fn collect(inner: &Rc<RefCell<RouterInner>>, connection: HttpServerConnection) {
        #[derive(Default)]
        struct Collector {
            method: String,
            path: String,
            headers: Vec<HttpHeader>,
            content: BytesMut,
        }

        let collector = Rc::new(RefCell::new(Collector::default()));

        {
            let collector = Rc::clone(&collector);
            connection.request_started().subscribe(move |started| {
                let mut collector = collector.borrow_mut();
                collector.method = started.method.clone();
                collector.path = started.path.clone();
                collector.headers.clear();
                collector.content.clear();
            });
        }
        {
            let collector = Rc::clone(&collector);
            connection.header_received().subscribe(move |header| {
                collector.borrow_mut().headers.push(header.clone());
            });
        }
        {
            let collector = Rc::clone(&collector);
            connection.content_received().subscribe(move |chunk| {
                collector.borrow_mut().content.extend_from_slice(chunk);
            });
        }
        {
            let collector = Rc::clone(&collector);
            let weak = Rc::downgrade(inner);
            let connection = connection.clone();
            connection.clone().request_ended().subscribe(move |_| {
                let Some(inner) = weak.upgrade() else { return };
                let request = {
                    let collector = collector.borrow();
                    Request {
                        connection: connection.clone(),
                        method: collector.method.clone(),
                        path: collector.path.clone(),
                        headers: collector.headers.clone(),
                        content: collector.content.clone(),
                        matches: HashMap::new(),
                    }
                };
                Router::route(&inner, request);
            });
        }
    }

    fn route(inner: &Rc<RefCell<RouterInner>>, mut request: Request) {
        let routes = inner.borrow().routes.clone();

        for (pattern, config) in routes {
            let mut matches = HashMap::new();
            if !pattern_matches(&pattern, &request.path, &mut matches) {
                continue;
            }
            let Some(handler) = config.handlers.get(&request.method.to_uppercase()) else {
                continue;
            };

            request.matches = matches;
            if let Err(err) = handler(&request) {
                warn!("handler for {pattern} failed: {err}");
                Self::respond_error(&request, &err.to_string());
            }
            return;
        }

        Self::serve_file(inner, &request);
    }

    fn respond_error(request: &Request, reason: &str) {
        let result = request
            .connection
            .begin("HTTP/1.1", 400, "Bad Request")
            .and_then(|c| c.send_header("Server", SERVER_NAME))
            .and_then(|c| c.send_header("Content-Type", "text/plain"))
            .and_then(|c| c.send(reason.as_bytes()))
            .and_then(|c| c.end());
        if let Err(err) = result {
            warn!("error response failed: {err}");
        }
    }

    fn respond_empty(request: &Request, code: i32, description: &str, location: Option<&str>) {
        let connection = &request.connection;
        let result = connection
            .begin("HTTP/1.1", code, description)
            .and_then(|c| c.send_header("Server", SERVER_NAME))
            .and_then(|c| match location {
                Some(location) => c.send_header("Location", location),
                None => c.send_header("Content-Type", "text/plain"),
            })
            .and_then(|c| c.send(b""))
            .and_then(|c| c.end());
        if let Err(err) = result {
            warn!("response failed: {err}");
        }
    }

    fn serve_file(inner: &Rc<RefCell<RouterInner>>, request: &Request) {
        let (document_root, scheduler) = {
            let guard = inner.borrow();
            (guard.document_root.clone(), guard.scheduler.clone())
        };
        let Some(document_root) = document_root else {
            Self::respond_empty(request, 404, "Not Found", None);
            return;
        };

        let full_path = PathBuf::from(format!("{}{}", document_root.display(), request.path));
        if full_path.is_dir() {
            let location = format!("{}/index.html", request.path);
            Self::respond_empty(request, 303, "See Other", Some(&location));
            return;
        }

        match File::open(&full_path) {
            Ok(file) => {
                let started = request
                    .connection
                    .begin("HTTP/1.1", 200, "OK")
                    .and_then(|c| c.send_header("Server", SERVER_NAME));
                match started {
                    Ok(_) => stream_chunks(&scheduler, request.connection.clone(), file),
                    Err(err) => warn!("file response failed: {err}"),
                }
            }
            Err(_) => Self::respond_empty(request, 404, "Not Found", None),
        }
    }
}

/// Streams a file to a connection one chunk per loop turn, then ends the
/// response. The file handle is owned by the in-flight callback chain.
fn stream_chunks(scheduler: &Scheduler, connection: HttpServerConnection, mut file: File) {
    let next = scheduler.clone();
    scheduler.invoke(move || {
        let mut chunk = vec![0u8; FILE_CHUNK_SIZE];
        match file.read(&mut chunk) {
            Ok(0) => {
                if let Err(err) = connection.end() {
                    warn!("file response could not be ended: {err}");
                }
            }
            Ok(count) => match connection.send(&chunk[..count]) {
                Ok(_) => stream_chunks(&next, connection, file),
                Err(err) => warn!("file chunk could not be sent: {err}"),
            },
            Err(err) => {
                warn!("file read failed: {err}");
                if let Err(err) = connection.end() {
                    warn!("file response could not be ended: {err}");
                }
            }
        }
    });
}

/// Builder returned by [`Router::configure`]; binds handlers to methods.
pub struct RouteBinding {
    inner: Rc<RefCell<RouterInner>>,
    pattern: String,
}

impl RouteBinding {
    /// Binds `handler` to an arbitrary method.
    pub fn bind(
        self,
        method: &str,
        handler: impl Fn(&Request) -> Result<(), Box<dyn Error>> + 'static,
    ) -> Self {
        self.inner
            .borrow_mut()
            .routes
            .entry(self.pattern.clone())
            .or_default()
            .handlers
            .insert(method.to_uppercase(), Rc::new(handler));
        self
    }

    /// Binds `handler` to GET.
    pub fn get(self, handler: impl Fn(&Request) -> Result<(), Box<dyn Error>> + 'static) -> Self {
        self.bind("GET", handler)
    }

    /// Binds `handler` to PUT.
    pub fn put(self, handler: impl Fn(&Request) -> Result<(), Box<dyn Error>> + 'static) -> Self {
        self.bind("PUT", handler)
    }

    /// Binds `handler` to POST.
    pub fn post(self, handler: impl Fn(&Request) -> Result<(), Box<dyn Error>> + 'static) -> Self {
        self.bind("POST", handler)
    }

    /// Binds `handler` to DELETE.
    pub fn delete(self, handler: impl Fn(&Request) -> Result<(), Box<dyn Error>> + 'static) -> Self {
        self.bind("DELETE", handler)
    }
}

#[cfg(test)]
mod tests {
    use statio_executor::EventLoop;

    use super::*;

    #[test]
    fn patterns_are_tried_in_sorted_order_not_registration_order() {
        let event_loop = EventLoop::new();
        let router = Router::new(&event_loop.scheduler(), None).unwrap();

        router.configure("/entities/{entityId}").get(|_| Ok(()));
        router.configure("/entities").get(|_| Ok(()));
        router.configure("/about").get(|_| Ok(()));

        let patterns: Vec<String> = router.inner.borrow().routes.keys().cloned().collect();
        assert_eq!(patterns, ["/about", "/entities", "/entities/{entityId}"]);
    }

    #[test]
    fn rebinding_a_pattern_extends_its_method_table() {
        let event_loop = EventLoop::new();
        let router = Router::new(&event_loop.scheduler(), None).unwrap();

        router.configure("/items").get(|_| Ok(()));
        router.configure("/items").post(|_| Ok(()));

        let inner = router.inner.borrow();
        let config = &inner.routes["/items"];
        assert!(config.handlers.contains_key("GET"));
        assert!(config.handlers.contains_key("POST"));
        assert_eq!(inner.routes.len(), 1);
    }
}
