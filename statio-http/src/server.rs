//! HTTP/1.1 server: per-connection request parsing and response building.
//!
//! [`HttpServerProtocol`] mirrors the client machine with the roles swapped:
//! the parse side reads requests (same latched framing triggers, same
//! Connection-close cross-products), the build side writes responses. The
//! close twin-tree matters on the way out too: when the request carried
//! `Connection: close`, the response's last header becomes
//! `Connection: close` instead of `Transfer-Encoding: chunked`, body bytes go
//! out raw, and the connection is dropped after the response ends. Otherwise
//! responses are chunked and the connection is kept for the next request.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use bytes::BytesMut;
use log::warn;

use statio::{Event, StateMachine};
use statio_executor::Scheduler;
use statio_net::{Endpoint, TcpClient, TcpServer};

use crate::wire::{
    parse_chunk_size, parse_header_line, parse_start_line, take_content, take_crlf, HeaderLine,
};
use crate::{HttpError, HttpHeader, RequestStarted};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum State {
    RequestActionLine,
    RequestHeaderLine,
    RequestHeaderLineClose,
    RequestHeaderLineContentLength,
    RequestHeaderLineChunked,
    RequestHeaderLineContentLengthClose,
    RequestHeaderLineChunkedClose,
    RequestContent,
    RequestChunkSize,
    RequestChunk,
    EndOfRequest,
    ResponseActionLine,
    ResponseHeaderLine,
    ResponseLastHeader,
    ResponseChunk,
    RequestContentClose,
    RequestChunkSizeClose,
    RequestChunkClose,
    EndOfRequestClose,
    ResponseActionLineClose,
    ResponseHeaderLineClose,
    ResponseLastHeaderClose,
    ResponseChunkClose,
    ConnectionClose,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Trigger {
    Continue,
    Break,
    TransferEncodingChunked,
    ContentLength,
    ConnectionClose,
    EndOfChunks,
    ResponseBegin,
    ResponseHeader,
    ResponseChunk,
    ResponseEnd,
}

/// Output pulled from [`HttpServerProtocol::poll_output`].
#[derive(Debug)]
pub enum ServerOutput {
    /// Bytes to write to the transport.
    Transmit(Vec<u8>),
    /// The request line was parsed.
    RequestStarted(RequestStarted),
    /// One request header was parsed.
    HeaderReceived(HttpHeader),
    /// A slice of request body.
    ContentReceived(BytesMut),
    /// The request is complete; a response should be produced.
    RequestEnded,
    /// The response promised `Connection: close` and has ended; drop the
    /// connection.
    Disconnect,
    /// The peer sent something unparseable; answer 400 and drop.
    Invalid(String),
}

struct ServerCtx {
    buffer: BytesMut,
    content_length: usize,
    outputs: VecDeque<ServerOutput>,
}

impl ServerCtx {
    fn action_line(&mut self) -> Option<Trigger> {
        let (method, path, protocol) = parse_start_line(&mut self.buffer)?;
        self.content_length = 0;
        self.outputs
            .push_back(ServerOutput::RequestStarted(RequestStarted {
                method,
                path,
                protocol,
            }));
        Some(Trigger::Break)
    }

    fn header_line(&mut self) -> Option<Trigger> {
        match parse_header_line(&mut self.buffer)? {
            HeaderLine::End => Some(Trigger::Break),
            HeaderLine::Field { key, value } => {
                let lower_key = key.to_lowercase();
                let lower_value = value.to_lowercase();
                self.outputs.push_back(ServerOutput::HeaderReceived(HttpHeader {
                    key,
                    value: value.clone(),
                }));

                if lower_key == "transfer-encoding" && lower_value == "chunked" {
                    Some(Trigger::TransferEncodingChunked)
                } else if lower_key == "content-length" {
                    match value.trim().parse::<usize>() {
                        Ok(length) => {
                            self.content_length = length;
                            Some(Trigger::ContentLength)
                        }
                        Err(_) => {
                            self.outputs.push_back(ServerOutput::Invalid(format!(
                                "bad content length {value:?}"
                            )));
                            None
                        }
                    }
                } else if lower_key == "connection" && lower_value == "close" {
                    Some(Trigger::ConnectionClose)
                } else {
                    Some(Trigger::Continue)
                }
            }
        }
    }

    fn content(&mut self) -> Option<Trigger> {
        if self.content_length == 0 {
            return Some(Trigger::Break);
        }
        let chunk = take_content(&mut self.buffer, &mut self.content_length)?;
        self.outputs.push_back(ServerOutput::ContentReceived(chunk));
        Some(Trigger::Continue)
    }

    fn chunk_size(&mut self) -> Option<Trigger> {
        match parse_chunk_size(&mut self.buffer)? {
            Ok(0) => {
                take_crlf(&mut self.buffer);
                Some(Trigger::EndOfChunks)
            }
            Ok(size) => {
                self.content_length = size;
                Some(Trigger::Break)
            }
            Err(reason) => {
                self.outputs.push_back(ServerOutput::Invalid(reason));
                None
            }
        }
    }

    fn chunk(&mut self) -> Option<Trigger> {
        if self.content_length == 0 {
            if take_crlf(&mut self.buffer) {
                return Some(Trigger::Break);
            }
            return None;
        }
        let chunk = take_content(&mut self.buffer, &mut self.content_length)?;
        self.outputs.push_back(ServerOutput::ContentReceived(chunk));
        Some(Trigger::Continue)
    }
}

macro_rules! entry {
    ($method:ident) => {
        |ctx: &mut ServerCtx, fire| {
            if let Some(trigger) = ctx.$method() {
                fire.fire(trigger);
            }
        }
    };
}

fn build_machine() -> StateMachine<State, Trigger, ServerCtx> {
    let mut machine = StateMachine::new(State::RequestActionLine);

    machine
        .configure(State::RequestActionLine)
        .on_entry(entry!(action_line))
        .permit(Trigger::Continue, State::RequestActionLine)
        .permit(Trigger::Break, State::RequestHeaderLine);

    machine
        .configure(State::RequestHeaderLine)
        .on_entry(entry!(header_line))
        .permit(Trigger::Continue, State::RequestHeaderLine)
        .permit(
            Trigger::TransferEncodingChunked,
            State::RequestHeaderLineChunked,
        )
        .permit(Trigger::ContentLength, State::RequestHeaderLineContentLength)
        .permit(Trigger::ConnectionClose, State::RequestHeaderLineClose)
        .permit(Trigger::Break, State::RequestContent);

    machine
        .configure(State::RequestHeaderLineClose)
        .on_entry(entry!(header_line))
        .permit(Trigger::Continue, State::RequestHeaderLineClose)
        .permit(
            Trigger::TransferEncodingChunked,
            State::RequestHeaderLineChunkedClose,
        )
        .permit(
            Trigger::ContentLength,
            State::RequestHeaderLineContentLengthClose,
        )
        .permit(Trigger::Break, State::RequestContentClose);

    machine
        .configure(State::RequestHeaderLineContentLengthClose)
        .on_entry(entry!(header_line))
        .permit(Trigger::Continue, State::RequestHeaderLineContentLengthClose)
        .permit(Trigger::Break, State::RequestContentClose);

    machine
        .configure(State::RequestHeaderLineChunkedClose)
        .on_entry(entry!(header_line))
        .permit(Trigger::Continue, State::RequestHeaderLineChunkedClose)
        .permit(Trigger::Break, State::RequestChunkSizeClose);

    machine
        .configure(State::RequestHeaderLineChunked)
        .on_entry(entry!(header_line))
        .permit(Trigger::Continue, State::RequestHeaderLineChunked)
        .permit(
            Trigger::ConnectionClose,
            State::RequestHeaderLineChunkedClose,
        )
        .permit(Trigger::Break, State::RequestChunkSize);

    machine
        .configure(State::RequestHeaderLineContentLength)
        .on_entry(entry!(header_line))
        .permit(Trigger::Continue, State::RequestHeaderLineContentLength)
        .permit(
            Trigger::ConnectionClose,
            State::RequestHeaderLineContentLengthClose,
        )
        .permit(Trigger::Break, State::RequestContent);

    machine
        .configure(State::RequestContent)
        .on_entry(entry!(content))
        .permit(Trigger::Continue, State::RequestContent)
        .permit(Trigger::Break, State::EndOfRequest);

    machine
        .configure(State::RequestContentClose)
        .on_entry(entry!(content))
        .permit(Trigger::Continue, State::RequestContentClose)
        .permit(Trigger::Break, State::EndOfRequestClose);

    machine
        .configure(State::RequestChunkSize)
        .on_entry(entry!(chunk_size))
        .permit(Trigger::Continue, State::RequestChunkSize)
        .permit(Trigger::EndOfChunks, State::EndOfRequest)
        .permit(Trigger::Break, State::RequestChunk);

    machine
        .configure(State::RequestChunkSizeClose)
        .on_entry(entry!(chunk_size))
        .permit(Trigger::Continue, State::RequestChunkSizeClose)
        .permit(Trigger::EndOfChunks, State::EndOfRequestClose)
        .permit(Trigger::Break, State::RequestChunkClose);

    machine
        .configure(State::RequestChunk)
        .on_entry(entry!(chunk))
        .permit(Trigger::Continue, State::RequestChunk)
        .permit(Trigger::Break, State::RequestChunkSize);

    machine
        .configure(State::RequestChunkClose)
        .on_entry(entry!(chunk))
        .permit(Trigger::Continue, State::RequestChunkClose)
        .permit(Trigger::Break, State::RequestChunkSizeClose);

    machine
        .configure(State::EndOfRequest)
        .on_entry(|ctx: &mut ServerCtx, _fire| {
            ctx.outputs.push_back(ServerOutput::RequestEnded);
        })
        .permit(Trigger::ResponseBegin, State::ResponseActionLine);

    machine
        .configure(State::EndOfRequestClose)
        .on_entry(|ctx: &mut ServerCtx, _fire| {
            ctx.outputs.push_back(ServerOutput::RequestEnded);
        })
        .permit(Trigger::ResponseBegin, State::ResponseActionLineClose);

    machine
        .configure(State::ResponseActionLine)
        .permit(Trigger::ResponseHeader, State::ResponseHeaderLine);

    machine
        .configure(State::ResponseActionLineClose)
        .permit(Trigger::ResponseHeader, State::ResponseHeaderLineClose);

    machine
        .configure(State::ResponseHeaderLine)
        .permit(Trigger::ResponseHeader, State::ResponseHeaderLine)
        .permit(Trigger::ResponseChunk, State::ResponseLastHeader);

    machine
        .configure(State::ResponseHeaderLineClose)
        .permit(Trigger::ResponseHeader, State::ResponseHeaderLineClose)
        .permit(Trigger::ResponseChunk, State::ResponseLastHeaderClose);

    machine
        .configure(State::ResponseLastHeader)
        .on_entry(|ctx: &mut ServerCtx, fire| {
            ctx.outputs.push_back(ServerOutput::Transmit(
                b"Transfer-Encoding: chunked\r\n\r\n".to_vec(),
            ));
            fire.fire(Trigger::Break);
        })
        .permit(Trigger::Break, State::ResponseChunk);

    machine
        .configure(State::ResponseLastHeaderClose)
        .on_entry(|ctx: &mut ServerCtx, fire| {
            ctx.outputs.push_back(ServerOutput::Transmit(
                b"Connection: close\r\n\r\n".to_vec(),
            ));
            fire.fire(Trigger::Break);
        })
        .permit(Trigger::Break, State::ResponseChunkClose);

    machine
        .configure(State::ResponseChunk)
        .permit(Trigger::ResponseChunk, State::ResponseChunk)
        .permit(Trigger::ResponseEnd, State::RequestActionLine);

    machine
        .configure(State::ResponseChunkClose)
        .permit(Trigger::ResponseChunk, State::ResponseChunkClose)
        .permit(Trigger::ResponseEnd, State::ConnectionClose);

    machine
        .configure(State::ConnectionClose)
        .on_entry(|ctx: &mut ServerCtx, _fire| {
            ctx.outputs.push_back(ServerOutput::Disconnect);
        });

    machine
}

/// The transport-free HTTP server machine, one per connection.
pub struct HttpServerProtocol {
    machine: StateMachine<State, Trigger, ServerCtx>,
    ctx: ServerCtx,
}

impl Default for HttpServerProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpServerProtocol {
    /// Creates a protocol expecting a request line.
    pub fn new() -> Self {
        Self {
            machine: build_machine(),
            ctx: ServerCtx {
                buffer: BytesMut::new(),
                content_length: 0,
                outputs: VecDeque::new(),
            },
        }
    }

    /// Buffers request bytes and parses as far as they allow.
    pub fn handle_data(&mut self, data: &[u8]) -> Result<(), HttpError> {
        self.ctx.buffer.extend_from_slice(data);
        if self.machine.can_fire(Trigger::Continue, &self.ctx) {
            self.fire(Trigger::Continue)?;
        }
        Ok(())
    }

    /// Starts a response: emits `"PROTOCOL CODE DESCRIPTION\r\n"`.
    pub fn begin(&mut self, protocol: &str, code: i32, description: &str) -> Result<(), HttpError> {
        self.fire(Trigger::ResponseBegin)?;
        self.ctx.outputs.push_back(ServerOutput::Transmit(
            format!("{protocol} {code} {description}\r\n").into_bytes(),
        ));
        Ok(())
    }

    /// Emits one response header.
    pub fn send_header(&mut self, key: &str, value: &str) -> Result<(), HttpError> {
        self.fire(Trigger::ResponseHeader)?;
        self.ctx
            .outputs
            .push_back(ServerOutput::Transmit(format!("{key}: {value}\r\n").into_bytes()));
        Ok(())
    }

    /// Emits one piece of response body. In chunked mode the data is framed;
    /// on the Connection-close path it goes out raw. Empty data writes
    /// nothing.
    pub fn send(&mut self, data: &[u8]) -> Result<(), HttpError> {
        self.fire(Trigger::ResponseChunk)?;
        if !data.is_empty() {
            if self.machine.state() == State::ResponseChunk {
                let mut framed = format!("{:x}\r\n", data.len()).into_bytes();
                framed.extend_from_slice(data);
                framed.extend_from_slice(b"\r\n");
                self.ctx.outputs.push_back(ServerOutput::Transmit(framed));
            } else {
                self.ctx
                    .outputs
                    .push_back(ServerOutput::Transmit(data.to_vec()));
            }
        }
        Ok(())
    }

    /// Ends the response. In chunked mode this writes the terminator; on the
    /// Connection-close path it requests the disconnect instead.
    pub fn end(&mut self) -> Result<(), HttpError> {
        if self.machine.state() == State::ResponseChunk {
            self.ctx
                .outputs
                .push_back(ServerOutput::Transmit(b"0\r\n\r\n".to_vec()));
        }
        self.fire(Trigger::ResponseEnd)?;
        Ok(())
    }

    /// Pops the next pending output, if any.
    pub fn poll_output(&mut self) -> Option<ServerOutput> {
        self.ctx.outputs.pop_front()
    }

    fn fire(&mut self, trigger: Trigger) -> Result<(), HttpError> {
        self.machine.fire(trigger, &mut self.ctx)?;
        Ok(())
    }
}

struct ConnEvents {
    request_started: Event<RequestStarted>,
    header_received: Event<HttpHeader>,
    content_received: Event<BytesMut>,
    request_ended: Event<()>,
    disconnected: Event<()>,
}

struct ConnInner {
    proto: HttpServerProtocol,
    tcp: TcpClient,
    events: ConnEvents,
}

/// One accepted HTTP connection: request events in, response calls out.
#[derive(Clone)]
pub struct HttpServerConnection {
    inner: Rc<RefCell<ConnInner>>,
}

impl HttpServerConnection {
    fn attach(tcp: TcpClient) -> Self {
        let inner = Rc::new(RefCell::new(ConnInner {
            proto: HttpServerProtocol::new(),
            tcp: tcp.clone(),
            events: ConnEvents {
                request_started: Event::new(),
                header_received: Event::new(),
                content_received: Event::new(),
                request_ended: Event::new(),
                disconnected: Event::new(),
            },
        }));

        let weak = Rc::downgrade(&inner);
        tcp.data_received().subscribe(move |data: &BytesMut| {
            if let Some(inner) = weak.upgrade() {
                let data = data.clone();
                HttpServerConnection::drive(&inner, move |proto| proto.handle_data(&data));
            }
        });

        let weak = Rc::downgrade(&inner);
        tcp.disconnected().subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                let event = inner.borrow().events.disconnected.clone();
                event.emit(&());
            }
        });

        Self { inner }
    }

    /// Fires when the request line arrives.
    pub fn request_started(&self) -> Event<RequestStarted> {
        self.inner.borrow().events.request_started.clone()
    }

    /// Fires for each request header.
    pub fn header_received(&self) -> Event<HttpHeader> {
        self.inner.borrow().events.header_received.clone()
    }

    /// Fires for each slice of request body.
    pub fn content_received(&self) -> Event<BytesMut> {
        self.inner.borrow().events.content_received.clone()
    }

    /// Fires when the request completes; respond with
    /// [`begin`](Self::begin)…[`end`](Self::end).
    pub fn request_ended(&self) -> Event<()> {
        self.inner.borrow().events.request_ended.clone()
    }

    /// Fires when the underlying connection closes.
    pub fn disconnected(&self) -> Event<()> {
        self.inner.borrow().events.disconnected.clone()
    }

    /// Starts a response.
    pub fn begin(&self, protocol: &str, code: i32, description: &str) -> Result<&Self, HttpError> {
        self.call(|proto| proto.begin(protocol, code, description))?;
        Ok(self)
    }

    /// Sends one response header.
    pub fn send_header(&self, key: &str, value: &str) -> Result<&Self, HttpError> {
        self.call(|proto| proto.send_header(key, value))?;
        Ok(self)
    }

    /// Sends one piece of response body.
    pub fn send(&self, data: &[u8]) -> Result<&Self, HttpError> {
        self.call(|proto| proto.send(data))?;
        Ok(self)
    }

    /// Ends the response.
    pub fn end(&self) -> Result<&Self, HttpError> {
        self.call(|proto| proto.end())?;
        Ok(self)
    }

    /// Drops the connection immediately.
    pub fn disconnect(&self) -> Result<(), HttpError> {
        let tcp = self.inner.borrow().tcp.clone();
        tcp.disconnect()?;
        Ok(())
    }

    fn call(
        &self,
        operation: impl FnOnce(&mut HttpServerProtocol) -> Result<(), HttpError>,
    ) -> Result<(), HttpError> {
        let (result, outputs) = {
            let mut guard = self.inner.borrow_mut();
            let result = operation(&mut guard.proto);
            (result, Self::collect(&mut guard.proto))
        };
        Self::dispatch(&self.inner, outputs);
        result
    }

    fn drive(
        inner: &Rc<RefCell<ConnInner>>,
        operation: impl FnOnce(&mut HttpServerProtocol) -> Result<(), HttpError>,
    ) {
        let (result, outputs) = {
            let mut guard = inner.borrow_mut();
            let result = operation(&mut guard.proto);
            (result, Self::collect(&mut guard.proto))
        };
        Self::dispatch(inner, outputs);
        if let Err(err) = result {
            warn!("http connection protocol error: {err}");
            Self::reject(inner, &format!("{err}"));
        }
    }

    fn collect(proto: &mut HttpServerProtocol) -> Vec<ServerOutput> {
        let mut outputs = Vec::new();
        while let Some(output) = proto.poll_output() {
            outputs.push(output);
        }
        outputs
    }

    fn dispatch(inner: &Rc<RefCell<ConnInner>>, outputs: Vec<ServerOutput>) {
        for output in outputs {
            match output {
                ServerOutput::Transmit(bytes) => {
                    let tcp = inner.borrow().tcp.clone();
                    if let Err(err) = tcp.send(&bytes) {
                        warn!("http connection transmit failed: {err}");
                    }
                }
                ServerOutput::RequestStarted(args) => {
                    let event = inner.borrow().events.request_started.clone();
                    event.emit(&args);
                }
                ServerOutput::HeaderReceived(header) => {
                    let event = inner.borrow().events.header_received.clone();
                    event.emit(&header);
                }
                ServerOutput::ContentReceived(content) => {
                    let event = inner.borrow().events.content_received.clone();
                    event.emit(&content);
                }
                ServerOutput::RequestEnded => {
                    let event = inner.borrow().events.request_ended.clone();
                    event.emit(&());
                }
                ServerOutput::Disconnect => {
                    let tcp = inner.borrow().tcp.clone();
                    let _ = tcp.disconnect();
                }
                ServerOutput::Invalid(reason) => {
                    warn!("http connection received a malformed request: {reason}");
                    Self::reject(inner, &reason);
                }
            }
        }
    }

    /// Best-effort 400 followed by a disconnect; the parse state is beyond
    /// recovery at this point.
    fn reject(inner: &Rc<RefCell<ConnInner>>, reason: &str) {
        let tcp = inner.borrow().tcp.clone();
        let body = format!("{}\r\n", reason);
        let response = format!(
            "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = tcp.send(response.as_bytes());
        let _ = tcp.disconnect();
    }
}

/// Argument of [`HttpServer::client_accepted`].
pub struct HttpClientAccepted {
    /// The accepted connection.
    pub connection: HttpServerConnection,
    /// The peer's address.
    pub endpoint: Endpoint,
}

struct ServerInner {
    tcp: TcpServer,
    client_accepted: Event<HttpClientAccepted>,
    connections: HashMap<u64, HttpServerConnection>,
    next_id: u64,
    scheduler: Scheduler,
}

/// An HTTP server over [`TcpServer`], one parse machine per accepted
/// connection.
#[derive(Clone)]
pub struct HttpServer {
    inner: Rc<RefCell<ServerInner>>,
}

impl HttpServer {
    /// Creates an unbound server.
    pub fn new(scheduler: &Scheduler) -> Result<Self, HttpError> {
        let tcp = TcpServer::new(scheduler)?;
        let inner = Rc::new(RefCell::new(ServerInner {
            tcp: tcp.clone(),
            client_accepted: Event::new(),
            connections: HashMap::new(),
            next_id: 0,
            scheduler: scheduler.clone(),
        }));

        let weak = Rc::downgrade(&inner);
        tcp.client_accepted().subscribe(move |accepted| {
            if let Some(inner) = weak.upgrade() {
                HttpServer::adopt(&inner, accepted.client.clone(), accepted.endpoint.clone());
            }
        });

        Ok(Self { inner })
    }

    /// Fires for each accepted connection, before any request bytes are
    /// parsed.
    pub fn client_accepted(&self) -> Event<HttpClientAccepted> {
        self.inner.borrow().client_accepted.clone()
    }

    /// Binds the listening socket.
    pub fn bind(&self, port: u16) -> Result<(), HttpError> {
        self.inner.borrow().tcp.bind(port)?;
        Ok(())
    }

    /// The bound local address.
    pub fn local_endpoint(&self) -> Result<Endpoint, HttpError> {
        Ok(self.inner.borrow().tcp.local_endpoint()?)
    }

    /// Starts listening.
    pub fn listen(&self, backlog: i32) -> Result<(), HttpError> {
        self.inner.borrow().tcp.listen(backlog)?;
        Ok(())
    }

    fn adopt(inner: &Rc<RefCell<ServerInner>>, tcp: TcpClient, endpoint: Endpoint) {
        let connection = HttpServerConnection::attach(tcp);

        let id = {
            let mut guard = inner.borrow_mut();
            let id = guard.next_id;
            guard.next_id += 1;
            guard.connections.insert(id, connection.clone());
            id
        };

        let weak: Weak<RefCell<ServerInner>> = Rc::downgrade(inner);
        let scheduler = inner.borrow().scheduler.clone();
        connection.disconnected().subscribe(move |_| {
            let weak = weak.clone();
            scheduler.invoke(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().connections.remove(&id);
                }
            });
        });

        let event = inner.borrow().client_accepted.clone();
        event.emit(&HttpClientAccepted {
            connection,
            endpoint,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(proto: &mut HttpServerProtocol) -> Vec<ServerOutput> {
        std::iter::from_fn(|| proto.poll_output()).collect()
    }

    fn transmits(outputs: &[ServerOutput]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for output in outputs {
            if let ServerOutput::Transmit(data) = output {
                bytes.extend_from_slice(data);
            }
        }
        bytes
    }

    #[test]
    fn requests_with_content_length_parse_and_complete() {
        let mut proto = HttpServerProtocol::new();
        proto
            .handle_data(b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody")
            .unwrap();

        let seen = outputs(&mut proto);
        assert!(matches!(
            &seen[0],
            ServerOutput::RequestStarted(RequestStarted { method, path, .. })
                if method == "POST" && path == "/submit"
        ));
        assert!(seen
            .iter()
            .any(|output| matches!(output, ServerOutput::RequestEnded)));

        let body: Vec<u8> = seen
            .iter()
            .filter_map(|output| match output {
                ServerOutput::ContentReceived(chunk) => Some(chunk.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"body");
    }

    #[test]
    fn keep_alive_responses_use_chunked_framing() {
        let mut proto = HttpServerProtocol::new();
        proto.handle_data(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let _ = outputs(&mut proto);

        proto.begin("HTTP/1.1", 200, "OK").unwrap();
        proto.send_header("Content-Type", "text/plain").unwrap();
        proto.send(b"hi").unwrap();
        proto.end().unwrap();

        let seen = outputs(&mut proto);
        assert_eq!(
            transmits(&seen),
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n"
        );
        assert!(!seen
            .iter()
            .any(|output| matches!(output, ServerOutput::Disconnect)));

        // The connection is ready for the next request.
        proto.handle_data(b"GET /next HTTP/1.1\r\n\r\n").unwrap();
        assert!(outputs(&mut proto)
            .iter()
            .any(|output| matches!(output, ServerOutput::RequestEnded)));
    }

    #[test]
    fn connection_close_requests_get_raw_bodies_and_a_disconnect() {
        let mut proto = HttpServerProtocol::new();
        proto
            .handle_data(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap();
        let _ = outputs(&mut proto);

        proto.begin("HTTP/1.1", 200, "OK").unwrap();
        proto.send_header("Content-Type", "text/plain").unwrap();
        proto.send(b"hi").unwrap();
        proto.end().unwrap();

        let seen = outputs(&mut proto);
        assert_eq!(
            transmits(&seen),
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nhi"
        );
        assert!(matches!(seen.last(), Some(ServerOutput::Disconnect)));
    }

    #[test]
    fn chunked_requests_reassemble() {
        let mut proto = HttpServerProtocol::new();
        proto
            .handle_data(b"POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n")
            .unwrap();

        let seen = outputs(&mut proto);
        let body: Vec<u8> = seen
            .iter()
            .filter_map(|output| match output {
                ServerOutput::ContentReceived(chunk) => Some(chunk.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"abcde");
        assert_eq!(
            seen.iter()
                .filter(|output| matches!(output, ServerOutput::RequestEnded))
                .count(),
            1
        );
    }
}
