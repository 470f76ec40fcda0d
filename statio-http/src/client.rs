//! HTTP/1.1 client: chunked request building plus the response parse machine.
//!
//! [`HttpClientProtocol`] is the pure machine (bytes and calls in, outputs
//! out) and carries the full response-parse state graph: the body-framing
//! triggers (`Transfer-Encoding: chunked`, `Content-Length`) latch once seen,
//! `Connection: close` latches independently, and their cross-products get
//! their own states so every combination routes to the right body reader.
//! [`HttpClient`] straps the protocol onto a [`TcpClient`] and turns outputs
//! into socket writes and subscriber events.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::BytesMut;
use log::warn;

use statio::{Event, StateMachine};
use statio_executor::Scheduler;
use statio_net::{Endpoint, TcpClient};

use crate::wire::{
    parse_chunk_size, parse_header_line, parse_start_line, take_content, take_crlf, HeaderLine,
};
use crate::{HttpError, HttpHeader, ResponseStarted};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum State {
    WaitForConnection,
    Connected,
    RequestActionLine,
    RequestHeaderLine,
    RequestLastHeader,
    RequestChunk,
    ResponseActionLine,
    ResponseHeaderLine,
    ResponseHeaderLineChunked,
    ResponseHeaderLineContentLength,
    ResponseHeaderLineClose,
    ResponseHeaderLineContentLengthClose,
    ResponseHeaderLineChunkedClose,
    ResponseContent,
    ResponseContentUntilClosed,
    ResponseChunkSize,
    ResponseChunkSizeClose,
    ResponseChunk,
    ResponseChunkClose,
    EndOfResponseUntilClosed,
    EndOfResponse,
    WaitForDisconnect,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Trigger {
    Connected,
    RequestBegin,
    RequestHeader,
    RequestChunk,
    Continue,
    Break,
    RequestEnd,
    TransferEncodingChunked,
    ContentLength,
    ConnectionClose,
    EndOfChunks,
    Disconnect,
}

/// Output pulled from [`HttpClientProtocol::poll_output`].
#[derive(Debug)]
pub enum ClientOutput {
    /// Bytes to write to the transport.
    Transmit(Vec<u8>),
    /// The response status line was parsed.
    ResponseStarted(ResponseStarted),
    /// One response header was parsed.
    HeaderReceived(HttpHeader),
    /// A slice of response body.
    ContentReceived(BytesMut),
    /// The response is complete; the next request may begin.
    ResponseEnded,
    /// The peer sent something unparseable; the connection should be
    /// dropped.
    Invalid(String),
}

struct ClientCtx {
    buffer: BytesMut,
    content_length: usize,
    outputs: VecDeque<ClientOutput>,
}

impl ClientCtx {
    fn action_line(&mut self) -> Option<Trigger> {
        let (protocol, code, description) = parse_start_line(&mut self.buffer)?;
        self.content_length = 0;
        match code.parse::<i32>() {
            Ok(code) => {
                self.outputs
                    .push_back(ClientOutput::ResponseStarted(ResponseStarted {
                        protocol,
                        code,
                        description,
                    }));
                Some(Trigger::Break)
            }
            Err(_) => {
                self.outputs
                    .push_back(ClientOutput::Invalid(format!("bad status code {code:?}")));
                None
            }
        }
    }

    fn header_line(&mut self) -> Option<Trigger> {
        match parse_header_line(&mut self.buffer)? {
            HeaderLine::End => Some(Trigger::Break),
            HeaderLine::Field { key, value } => {
                let lower_key = key.to_lowercase();
                let lower_value = value.to_lowercase();
                self.outputs.push_back(ClientOutput::HeaderReceived(HttpHeader {
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
                            self.outputs.push_back(ClientOutput::Invalid(format!(
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
        self.outputs.push_back(ClientOutput::ContentReceived(chunk));
        Some(Trigger::Continue)
    }

    fn content_until_closed(&mut self) -> Option<Trigger> {
        if self.buffer.is_empty() {
            return None;
        }
        let all = self.buffer.split_to(self.buffer.len());
        self.outputs.push_back(ClientOutput::ContentReceived(all));
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
                self.outputs.push_back(ClientOutput::Invalid(reason));
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
        self.outputs.push_back(ClientOutput::ContentReceived(chunk));
        Some(Trigger::Continue)
    }
}

macro_rules! entry {
    ($method:ident) => {
        |ctx: &mut ClientCtx, fire| {
            if let Some(trigger) = ctx.$method() {
                fire.fire(trigger);
            }
        }
    };
}

fn build_machine() -> StateMachine<State, Trigger, ClientCtx> {
    let mut machine = StateMachine::new(State::WaitForConnection);

    machine
        .configure(State::WaitForConnection)
        .on_entry(|ctx: &mut ClientCtx, _fire| ctx.buffer.clear())
        .permit(Trigger::Continue, State::WaitForConnection)
        .permit(Trigger::Break, State::WaitForConnection)
        .permit(Trigger::Connected, State::Connected);

    machine
        .configure(State::Connected)
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::RequestBegin, State::RequestActionLine);

    machine
        .configure(State::RequestActionLine)
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::RequestHeader, State::RequestHeaderLine)
        .permit(Trigger::RequestChunk, State::RequestLastHeader);

    machine
        .configure(State::RequestHeaderLine)
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::RequestHeader, State::RequestHeaderLine)
        .permit(Trigger::RequestChunk, State::RequestLastHeader);

    machine
        .configure(State::RequestLastHeader)
        .on_entry(|ctx: &mut ClientCtx, fire| {
            ctx.outputs.push_back(ClientOutput::Transmit(
                b"Transfer-Encoding: chunked\r\n\r\n".to_vec(),
            ));
            fire.fire(Trigger::Break);
        })
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Break, State::RequestChunk);

    machine
        .configure(State::RequestChunk)
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::RequestChunk, State::RequestChunk)
        .permit(Trigger::RequestEnd, State::ResponseActionLine);

    machine
        .configure(State::ResponseActionLine)
        .on_entry(entry!(action_line))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseActionLine)
        .permit(Trigger::Break, State::ResponseHeaderLine);

    machine
        .configure(State::ResponseHeaderLine)
        .on_entry(entry!(header_line))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseHeaderLine)
        .permit(
            Trigger::TransferEncodingChunked,
            State::ResponseHeaderLineChunked,
        )
        .permit(Trigger::ContentLength, State::ResponseHeaderLineContentLength)
        .permit(Trigger::ConnectionClose, State::ResponseHeaderLineClose)
        .permit(Trigger::Break, State::ResponseContent);

    machine
        .configure(State::ResponseHeaderLineChunked)
        .on_entry(entry!(header_line))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseHeaderLineChunked)
        .permit(
            Trigger::ConnectionClose,
            State::ResponseHeaderLineChunkedClose,
        )
        .permit(Trigger::Break, State::ResponseChunkSize);

    machine
        .configure(State::ResponseHeaderLineContentLength)
        .on_entry(entry!(header_line))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(
            Trigger::ConnectionClose,
            State::ResponseHeaderLineContentLengthClose,
        )
        .permit(Trigger::Continue, State::ResponseHeaderLineContentLength)
        .permit(Trigger::Break, State::ResponseContent);

    machine
        .configure(State::ResponseHeaderLineClose)
        .on_entry(entry!(header_line))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(
            Trigger::ContentLength,
            State::ResponseHeaderLineContentLengthClose,
        )
        .permit(
            Trigger::TransferEncodingChunked,
            State::ResponseHeaderLineChunkedClose,
        )
        .permit(Trigger::Continue, State::ResponseHeaderLineClose)
        .permit(Trigger::Break, State::ResponseContentUntilClosed);

    machine
        .configure(State::ResponseHeaderLineContentLengthClose)
        .on_entry(entry!(header_line))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(
            Trigger::Continue,
            State::ResponseHeaderLineContentLengthClose,
        )
        .permit(Trigger::Break, State::ResponseContentUntilClosed);

    machine
        .configure(State::ResponseHeaderLineChunkedClose)
        .on_entry(entry!(header_line))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseHeaderLineChunkedClose)
        .permit(Trigger::Break, State::ResponseChunkSizeClose);

    machine
        .configure(State::ResponseContentUntilClosed)
        .on_entry(entry!(content_until_closed))
        .permit(Trigger::Disconnect, State::EndOfResponseUntilClosed)
        .permit(Trigger::Continue, State::ResponseContentUntilClosed)
        .permit(Trigger::Break, State::EndOfResponseUntilClosed);

    machine
        .configure(State::ResponseContent)
        .on_entry(entry!(content))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseContent)
        .permit(Trigger::Break, State::EndOfResponse);

    machine
        .configure(State::ResponseChunkSize)
        .on_entry(entry!(chunk_size))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseChunkSize)
        .permit(Trigger::EndOfChunks, State::EndOfResponse)
        .permit(Trigger::Break, State::ResponseChunk);

    machine
        .configure(State::ResponseChunkSizeClose)
        .on_entry(entry!(chunk_size))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseChunkSizeClose)
        .permit(Trigger::EndOfChunks, State::EndOfResponseUntilClosed)
        .permit(Trigger::Break, State::ResponseChunkClose);

    machine
        .configure(State::ResponseChunk)
        .on_entry(entry!(chunk))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseChunk)
        .permit(Trigger::Break, State::ResponseChunkSize);

    machine
        .configure(State::ResponseChunkClose)
        .on_entry(entry!(chunk))
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::ResponseChunkClose)
        .permit(Trigger::Break, State::ResponseChunkSizeClose);

    machine
        .configure(State::EndOfResponseUntilClosed)
        .on_entry(|ctx: &mut ClientCtx, fire| {
            ctx.outputs.push_back(ClientOutput::ResponseEnded);
            fire.fire(Trigger::Break);
        })
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::Continue, State::EndOfResponseUntilClosed)
        .permit(Trigger::Break, State::WaitForDisconnect);

    machine
        .configure(State::WaitForDisconnect)
        .permit(Trigger::Disconnect, State::WaitForConnection);

    machine
        .configure(State::EndOfResponse)
        .on_entry(|ctx: &mut ClientCtx, _fire| {
            ctx.outputs.push_back(ClientOutput::ResponseEnded);
        })
        .permit(Trigger::Disconnect, State::WaitForConnection)
        .permit(Trigger::RequestBegin, State::RequestActionLine);

    machine
}

/// The transport-free HTTP client machine.
///
/// Feed it connection lifecycle calls and response bytes; pull
/// [`ClientOutput`]s. [`HttpClient`] is the socket-backed wrapper most code
/// wants.
pub struct HttpClientProtocol {
    machine: StateMachine<State, Trigger, ClientCtx>,
    ctx: ClientCtx,
}

impl Default for HttpClientProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientProtocol {
    /// Creates a protocol waiting for its transport to connect.
    pub fn new() -> Self {
        Self {
            machine: build_machine(),
            ctx: ClientCtx {
                buffer: BytesMut::new(),
                content_length: 0,
                outputs: VecDeque::new(),
            },
        }
    }

    /// Notifies the machine that the transport connected.
    pub fn handle_connected(&mut self) -> Result<(), HttpError> {
        self.fire(Trigger::Connected)
    }

    /// Notifies the machine that the transport closed. During a
    /// read-until-close body this terminates the response normally.
    pub fn handle_disconnected(&mut self) -> Result<(), HttpError> {
        if self.machine.can_fire(Trigger::Disconnect, &self.ctx) {
            self.fire(Trigger::Disconnect)?;
        }
        Ok(())
    }

    /// Buffers response bytes and parses as far as they allow.
    pub fn handle_data(&mut self, data: &[u8]) -> Result<(), HttpError> {
        self.ctx.buffer.extend_from_slice(data);
        if self.machine.can_fire(Trigger::Continue, &self.ctx) {
            self.fire(Trigger::Continue)?;
        }
        Ok(())
    }

    /// Starts a request: emits `"METHOD PATH PROTOCOL\r\n"`.
    pub fn begin(&mut self, method: &str, path: &str, protocol: &str) -> Result<(), HttpError> {
        self.fire(Trigger::RequestBegin)?;
        self.ctx.outputs.push_back(ClientOutput::Transmit(
            format!("{method} {path} {protocol}\r\n").into_bytes(),
        ));
        Ok(())
    }

    /// Emits one request header.
    pub fn send_header(&mut self, key: &str, value: &str) -> Result<(), HttpError> {
        self.fire(Trigger::RequestHeader)?;
        self.ctx
            .outputs
            .push_back(ClientOutput::Transmit(format!("{key}: {value}\r\n").into_bytes()));
        Ok(())
    }

    /// Emits one body chunk. Entering body mode emits the
    /// `Transfer-Encoding: chunked` header automatically; an empty chunk
    /// emits no framing at all.
    pub fn send(&mut self, data: &[u8]) -> Result<(), HttpError> {
        self.fire(Trigger::RequestChunk)?;
        if !data.is_empty() {
            let mut framed = format!("{:x}\r\n", data.len()).into_bytes();
            framed.extend_from_slice(data);
            framed.extend_from_slice(b"\r\n");
            self.ctx.outputs.push_back(ClientOutput::Transmit(framed));
        }
        Ok(())
    }

    /// Ends the request with the zero-chunk terminator and arms the response
    /// parser.
    pub fn end(&mut self) -> Result<(), HttpError> {
        self.fire(Trigger::RequestEnd)?;
        self.ctx
            .outputs
            .push_back(ClientOutput::Transmit(b"0\r\n\r\n".to_vec()));
        Ok(())
    }

    /// Pops the next pending output, if any.
    pub fn poll_output(&mut self) -> Option<ClientOutput> {
        self.ctx.outputs.pop_front()
    }

    fn fire(&mut self, trigger: Trigger) -> Result<(), HttpError> {
        self.machine.fire(trigger, &mut self.ctx)?;
        Ok(())
    }
}

struct Events {
    response_started: Event<ResponseStarted>,
    header_received: Event<HttpHeader>,
    content_received: Event<BytesMut>,
    response_ended: Event<()>,
}

struct Inner {
    proto: HttpClientProtocol,
    tcp: TcpClient,
    events: Events,
}

/// An HTTP/1.1 client over a [`TcpClient`].
///
/// Subscribe to `connected`, issue a request with
/// [`begin`](Self::begin)/[`send_header`](Self::send_header)/
/// [`send`](Self::send)/[`end`](Self::end), then watch `response_started`,
/// `header_received`, `content_received` and `response_ended` fire in wire
/// order. After `response_ended` the connection is ready for the next
/// request.
#[derive(Clone)]
pub struct HttpClient {
    inner: Rc<RefCell<Inner>>,
}

impl HttpClient {
    /// Creates a client with its own unconnected socket.
    pub fn new(scheduler: &Scheduler) -> Result<Self, HttpError> {
        let tcp = TcpClient::new(scheduler)?;
        Ok(Self::over(tcp))
    }

    /// Wraps an existing transport client.
    pub fn over(tcp: TcpClient) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            proto: HttpClientProtocol::new(),
            tcp: tcp.clone(),
            events: Events {
                response_started: Event::new(),
                header_received: Event::new(),
                content_received: Event::new(),
                response_ended: Event::new(),
            },
        }));

        let weak = Rc::downgrade(&inner);
        tcp.connected().subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                HttpClient::drive(&inner, |proto| proto.handle_connected());
            }
        });

        let weak = Rc::downgrade(&inner);
        tcp.data_received().subscribe(move |data: &BytesMut| {
            if let Some(inner) = weak.upgrade() {
                let data = data.clone();
                HttpClient::drive(&inner, move |proto| proto.handle_data(&data));
            }
        });

        let weak = Rc::downgrade(&inner);
        tcp.disconnected().subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                HttpClient::drive(&inner, |proto| proto.handle_disconnected());
            }
        });

        Self { inner }
    }

    /// Fires when the transport connects; requests may begin.
    pub fn connected(&self) -> Event<()> {
        self.inner.borrow().tcp.connected()
    }

    /// Fires when the transport closes.
    pub fn disconnected(&self) -> Event<()> {
        self.inner.borrow().tcp.disconnected()
    }

    /// Fires when the response status line arrives.
    pub fn response_started(&self) -> Event<ResponseStarted> {
        self.inner.borrow().events.response_started.clone()
    }

    /// Fires for each response header.
    pub fn header_received(&self) -> Event<HttpHeader> {
        self.inner.borrow().events.header_received.clone()
    }

    /// Fires for each slice of response body.
    pub fn content_received(&self) -> Event<BytesMut> {
        self.inner.borrow().events.content_received.clone()
    }

    /// Fires when the response completes.
    pub fn response_ended(&self) -> Event<()> {
        self.inner.borrow().events.response_ended.clone()
    }

    /// Starts a non-blocking connect.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<(), HttpError> {
        let tcp = self.inner.borrow().tcp.clone();
        tcp.connect(endpoint)?;
        Ok(())
    }

    /// Closes the connection.
    pub fn disconnect(&self) -> Result<(), HttpError> {
        let tcp = self.inner.borrow().tcp.clone();
        tcp.disconnect()?;
        Ok(())
    }

    /// Starts a request. See [`HttpClientProtocol::begin`].
    pub fn begin(&self, method: &str, path: &str, protocol: &str) -> Result<&Self, HttpError> {
        self.call(|proto| proto.begin(method, path, protocol))?;
        Ok(self)
    }

    /// Sends one request header.
    pub fn send_header(&self, key: &str, value: &str) -> Result<&Self, HttpError> {
        self.call(|proto| proto.send_header(key, value))?;
        Ok(self)
    }

    /// Sends one body chunk. Empty chunks write nothing.
    pub fn send(&self, data: &[u8]) -> Result<&Self, HttpError> {
        self.call(|proto| proto.send(data))?;
        Ok(self)
    }

    /// Ends the request.
    pub fn end(&self) -> Result<&Self, HttpError> {
        self.call(|proto| proto.end())?;
        Ok(self)
    }

    fn call(
        &self,
        operation: impl FnOnce(&mut HttpClientProtocol) -> Result<(), HttpError>,
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
        inner: &Rc<RefCell<Inner>>,
        operation: impl FnOnce(&mut HttpClientProtocol) -> Result<(), HttpError>,
    ) {
        let (result, outputs) = {
            let mut guard = inner.borrow_mut();
            let result = operation(&mut guard.proto);
            (result, Self::collect(&mut guard.proto))
        };
        Self::dispatch(inner, outputs);
        if let Err(err) = result {
            warn!("http client protocol error: {err}");
            let tcp = inner.borrow().tcp.clone();
            let _ = tcp.disconnect();
        }
    }

    fn collect(proto: &mut HttpClientProtocol) -> Vec<ClientOutput> {
        let mut outputs = Vec::new();
        while let Some(output) = proto.poll_output() {
            outputs.push(output);
        }
        outputs
    }

    fn dispatch(inner: &Rc<RefCell<Inner>>, outputs: Vec<ClientOutput>) {
        for output in outputs {
            match output {
                ClientOutput::Transmit(bytes) => {
                    let tcp = inner.borrow().tcp.clone();
                    if let Err(err) = tcp.send(&bytes) {
                        warn!("http client transmit failed: {err}");
                    }
                }
                ClientOutput::ResponseStarted(args) => {
                    let event = inner.borrow().events.response_started.clone();
                    event.emit(&args);
                }
                ClientOutput::HeaderReceived(header) => {
                    let event = inner.borrow().events.header_received.clone();
                    event.emit(&header);
                }
                ClientOutput::ContentReceived(content) => {
                    let event = inner.borrow().events.content_received.clone();
                    event.emit(&content);
                }
                ClientOutput::ResponseEnded => {
                    let event = inner.borrow().events.response_ended.clone();
                    event.emit(&());
                }
                ClientOutput::Invalid(reason) => {
                    warn!("http client received a malformed response: {reason}");
                    let tcp = inner.borrow().tcp.clone();
                    let _ = tcp.disconnect();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transmits(proto: &mut HttpClientProtocol) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Some(output) = proto.poll_output() {
            match output {
                ClientOutput::Transmit(data) => bytes.extend_from_slice(&data),
                other => panic!("unexpected output {other:?}"),
            }
        }
        bytes
    }

    fn outputs(proto: &mut HttpClientProtocol) -> Vec<ClientOutput> {
        std::iter::from_fn(|| proto.poll_output()).collect()
    }

    #[test]
    fn chunked_requests_frame_exactly() {
        let mut proto = HttpClientProtocol::new();
        proto.handle_connected().unwrap();

        proto.begin("POST", "/", "HTTP/1.1").unwrap();
        proto.send_header("Host", "h").unwrap();
        proto.send(b"ABC").unwrap();
        proto.end().unwrap();

        assert_eq!(
            transmits(&mut proto),
            b"POST / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nABC\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn empty_chunks_write_no_framing() {
        let mut proto = HttpClientProtocol::new();
        proto.handle_connected().unwrap();

        proto.begin("GET", "/", "HTTP/1.1").unwrap();
        proto.send_header("Host", "h").unwrap();
        proto.send(b"").unwrap();
        proto.end().unwrap();

        assert_eq!(
            transmits(&mut proto),
            b"GET / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n"
        );
    }

    /// Runs a request to completion and discards the transmits so response
    /// parsing can start.
    fn armed_protocol() -> HttpClientProtocol {
        let mut proto = HttpClientProtocol::new();
        proto.handle_connected().unwrap();
        proto.begin("GET", "/", "HTTP/1.1").unwrap();
        proto.send(b"").unwrap();
        proto.end().unwrap();
        let _ = transmits(&mut proto);
        proto
    }

    #[test]
    fn content_length_responses_parse_byte_at_a_time() {
        let mut proto = armed_protocol();
        let mut seen = Vec::new();
        for byte in b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello" {
            proto.handle_data(&[*byte]).unwrap();
            seen.extend(outputs(&mut proto));
        }

        let mut iter = seen.into_iter();
        match iter.next().unwrap() {
            ClientOutput::ResponseStarted(started) => {
                assert_eq!(started.protocol, "HTTP/1.1");
                assert_eq!(started.code, 200);
                assert_eq!(started.description, "OK");
            }
            other => panic!("unexpected output {other:?}"),
        }
        match iter.next().unwrap() {
            ClientOutput::HeaderReceived(header) => {
                assert_eq!(header.key, "Content-Length");
                assert_eq!(header.value, "5");
            }
            other => panic!("unexpected output {other:?}"),
        }

        let mut content = Vec::new();
        let mut ended = 0;
        for output in iter {
            match output {
                ClientOutput::ContentReceived(chunk) => content.extend_from_slice(&chunk),
                ClientOutput::ResponseEnded => ended += 1,
                other => panic!("unexpected output {other:?}"),
            }
        }
        assert_eq!(content, b"hello");
        assert_eq!(ended, 1);
    }

    #[test]
    fn chunked_responses_concatenate_and_end_once() {
        let mut proto = armed_protocol();
        proto
            .handle_data(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n",
            )
            .unwrap();

        let mut content = Vec::new();
        let mut ended = 0;
        for output in outputs(&mut proto) {
            match output {
                ClientOutput::ContentReceived(chunk) => content.extend_from_slice(&chunk),
                ClientOutput::ResponseEnded => ended += 1,
                ClientOutput::ResponseStarted(_) | ClientOutput::HeaderReceived(_) => {}
                other => panic!("unexpected output {other:?}"),
            }
        }
        assert_eq!(content, b"abcde");
        assert_eq!(ended, 1);
    }

    #[test]
    fn connection_close_responses_end_on_disconnect() {
        let mut proto = armed_protocol();
        proto
            .handle_data(b"HTTP/1.0 200 OK\r\nConnection: close\r\n\r\nhello world")
            .unwrap();
        proto.handle_disconnected().unwrap();

        let mut content = Vec::new();
        let mut ended = 0;
        for output in outputs(&mut proto) {
            match output {
                ClientOutput::ContentReceived(chunk) => content.extend_from_slice(&chunk),
                ClientOutput::ResponseEnded => ended += 1,
                ClientOutput::ResponseStarted(_) | ClientOutput::HeaderReceived(_) => {}
                other => panic!("unexpected output {other:?}"),
            }
        }
        assert_eq!(content, b"hello world");
        assert_eq!(ended, 1);
    }

    #[test]
    fn content_length_with_connection_close_reads_until_close() {
        let mut proto = armed_protocol();
        proto
            .handle_data(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
            .unwrap();
        proto.handle_disconnected().unwrap();

        let ended = outputs(&mut proto)
            .iter()
            .filter(|output| matches!(output, ClientOutput::ResponseEnded))
            .count();
        assert_eq!(ended, 1);
    }

    #[test]
    fn a_second_request_may_follow_a_kept_alive_response() {
        let mut proto = armed_protocol();
        proto
            .handle_data(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
        let _ = outputs(&mut proto);

        proto.begin("GET", "/again", "HTTP/1.1").unwrap();
        proto.send(b"").unwrap();
        proto.end().unwrap();
        assert!(!transmits(&mut proto).is_empty());
    }

    #[test]
    fn malformed_status_codes_surface_as_invalid() {
        let mut proto = armed_protocol();
        proto.handle_data(b"HTTP/1.1 abc OK\r\n").unwrap();
        assert!(outputs(&mut proto)
            .iter()
            .any(|output| matches!(output, ClientOutput::Invalid(_))));
    }
}
