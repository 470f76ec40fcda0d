//! TLS stream transport: the TCP contract plus a handshake phase.
//!
//! The machine adds `Connected → Handshaking → Handshaked` between connect
//! and data I/O, with a `CanDisconnect` super-state providing the
//! disconnect/timeout transitions every post-connect state shares. A
//! `rustls` session does the cryptographic work; this module only pumps TLS
//! records between the session and the non-blocking socket at the same poll
//! cadence the plain TCP client uses. The `connected` event fires once the
//! handshake has completed, so users see exactly the TCP event surface.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::rc::Rc;
use std::sync::Arc;

use bytes::BytesMut;
use log::{error, warn};

use rustls::pki_types::ServerName;

use statio::{Event, StateMachine};
use statio_executor::{Scheduler, TimeSpan, TimerToken};

use crate::socket::{Endpoint, Interest, Socket};
use crate::tcp_client::{default_poll_interval, DEFAULT_BUFFER_SIZE};
use crate::NetError;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum State {
    Idle,
    Connecting,
    CanDisconnect,
    Connected,
    Handshaking,
    Handshaked,
    Sending,
    Disconnected,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Trigger {
    Connect,
    Connected,
    Handshake,
    Handshaked,
    Send,
    Timeout,
    Disconnected,
}

enum Effect {
    EmitConnected,
    EmitDisconnected,
    PollConnect,
    PollHandshake,
    StartRead,
    RetrySend,
    CancelConnectTimer,
}

enum Handshake {
    Complete,
    Pending,
    Failed(String),
}

enum SendProgress {
    Done,
    Again,
    Later,
}

enum TlsRead {
    Closed,
    Data(BytesMut),
}

struct TlsCtx {
    socket: Socket,
    session: Option<rustls::Connection>,
    client_config: Option<Arc<rustls::ClientConfig>>,
    server_name: Option<ServerName<'static>>,
    send_buffer: BytesMut,
    buffer_size: usize,
    poll_interval: TimeSpan,
    connect_timeout: Option<TimeSpan>,
    connect_timer: Option<TimerToken>,
    effects: VecDeque<Effect>,
    connected: Event<()>,
    disconnected: Event<()>,
    data_received: Event<BytesMut>,
}

impl TlsCtx {
    fn connect_readiness(&self) -> Option<Trigger> {
        if self.socket.poll(Interest::Write, TimeSpan::ZERO) {
            Some(Trigger::Connected)
        } else if self.socket.poll(Interest::Error, TimeSpan::ZERO) {
            Some(Trigger::Disconnected)
        } else {
            None
        }
    }

    /// Creates the client session on first entry to `Connected`. Accepted
    /// server sockets arrive with their session already attached.
    fn ensure_session(&mut self) -> Result<(), String> {
        if self.session.is_some() {
            return Ok(());
        }
        let config = self
            .client_config
            .clone()
            .ok_or("no client configuration")?;
        let name = self.server_name.clone().ok_or("no server name")?;
        let session = rustls::ClientConnection::new(config, name).map_err(|err| err.to_string())?;
        self.session = Some(rustls::Connection::Client(session));
        Ok(())
    }

    /// Advances the handshake as far as the socket allows.
    fn pump_handshake(&mut self) -> Handshake {
        let Some(session) = self.session.as_mut() else {
            return Handshake::Failed("no session".into());
        };
        let socket = &self.socket;

        loop {
            while session.wants_write() {
                let mut raw = socket;
                match session.write_tls(&mut raw) {
                    Ok(_) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        return Handshake::Pending;
                    }
                    Err(err) => return Handshake::Failed(err.to_string()),
                }
            }

            if !session.is_handshaking() {
                return Handshake::Complete;
            }

            if !session.wants_read() || !socket.poll(Interest::Read, TimeSpan::ZERO) {
                return Handshake::Pending;
            }

            let mut raw = socket;
            match session.read_tls(&mut raw) {
                Ok(0) => return Handshake::Failed("peer closed during handshake".into()),
                Ok(_) => {
                    if let Err(err) = session.process_new_packets() {
                        return Handshake::Failed(err.to_string());
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    return Handshake::Pending;
                }
                Err(err) => return Handshake::Failed(err.to_string()),
            }
        }
    }

    /// Reads and decrypts whatever the socket has, flushing any records the
    /// session wants to send back (session tickets, close alerts).
    fn pump_read(&mut self) -> Result<TlsRead, String> {
        let Some(session) = self.session.as_mut() else {
            return Err("no session".into());
        };
        let socket = &self.socket;

        let mut raw = socket;
        match session.read_tls(&mut raw) {
            Ok(0) => return Ok(TlsRead::Closed),
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Ok(TlsRead::Data(BytesMut::new()));
            }
            Err(err) => return Err(err.to_string()),
        }

        let state = session
            .process_new_packets()
            .map_err(|err| err.to_string())?;

        let mut data = vec![0u8; state.plaintext_bytes_to_read()];
        if !data.is_empty() {
            session
                .reader()
                .read_exact(&mut data)
                .map_err(|err| err.to_string())?;
        }

        while session.wants_write() {
            let mut raw = socket;
            match session.write_tls(&mut raw) {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.to_string()),
            }
        }

        if state.peer_has_closed() && data.is_empty() {
            return Ok(TlsRead::Closed);
        }
        Ok(TlsRead::Data(BytesMut::from(&data[..])))
    }

    /// Encrypts queued plaintext and flushes records to the socket.
    fn pump_send(&mut self) -> Result<SendProgress, String> {
        let Some(session) = self.session.as_mut() else {
            return Err("no session".into());
        };
        let socket = &self.socket;

        let written = session
            .writer()
            .write(&self.send_buffer)
            .map_err(|err| err.to_string())?;
        let _ = self.send_buffer.split_to(written);

        while session.wants_write() {
            let mut raw = socket;
            match session.write_tls(&mut raw) {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(SendProgress::Later);
                }
                Err(err) => return Err(err.to_string()),
            }
        }

        if self.send_buffer.is_empty() {
            Ok(SendProgress::Done)
        } else if written == 0 {
            Ok(SendProgress::Later)
        } else {
            Ok(SendProgress::Again)
        }
    }
}

struct Inner {
    machine: StateMachine<State, Trigger, TlsCtx>,
    ctx: TlsCtx,
    scheduler: Scheduler,
}

/// A TLS stream client with the same event surface as [`TcpClient`].
///
/// [`TcpClient`]: crate::TcpClient
#[derive(Clone)]
pub struct TlsClient {
    inner: Rc<RefCell<Inner>>,
}

fn build_machine() -> StateMachine<State, Trigger, TlsCtx> {
    let mut machine = StateMachine::new(State::Idle);

    machine
        .configure(State::Idle)
        .permit(Trigger::Connected, State::Connected)
        .permit(Trigger::Connect, State::Connecting);

    machine
        .configure(State::CanDisconnect)
        .permit(Trigger::Disconnected, State::Disconnected)
        .permit(Trigger::Timeout, State::Disconnected);

    machine
        .configure(State::Connecting)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut TlsCtx, fire| match ctx.connect_readiness() {
            Some(trigger) => fire.fire(trigger),
            None => ctx.effects.push_back(Effect::PollConnect),
        })
        .permit(Trigger::Connected, State::Connected);

    machine
        .configure(State::Connected)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut TlsCtx, fire| {
            ctx.effects.push_back(Effect::CancelConnectTimer);
            match ctx.ensure_session() {
                Ok(()) => fire.fire(Trigger::Handshake),
                Err(reason) => {
                    warn!("tls session could not be created: {reason}");
                    fire.fire(Trigger::Disconnected);
                }
            }
        })
        .permit(Trigger::Handshake, State::Handshaking);

    machine
        .configure(State::Handshaking)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut TlsCtx, fire| match ctx.pump_handshake() {
            Handshake::Complete => fire.fire(Trigger::Handshaked),
            Handshake::Pending => ctx.effects.push_back(Effect::PollHandshake),
            Handshake::Failed(reason) => {
                warn!("tls handshake failed: {reason}");
                fire.fire(Trigger::Disconnected);
            }
        })
        .permit(Trigger::Handshaked, State::Handshaked);

    machine
        .configure(State::Handshaked)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut TlsCtx, _fire| {
            ctx.send_buffer.clear();
            ctx.effects.push_back(Effect::EmitConnected);
            ctx.effects.push_back(Effect::StartRead);
        })
        .permit(Trigger::Send, State::Sending);

    machine
        .configure(State::Sending)
        .substate_of(State::Handshaked)
        .on_entry(|ctx: &mut TlsCtx, fire| match ctx.pump_send() {
            Ok(SendProgress::Done) => {}
            Ok(SendProgress::Again) => fire.fire(Trigger::Send),
            Ok(SendProgress::Later) => ctx.effects.push_back(Effect::RetrySend),
            Err(reason) => {
                warn!("tls send failed: {reason}");
                fire.fire(Trigger::Disconnected);
            }
        });

    machine
        .configure(State::Disconnected)
        .on_entry(|ctx: &mut TlsCtx, _fire| {
            ctx.effects.push_back(Effect::EmitDisconnected);
        });

    machine
}

impl TlsClient {
    /// Creates an unconnected TLS client using `config` for certificate
    /// verification and protocol parameters.
    pub fn new(scheduler: &Scheduler, config: Arc<rustls::ClientConfig>) -> Result<Self, NetError> {
        let socket = Socket::stream()?;
        socket.set_nonblocking(true)?;
        Ok(Self::wrap(
            socket,
            scheduler,
            Some(config),
            None,
            DEFAULT_BUFFER_SIZE,
            default_poll_interval(),
        ))
    }

    fn wrap(
        socket: Socket,
        scheduler: &Scheduler,
        client_config: Option<Arc<rustls::ClientConfig>>,
        session: Option<rustls::Connection>,
        buffer_size: usize,
        poll_interval: TimeSpan,
    ) -> Self {
        let ctx = TlsCtx {
            socket,
            session,
            client_config,
            server_name: None,
            send_buffer: BytesMut::new(),
            buffer_size,
            poll_interval,
            connect_timeout: None,
            connect_timer: None,
            effects: VecDeque::new(),
            connected: Event::new(),
            disconnected: Event::new(),
            data_received: Event::new(),
        };
        Self {
            inner: Rc::new(RefCell::new(Inner {
                machine: build_machine(),
                ctx,
                scheduler: scheduler.clone(),
            })),
        }
    }

    /// Wraps an accepted socket with a server-side session. The caller fires
    /// [`assume_connected`](Self::assume_connected) once handlers are in
    /// place; the handshake then runs before `connected` is reported.
    pub(crate) fn from_accepted(
        socket: Socket,
        scheduler: &Scheduler,
        session: rustls::ServerConnection,
    ) -> Self {
        Self::wrap(
            socket,
            scheduler,
            None,
            Some(rustls::Connection::Server(session)),
            DEFAULT_BUFFER_SIZE,
            default_poll_interval(),
        )
    }

    pub(crate) fn assume_connected(&self) {
        Self::drive(&self.inner, Trigger::Connected);
    }

    /// Fires once the TLS handshake has completed.
    pub fn connected(&self) -> Event<()> {
        self.inner.borrow().ctx.connected.clone()
    }

    /// Fires when the connection ends, locally or remotely.
    pub fn disconnected(&self) -> Event<()> {
        self.inner.borrow().ctx.disconnected.clone()
    }

    /// Fires for every decrypted chunk, in arrival order.
    pub fn data_received(&self) -> Event<BytesMut> {
        self.inner.borrow().ctx.data_received.clone()
    }

    /// Whether the handshake has completed and the session is live.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.inner.borrow().machine.state(),
            State::Handshaked | State::Sending
        )
    }

    /// Limits how long the connect (including handshake) may stay pending.
    pub fn set_connect_timeout(&self, timeout: Option<TimeSpan>) {
        self.inner.borrow_mut().ctx.connect_timeout = timeout;
    }

    /// Starts a non-blocking connect to `endpoint`; the endpoint host doubles
    /// as the name presented for certificate validation.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<(), NetError> {
        let server_name = ServerName::try_from(endpoint.host().to_string())
            .map_err(|_| NetError::Tls(format!("invalid server name {}", endpoint.host())))?;

        {
            let mut inner = self.inner.borrow_mut();
            inner.ctx.server_name = Some(server_name);
            inner.ctx.socket.connect(endpoint)?;
        }

        let timeout = self.inner.borrow().ctx.connect_timeout;
        if let Some(timeout) = timeout {
            let weak = Rc::downgrade(&self.inner);
            let scheduler = self.inner.borrow().scheduler.clone();
            let token = scheduler.schedule(timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    let pending = matches!(
                        inner.borrow().machine.state(),
                        State::Connecting | State::Connected | State::Handshaking
                    );
                    if pending {
                        TlsClient::drive(&inner, Trigger::Timeout);
                    }
                }
            });
            self.inner.borrow_mut().ctx.connect_timer = Some(token);
        }

        Self::try_fire(&self.inner, Trigger::Connect)
    }

    /// Queues plaintext for transmission; call order is wire order.
    pub fn send(&self, data: &[u8]) -> Result<(), NetError> {
        self.inner
            .borrow_mut()
            .ctx
            .send_buffer
            .extend_from_slice(data);
        Self::try_fire(&self.inner, Trigger::Send)
    }

    /// Closes the connection and reports `disconnected`.
    pub fn disconnect(&self) -> Result<(), NetError> {
        Self::try_fire(&self.inner, Trigger::Disconnected)
    }

    fn try_fire(inner: &Rc<RefCell<Inner>>, trigger: Trigger) -> Result<(), NetError> {
        let result = {
            let mut guard = inner.borrow_mut();
            let Inner { machine, ctx, .. } = &mut *guard;
            machine.fire(trigger, ctx)
        };
        Self::flush_effects(inner);
        result.map_err(NetError::from)
    }

    fn drive(inner: &Rc<RefCell<Inner>>, trigger: Trigger) {
        if let Err(err) = Self::try_fire(inner, trigger) {
            error!("tls client drive failed: {err}");
            debug_assert!(false, "tls client drive failed: {err}");
        }
    }

    fn flush_effects(inner: &Rc<RefCell<Inner>>) {
        loop {
            let effect = inner.borrow_mut().ctx.effects.pop_front();
            let Some(effect) = effect else { break };

            match effect {
                Effect::EmitConnected => {
                    let event = inner.borrow().ctx.connected.clone();
                    event.emit(&());
                }
                Effect::EmitDisconnected => {
                    let event = inner.borrow().ctx.disconnected.clone();
                    event.emit(&());
                }
                Effect::PollConnect => {
                    Self::schedule_guarded(inner, |inner| TlsClient::connect_poll(inner));
                }
                Effect::PollHandshake => {
                    Self::schedule_guarded(inner, |inner| TlsClient::handshake_poll(inner));
                }
                Effect::StartRead => {
                    Self::schedule_read(inner, TimeSpan::ZERO);
                }
                Effect::RetrySend => {
                    Self::schedule_guarded(inner, |inner| {
                        let pending = {
                            let guard = inner.borrow();
                            matches!(guard.machine.state(), State::Handshaked | State::Sending)
                                && !guard.ctx.send_buffer.is_empty()
                        };
                        if pending {
                            TlsClient::drive(inner, Trigger::Send);
                        }
                    });
                }
                Effect::CancelConnectTimer => {
                    let token = inner.borrow_mut().ctx.connect_timer.take();
                    if let Some(token) = token {
                        inner.borrow().scheduler.cancel(token);
                    }
                }
            }
        }
    }

    /// Schedules `action` one poll interval out, dropped if the client is
    /// gone by then.
    fn schedule_guarded(
        inner: &Rc<RefCell<Inner>>,
        action: impl Fn(&Rc<RefCell<Inner>>) + 'static,
    ) {
        let (scheduler, delay) = {
            let guard = inner.borrow();
            (guard.scheduler.clone(), guard.ctx.poll_interval)
        };
        let weak = Rc::downgrade(inner);
        scheduler.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                action(&inner);
            }
        });
    }

    fn connect_poll(inner: &Rc<RefCell<Inner>>) {
        let trigger = {
            let guard = inner.borrow();
            if guard.machine.state() != State::Connecting {
                return;
            }
            guard.ctx.connect_readiness()
        };
        match trigger {
            Some(trigger) => Self::drive(inner, trigger),
            None => {
                inner.borrow_mut().ctx.effects.push_back(Effect::PollConnect);
                Self::flush_effects(inner);
            }
        }
    }

    fn handshake_poll(inner: &Rc<RefCell<Inner>>) {
        enum Outcome {
            Done,
            Pending,
            Failed(String),
        }

        let outcome = {
            let mut guard = inner.borrow_mut();
            if guard.machine.state() != State::Handshaking {
                return;
            }
            match guard.ctx.pump_handshake() {
                Handshake::Complete => Outcome::Done,
                Handshake::Pending => Outcome::Pending,
                Handshake::Failed(reason) => Outcome::Failed(reason),
            }
        };

        match outcome {
            Outcome::Done => Self::drive(inner, Trigger::Handshaked),
            Outcome::Pending => {
                inner
                    .borrow_mut()
                    .ctx
                    .effects
                    .push_back(Effect::PollHandshake);
                Self::flush_effects(inner);
            }
            Outcome::Failed(reason) => {
                warn!("tls handshake failed: {reason}");
                Self::drive(inner, Trigger::Disconnected);
            }
        }
    }

    fn schedule_read(inner: &Rc<RefCell<Inner>>, delay: TimeSpan) {
        let scheduler = inner.borrow().scheduler.clone();
        let weak = Rc::downgrade(inner);
        scheduler.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                TlsClient::read_poll(&inner);
            }
        });
    }

    fn read_poll(inner: &Rc<RefCell<Inner>>) {
        enum Outcome {
            Closed,
            Data(BytesMut),
            NotReady,
            Failed(String),
        }

        let outcome = {
            let mut guard = inner.borrow_mut();
            if !matches!(guard.machine.state(), State::Handshaked | State::Sending) {
                return;
            }
            if guard.ctx.socket.poll(Interest::Read, TimeSpan::ZERO) {
                match guard.ctx.pump_read() {
                    Ok(TlsRead::Closed) => Outcome::Closed,
                    Ok(TlsRead::Data(data)) => Outcome::Data(data),
                    Err(reason) => Outcome::Failed(reason),
                }
            } else {
                Outcome::NotReady
            }
        };

        match outcome {
            Outcome::Closed => Self::drive(inner, Trigger::Disconnected),
            Outcome::Failed(reason) => {
                warn!("tls read failed: {reason}");
                Self::drive(inner, Trigger::Disconnected);
            }
            Outcome::Data(data) => {
                if !data.is_empty() {
                    let event = inner.borrow().ctx.data_received.clone();
                    event.emit(&data);
                }
                Self::schedule_read(inner, TimeSpan::ZERO);
            }
            Outcome::NotReady => {
                let delay = inner.borrow().ctx.poll_interval;
                Self::schedule_read(inner, delay);
            }
        }
    }
}
