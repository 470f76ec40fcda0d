//! Connected-stream transport driven as a state machine.
//!
//! The machine is `Idle → Connecting → Connected (⊃ Sending) → Disconnected`.
//! Entry actions run against the client's context and request follow-up work
//! as *effects*; the driver executes effects only after the machine borrow is
//! released, so user handlers can call back into the client (for example,
//! `send` from inside a `connected` handler) without re-entrancy hazards.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::BytesMut;
use log::{error, warn};

use statio::{Event, StateMachine};
use statio_executor::{Scheduler, TimeSpan, TimerToken};

use crate::socket::{Endpoint, Interest, Socket};
use crate::NetError;

pub(crate) const DEFAULT_BUFFER_SIZE: usize = 4096;

pub(crate) fn default_poll_interval() -> TimeSpan {
    TimeSpan::from_milliseconds(1.0)
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum State {
    Idle,
    Connecting,
    Connected,
    Sending,
    Disconnected,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Trigger {
    Connect,
    Connected,
    Send,
    Timeout,
    Disconnected,
}

enum Effect {
    EmitConnected,
    EmitDisconnected,
    PollConnect,
    StartRead,
    RetrySend,
    CancelConnectTimer,
}

struct TcpCtx {
    socket: Socket,
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

impl TcpCtx {
    /// Readiness probe for an in-progress connect.
    fn connect_readiness(&self) -> Option<Trigger> {
        if self.socket.poll(Interest::Write, TimeSpan::ZERO) {
            Some(Trigger::Connected)
        } else if self.socket.poll(Interest::Error, TimeSpan::ZERO) {
            Some(Trigger::Disconnected)
        } else {
            None
        }
    }
}

struct Inner {
    machine: StateMachine<State, Trigger, TcpCtx>,
    ctx: TcpCtx,
    scheduler: Scheduler,
}

/// A non-blocking TCP stream client.
///
/// Handles are cheap clones sharing one connection. See the
/// [module documentation](self) for the driving model.
#[derive(Clone)]
pub struct TcpClient {
    inner: Rc<RefCell<Inner>>,
}

fn build_machine() -> StateMachine<State, Trigger, TcpCtx> {
    let mut machine = StateMachine::new(State::Idle);

    machine
        .configure(State::Idle)
        .permit(Trigger::Connected, State::Connected)
        .permit(Trigger::Connect, State::Connecting);

    machine
        .configure(State::Connecting)
        .on_entry(|ctx: &mut TcpCtx, fire| match ctx.connect_readiness() {
            Some(trigger) => fire.fire(trigger),
            None => ctx.effects.push_back(Effect::PollConnect),
        })
        .permit(Trigger::Connected, State::Connected)
        .permit(Trigger::Disconnected, State::Disconnected)
        .permit(Trigger::Timeout, State::Disconnected);

    machine
        .configure(State::Connected)
        .on_entry(|ctx: &mut TcpCtx, _fire| {
            ctx.send_buffer.clear();
            ctx.effects.push_back(Effect::CancelConnectTimer);
            ctx.effects.push_back(Effect::EmitConnected);
            ctx.effects.push_back(Effect::StartRead);
        })
        .permit(Trigger::Send, State::Sending)
        .permit(Trigger::Disconnected, State::Disconnected);

    machine
        .configure(State::Sending)
        .substate_of(State::Connected)
        .on_entry(|ctx: &mut TcpCtx, fire| match ctx.socket.send(&ctx.send_buffer) {
            Ok(count) => {
                let _ = ctx.send_buffer.split_to(count);
                if !ctx.send_buffer.is_empty() {
                    if count == 0 {
                        // Socket is full; retry at the poll interval instead
                        // of spinning on an immediate re-fire.
                        ctx.effects.push_back(Effect::RetrySend);
                    } else {
                        fire.fire(Trigger::Send);
                    }
                }
            }
            Err(err) => {
                warn!("tcp send failed: {err}");
                fire.fire(Trigger::Disconnected);
            }
        });

    machine
        .configure(State::Disconnected)
        .on_entry(|ctx: &mut TcpCtx, _fire| {
            ctx.effects.push_back(Effect::EmitDisconnected);
        });

    machine
}

impl TcpClient {
    /// Creates an unconnected client with default buffer size and poll
    /// interval.
    pub fn new(scheduler: &Scheduler) -> Result<Self, NetError> {
        Self::with_options(scheduler, DEFAULT_BUFFER_SIZE, default_poll_interval())
    }

    /// Creates an unconnected client with an explicit read-buffer size and
    /// readiness poll interval.
    pub fn with_options(
        scheduler: &Scheduler,
        buffer_size: usize,
        poll_interval: TimeSpan,
    ) -> Result<Self, NetError> {
        let socket = Socket::stream()?;
        socket.set_nonblocking(true)?;
        Ok(Self::wrap(socket, scheduler, buffer_size, poll_interval))
    }

    pub(crate) fn wrap(
        socket: Socket,
        scheduler: &Scheduler,
        buffer_size: usize,
        poll_interval: TimeSpan,
    ) -> Self {
        let ctx = TcpCtx {
            socket,
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

    /// Wraps a socket already accepted by a server. The caller fires
    /// [`assume_connected`](Self::assume_connected) once handlers are in
    /// place.
    pub(crate) fn from_accepted(socket: Socket, scheduler: &Scheduler) -> Self {
        Self::wrap(socket, scheduler, DEFAULT_BUFFER_SIZE, default_poll_interval())
    }

    pub(crate) fn assume_connected(&self) {
        Self::drive(&self.inner, Trigger::Connected);
    }

    /// Fires when the connection is established (or assumed, for accepted
    /// sockets).
    pub fn connected(&self) -> Event<()> {
        self.inner.borrow().ctx.connected.clone()
    }

    /// Fires when the connection ends, locally or remotely.
    pub fn disconnected(&self) -> Event<()> {
        self.inner.borrow().ctx.disconnected.clone()
    }

    /// Fires for every chunk read from the socket, in arrival order.
    pub fn data_received(&self) -> Event<BytesMut> {
        self.inner.borrow().ctx.data_received.clone()
    }

    /// Whether the client currently holds an established connection.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.inner.borrow().machine.state(),
            State::Connected | State::Sending
        )
    }

    /// Limits how long a connect may stay pending before the client gives up
    /// and reports `disconnected`. Unset by default.
    pub fn set_connect_timeout(&self, timeout: Option<TimeSpan>) {
        self.inner.borrow_mut().ctx.connect_timeout = timeout;
    }

    /// Starts a non-blocking connect to `endpoint`.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<(), NetError> {
        {
            let inner = self.inner.borrow();
            inner.ctx.socket.connect(endpoint)?;
        }

        let timeout = self.inner.borrow().ctx.connect_timeout;
        if let Some(timeout) = timeout {
            let weak = Rc::downgrade(&self.inner);
            let scheduler = self.inner.borrow().scheduler.clone();
            let token = scheduler.schedule(timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    if inner.borrow().machine.state() == State::Connecting {
                        TcpClient::drive(&inner, Trigger::Timeout);
                    }
                }
            });
            self.inner.borrow_mut().ctx.connect_timer = Some(token);
        }

        Self::try_fire(&self.inner, Trigger::Connect)
    }

    /// Queues `data` for transmission. Bytes from consecutive calls reach the
    /// wire in call order; whatever the socket does not take immediately is
    /// retried as it drains.
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
            error!("tcp client drive failed: {err}");
            debug_assert!(false, "tcp client drive failed: {err}");
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
                    let (scheduler, delay) = {
                        let guard = inner.borrow();
                        (guard.scheduler.clone(), guard.ctx.poll_interval)
                    };
                    let weak = Rc::downgrade(inner);
                    scheduler.schedule(delay, move || {
                        if let Some(inner) = weak.upgrade() {
                            TcpClient::connect_poll(&inner);
                        }
                    });
                }
                Effect::StartRead => {
                    Self::schedule_read(inner, TimeSpan::ZERO);
                }
                Effect::RetrySend => {
                    let (scheduler, delay) = {
                        let guard = inner.borrow();
                        (guard.scheduler.clone(), guard.ctx.poll_interval)
                    };
                    let weak = Rc::downgrade(inner);
                    scheduler.schedule(delay, move || {
                        if let Some(inner) = weak.upgrade() {
                            let pending = {
                                let guard = inner.borrow();
                                matches!(guard.machine.state(), State::Connected | State::Sending)
                                    && !guard.ctx.send_buffer.is_empty()
                            };
                            if pending {
                                TcpClient::drive(&inner, Trigger::Send);
                            }
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

    fn schedule_read(inner: &Rc<RefCell<Inner>>, delay: TimeSpan) {
        let scheduler = inner.borrow().scheduler.clone();
        let weak = Rc::downgrade(inner);
        scheduler.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                TcpClient::read_poll(&inner);
            }
        });
    }

    fn read_poll(inner: &Rc<RefCell<Inner>>) {
        enum Outcome {
            Closed,
            Data(BytesMut),
            NotReady,
        }

        let outcome = {
            let guard = inner.borrow();
            if !matches!(guard.machine.state(), State::Connected | State::Sending) {
                return;
            }
            if guard.ctx.socket.poll(Interest::Read, TimeSpan::ZERO) {
                let data = guard.ctx.socket.recv(guard.ctx.buffer_size);
                if data.is_empty() {
                    Outcome::Closed
                } else {
                    Outcome::Data(data)
                }
            } else {
                Outcome::NotReady
            }
        };

        match outcome {
            Outcome::Closed => Self::drive(inner, Trigger::Disconnected),
            Outcome::Data(data) => {
                let event = inner.borrow().ctx.data_received.clone();
                event.emit(&data);
                Self::schedule_read(inner, TimeSpan::ZERO);
            }
            Outcome::NotReady => {
                let delay = inner.borrow().ctx.poll_interval;
                Self::schedule_read(inner, delay);
            }
        }
    }
}
