//! The XMPP client state machine and its TLS/XML plumbing.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, error, warn};

use statio::{Event, StateMachine};
use statio_executor::{Scheduler, TimeSpan};
use statio_net::{Endpoint, TlsClient};
use statio_xml::{DocumentParser, ProgressiveParser, XmlElement, XmlToken};

use crate::stanza::{self, BIND_NS, REGISTER_NS, SASL_NS, SESSION_NS};
use crate::XmppError;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum State {
    Idle,
    Connecting,
    CanDisconnect,
    Connected,
    Disconnected,
    CreatingPreLoginStream,
    CreatedPreLoginStream,
    LoggingIn,
    LoggedIn,
    LoginInvalidAccount,
    LoginInvalidPassword,
    CreatingAccount,
    CreatingPostLoginStream,
    CreatedPostLoginStream,
    BindingResource,
    BoundResource,
    CreatingSession,
    InSession,
    CreatedSession,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Trigger {
    Connect,
    Connected,
    Disconnected,
    CreateStream,
    CreatedStream,
    Login,
    LoggedIn,
    LoginInvalidAccount,
    LoginInvalidPassword,
    InvalidLogin,
    CreateAccount,
    CreatedAccount,
    BindResource,
    BoundResource,
    CreateSession,
    CreatedSession,
}

enum Effect {
    Send(String),
    EmitConnected,
    ScheduleKeepalive,
}

struct XmppCtx {
    username: String,
    password: String,
    server_host: String,
    jid: String,
    next_stanza_id: u64,
    effects: VecDeque<Effect>,
}

impl XmppCtx {
    fn next_id(&mut self) -> String {
        let id = self.next_stanza_id;
        self.next_stanza_id += 1;
        id.to_string()
    }

    fn open_stream(&mut self) -> Trigger {
        self.effects
            .push_back(Effect::Send(stanza::stream_header(&self.server_host)));
        Trigger::CreateStream
    }
}

/// Argument of [`XmppClient::presence_received`].
pub struct PresenceReceived {
    /// The sender's JID.
    pub from: String,
    /// The `<show>` value, e.g. `chat`, `away`, `dnd`.
    pub show: String,
}

/// Argument of [`XmppClient::message_received`].
pub struct MessageReceived {
    /// The sender's JID.
    pub from: String,
    /// The message body text.
    pub body: String,
}

struct Events {
    connected: Event<()>,
    presence_received: Event<PresenceReceived>,
    message_received: Event<MessageReceived>,
}

struct Inner {
    machine: StateMachine<State, Trigger, XmppCtx>,
    ctx: XmppCtx,
    tls: TlsClient,
    scheduler: Scheduler,
    progressive: ProgressiveParser,
    document: DocumentParser,
    /// Raw text received while a stream is being opened; the part after the
    /// stream header's `>` is handed to the document parser.
    raw_tail: String,
    /// Whether the tokenizer has reported the `<stream:stream>` start but the
    /// header's `>` has not been located yet.
    stream_started: bool,
    events: Events,
}

fn build_machine() -> StateMachine<State, Trigger, XmppCtx> {
    let mut machine = StateMachine::new(State::Idle);

    machine
        .configure(State::Idle)
        .permit(Trigger::Connect, State::Connecting);

    machine
        .configure(State::Connecting)
        .permit(Trigger::Connected, State::Connected);

    machine
        .configure(State::CanDisconnect)
        .permit(Trigger::Disconnected, State::Disconnected);

    machine
        .configure(State::Connected)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut XmppCtx, fire| {
            let trigger = ctx.open_stream();
            fire.fire(trigger);
        })
        .permit(Trigger::CreateStream, State::CreatingPreLoginStream);

    machine
        .configure(State::CreatingPreLoginStream)
        .substate_of(State::CanDisconnect)
        .permit(Trigger::CreatedStream, State::CreatedPreLoginStream);

    machine
        .configure(State::CreatedPreLoginStream)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut XmppCtx, fire| {
            ctx.effects
                .push_back(Effect::Send(stanza::auth(&ctx.username, &ctx.password)));
            fire.fire(Trigger::Login);
        })
        .permit(Trigger::Login, State::LoggingIn);

    machine
        .configure(State::LoggingIn)
        .substate_of(State::CanDisconnect)
        .permit(Trigger::InvalidLogin, State::CreatedPreLoginStream)
        .permit(Trigger::LoggedIn, State::LoggedIn)
        .permit(Trigger::LoginInvalidAccount, State::LoginInvalidAccount)
        .permit(Trigger::LoginInvalidPassword, State::LoginInvalidPassword);

    machine
        .configure(State::LoginInvalidAccount)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut XmppCtx, fire| {
            let id = ctx.next_id();
            ctx.effects.push_back(Effect::Send(stanza::register(
                &id,
                &ctx.username,
                &ctx.password,
            )));
            fire.fire(Trigger::CreateAccount);
        })
        .permit(Trigger::InvalidLogin, State::CreatedPreLoginStream)
        .permit(Trigger::CreateAccount, State::CreatingAccount);

    machine
        .configure(State::LoginInvalidPassword)
        .substate_of(State::CanDisconnect)
        .on_entry(|_ctx: &mut XmppCtx, _fire| {
            error!("the server rejected the configured password");
        })
        .permit(Trigger::InvalidLogin, State::CreatedPreLoginStream)
        .permit(Trigger::Login, State::LoggingIn);

    machine
        .configure(State::CreatingAccount)
        .substate_of(State::CanDisconnect)
        .permit(Trigger::CreatedAccount, State::LoggedIn);

    machine
        .configure(State::LoggedIn)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut XmppCtx, fire| {
            let trigger = ctx.open_stream();
            fire.fire(trigger);
        })
        .permit(Trigger::CreateStream, State::CreatingPostLoginStream);

    machine
        .configure(State::CreatingPostLoginStream)
        .substate_of(State::CanDisconnect)
        .permit(Trigger::CreatedStream, State::CreatedPostLoginStream);

    machine
        .configure(State::CreatedPostLoginStream)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut XmppCtx, fire| {
            let id = ctx.next_id();
            ctx.effects
                .push_back(Effect::Send(stanza::bind_resource(&id, &ctx.server_host)));
            fire.fire(Trigger::BindResource);
        })
        .permit(Trigger::BindResource, State::BindingResource);

    machine
        .configure(State::BindingResource)
        .substate_of(State::CanDisconnect)
        .permit(Trigger::BoundResource, State::BoundResource);

    machine
        .configure(State::BoundResource)
        .substate_of(State::CanDisconnect)
        .on_entry(|ctx: &mut XmppCtx, fire| {
            let id = ctx.next_id();
            ctx.effects
                .push_back(Effect::Send(stanza::create_session(&id, &ctx.server_host)));
            fire.fire(Trigger::CreateSession);
        })
        .permit(Trigger::CreateSession, State::CreatingSession);

    machine
        .configure(State::CreatingSession)
        .substate_of(State::CanDisconnect)
        .permit(Trigger::CreatedSession, State::CreatedSession);

    machine
        .configure(State::InSession)
        .substate_of(State::CanDisconnect);

    machine
        .configure(State::CreatedSession)
        .substate_of(State::InSession)
        .on_entry(|ctx: &mut XmppCtx, _fire| {
            ctx.effects.push_back(Effect::EmitConnected);
            ctx.effects
                .push_back(Effect::Send(stanza::initial_presence()));
            ctx.effects.push_back(Effect::ScheduleKeepalive);
        });

    machine.configure(State::Disconnected);

    machine
}

/// An XMPP client: PLAIN login, resource binding, presence and messaging
/// over TLS.
///
/// `connected` fires once the session is fully established (stream, auth,
/// bind, session); [`jid`](Self::jid) is known from that point on.
#[derive(Clone)]
pub struct XmppClient {
    inner: Rc<RefCell<Inner>>,
}

impl XmppClient {
    /// Creates a client for the given account. `config` is the TLS
    /// configuration used to reach the server.
    pub fn new(
        scheduler: &Scheduler,
        config: Arc<rustls::ClientConfig>,
        username: &str,
        password: &str,
    ) -> Result<Self, XmppError> {
        let tls = TlsClient::new(scheduler, config)?;

        let inner = Rc::new(RefCell::new(Inner {
            machine: build_machine(),
            ctx: XmppCtx {
                username: username.to_string(),
                password: password.to_string(),
                server_host: String::new(),
                jid: String::new(),
                next_stanza_id: 0,
                effects: VecDeque::new(),
            },
            tls: tls.clone(),
            scheduler: scheduler.clone(),
            progressive: ProgressiveParser::new(),
            document: DocumentParser::new(),
            raw_tail: String::new(),
            stream_started: false,
            events: Events {
                connected: Event::new(),
                presence_received: Event::new(),
                message_received: Event::new(),
            },
        }));

        let weak = Rc::downgrade(&inner);
        tls.connected().subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                XmppClient::drive(&inner, Trigger::Connected);
            }
        });

        let weak = Rc::downgrade(&inner);
        tls.data_received().subscribe(move |data: &BytesMut| {
            if let Some(inner) = weak.upgrade() {
                XmppClient::handle_data(&inner, data);
            }
        });

        let weak = Rc::downgrade(&inner);
        tls.disconnected().subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                let can_fire = {
                    let guard = inner.borrow();
                    guard.machine.can_fire(Trigger::Disconnected, &guard.ctx)
                };
                if can_fire {
                    XmppClient::drive(&inner, Trigger::Disconnected);
                }
            }
        });

        Ok(Self { inner })
    }

    /// Fires when the session is established and messaging may begin.
    pub fn connected(&self) -> Event<()> {
        self.inner.borrow().events.connected.clone()
    }

    /// Fires when the transport closes.
    pub fn disconnected(&self) -> Event<()> {
        self.inner.borrow().tls.disconnected()
    }

    /// Fires for presence updates carrying a `<show>` value.
    pub fn presence_received(&self) -> Event<PresenceReceived> {
        self.inner.borrow().events.presence_received.clone()
    }

    /// Fires for inbound chat messages.
    pub fn message_received(&self) -> Event<MessageReceived> {
        self.inner.borrow().events.message_received.clone()
    }

    /// The full JID assigned at resource binding; empty until then.
    pub fn jid(&self) -> String {
        self.inner.borrow().ctx.jid.clone()
    }

    /// Connects to the server and runs the whole login flow.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<(), XmppError> {
        self.inner.borrow_mut().ctx.server_host = endpoint.host().to_string();
        Self::try_fire(&self.inner, Trigger::Connect)?;
        let tls = self.inner.borrow().tls.clone();
        tls.connect(endpoint)?;
        Ok(())
    }

    /// Sends a chat message.
    pub fn send_message(&self, to: &str, body: &str) -> Result<(), XmppError> {
        let (tls, stanza) = {
            let guard = self.inner.borrow();
            (
                guard.tls.clone(),
                stanza::message(&guard.ctx.jid, to, body),
            )
        };
        tls.send(stanza.as_bytes())?;
        Ok(())
    }

    /// Closes the connection.
    pub fn disconnect(&self) -> Result<(), XmppError> {
        let tls = self.inner.borrow().tls.clone();
        tls.disconnect()?;
        Ok(())
    }

    fn try_fire(inner: &Rc<RefCell<Inner>>, trigger: Trigger) -> Result<(), XmppError> {
        let result = {
            let mut guard = inner.borrow_mut();
            let Inner { machine, ctx, .. } = &mut *guard;
            machine.fire(trigger, ctx)
        };
        Self::flush_effects(inner);
        result.map_err(XmppError::from)
    }

    fn drive(inner: &Rc<RefCell<Inner>>, trigger: Trigger) {
        if let Err(err) = Self::try_fire(inner, trigger) {
            error!("xmpp client drive failed: {err}");
            debug_assert!(false, "xmpp client drive failed: {err}");
        }
    }

    fn flush_effects(inner: &Rc<RefCell<Inner>>) {
        loop {
            let effect = inner.borrow_mut().ctx.effects.pop_front();
            let Some(effect) = effect else { break };

            match effect {
                Effect::Send(text) => {
                    let tls = inner.borrow().tls.clone();
                    if let Err(err) = tls.send(text.as_bytes()) {
                        warn!("xmpp transmit failed: {err}");
                    }
                }
                Effect::EmitConnected => {
                    let event = inner.borrow().events.connected.clone();
                    event.emit(&());
                }
                Effect::ScheduleKeepalive => Self::schedule_keepalive(inner),
            }
        }
    }

    /// A single space every minute keeps NATs and the server's dead-peer
    /// detection at bay (RFC 6120 §4.6).
    fn schedule_keepalive(inner: &Rc<RefCell<Inner>>) {
        let scheduler = inner.borrow().scheduler.clone();
        let weak = Rc::downgrade(inner);
        scheduler.schedule(TimeSpan::from_minutes(1.0), move || {
            let Some(inner) = weak.upgrade() else { return };
            let in_session = matches!(
                inner.borrow().machine.state(),
                State::CreatedSession | State::InSession
            );
            if in_session {
                let tls = inner.borrow().tls.clone();
                if let Err(err) = tls.send(b" ") {
                    warn!("keepalive failed: {err}");
                }
                Self::schedule_keepalive(&inner);
            }
        });
    }

    /// Routes inbound bytes: while a stream is being opened they go through
    /// the progressive parser (watching for `<stream:stream>`); everything
    /// after that header's `>`, and every later read, feeds the document
    /// parser instead.
    fn handle_data(inner: &Rc<RefCell<Inner>>, data: &BytesMut) {
        let text = String::from_utf8_lossy(data).into_owned();
        debug!("xmpp received: {text}");

        let creating_stream = matches!(
            inner.borrow().machine.state(),
            State::CreatingPreLoginStream | State::CreatingPostLoginStream
        );

        if !creating_stream {
            let appended = inner.borrow_mut().document.append(&text);
            if let Err(err) = appended {
                warn!("stanza unparseable: {err}");
                let tls = inner.borrow().tls.clone();
                let _ = tls.disconnect();
                return;
            }
            Self::pump_documents(inner);
            return;
        }

        let remainder = {
            let mut guard = inner.borrow_mut();
            guard.raw_tail.push_str(&text);
            if let Err(err) = guard.progressive.append(&text) {
                warn!("stream header unparseable: {err}");
                return;
            }

            while let Some(token) = guard.progressive.poll_token() {
                if let XmlToken::StartElement { namespace, name } = &token {
                    if namespace == "stream" && name == "stream" {
                        guard.stream_started = true;
                    }
                }
            }

            if guard.stream_started {
                // The header's '>' is the first one after the tag open in the
                // raw byte stream; the tokenizer may already have consumed
                // past it internally.
                let header_end = guard.raw_tail.find("<stream").and_then(|start| {
                    guard.raw_tail[start..].find('>').map(|end| start + end)
                });
                header_end.map(|end| {
                    let remainder = guard.raw_tail[end + 1..].to_string();
                    guard.stream_started = false;
                    guard.raw_tail.clear();
                    remainder
                })
            } else {
                None
            }
        };

        if let Some(remainder) = remainder {
            let appended = inner.borrow_mut().document.append(&remainder);
            if let Err(err) = appended {
                warn!("stream content unparseable: {err}");
            }
            Self::drive(inner, Trigger::CreatedStream);
            Self::pump_documents(inner);
        }
    }

    fn pump_documents(inner: &Rc<RefCell<Inner>>) {
        loop {
            let document = inner.borrow_mut().document.poll_document();
            match document {
                Some(document) => Self::handle_document(inner, document),
                None => break,
            }
        }
    }

    fn handle_document(inner: &Rc<RefCell<Inner>>, document: XmlElement) {
        fn attr<'a>(element: &'a XmlElement, name: &str) -> &'a str {
            element
                .attribute(name)
                .map(|attribute| attribute.value.as_str())
                .unwrap_or("")
        }

        fn child_ns<'a>(element: &'a XmlElement, child: &str) -> &'a str {
            element
                .element(child)
                .and_then(|child| child.attribute("xmlns"))
                .map(|attribute| attribute.value.as_str())
                .unwrap_or("")
        }

        let state = inner.borrow().machine.state();
        let name = document.name();

        if state == State::LoggingIn && name == "success" && attr(&document, "xmlns") == SASL_NS {
            Self::drive(inner, Trigger::LoggedIn);
        } else if state == State::LoggingIn
            && name == "failure"
            && attr(&document, "xmlns") == SASL_NS
            && document.element("bad-protocol").is_some()
        {
            Self::drive(inner, Trigger::LoginInvalidAccount);
        } else if state == State::LoggingIn
            && name == "failure"
            && attr(&document, "xmlns") == SASL_NS
            && document.element("not-authorized").is_some()
        {
            Self::drive(inner, Trigger::LoginInvalidPassword);
        } else if state == State::CreatingAccount
            && name == "iq"
            && child_ns(&document, "query") == REGISTER_NS
        {
            Self::drive(inner, Trigger::CreatedAccount);
        } else if state == State::BindingResource
            && name == "iq"
            && child_ns(&document, "bind") == BIND_NS
        {
            let jid = document
                .element("bind")
                .and_then(|bind| bind.element("jid"))
                .map(|jid| jid.value().to_string())
                .unwrap_or_default();
            inner.borrow_mut().ctx.jid = jid;
            Self::drive(inner, Trigger::BoundResource);
        } else if state == State::CreatingSession
            && name == "iq"
            && child_ns(&document, "session") == SESSION_NS
        {
            Self::drive(inner, Trigger::CreatedSession);
        } else if name == "iq"
            && attr(&document, "type") == "set"
            && document
                .element("query")
                .and_then(|query| query.element("item"))
                .map(|item| attr(item, "subscription"))
                == Some("from")
        {
            let (id, jid) = {
                let item = document
                    .element("query")
                    .and_then(|query| query.element("item"));
                (
                    attr(&document, "id").to_string(),
                    item.map(|item| attr(item, "jid").to_string()).unwrap_or_default(),
                )
            };
            Self::send_stanza(inner, &stanza::accept_subscription(&id, &jid));
        } else if name == "presence" && attr(&document, "type") == "subscribe" {
            let (jid, to) = {
                let guard = inner.borrow();
                (guard.ctx.jid.clone(), attr(&document, "from").to_string())
            };
            Self::send_stanza(inner, &stanza::presence(&jid, &to, "subscribed"));
        } else if name == "presence"
            && document
                .element("show")
                .map(|show| !show.value().is_empty())
                .unwrap_or(false)
        {
            let args = PresenceReceived {
                from: attr(&document, "from").to_string(),
                show: document
                    .element("show")
                    .map(|show| show.value().to_string())
                    .unwrap_or_default(),
            };
            let event = inner.borrow().events.presence_received.clone();
            event.emit(&args);
        } else if name == "message" {
            let args = MessageReceived {
                from: attr(&document, "from").to_string(),
                body: document
                    .element("body")
                    .map(|body| body.value().to_string())
                    .unwrap_or_default(),
            };
            let event = inner.borrow().events.message_received.clone();
            event.emit(&args);
        } else {
            warn!("unhandled stanza: {document}");
        }
    }

    fn send_stanza(inner: &Rc<RefCell<Inner>>, stanza: &str) {
        let tls = inner.borrow().tls.clone();
        if let Err(err) = tls.send(stanza.as_bytes()) {
            warn!("xmpp transmit failed: {err}");
        }
    }
}
