//! TLS listener: the TCP accept loop with a per-connection server session.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use log::warn;

use statio::Event;
use statio_executor::{Scheduler, TimeSpan};

use crate::socket::{Endpoint, Interest, Socket};
use crate::tcp_client::default_poll_interval;
use crate::tls_client::TlsClient;
use crate::NetError;

/// Argument of [`TlsServer::client_accepted`].
pub struct TlsClientAccepted {
    /// The accepted connection; its `connected` event fires after its
    /// handshake completes.
    pub client: TlsClient,
    /// The peer's address.
    pub endpoint: Endpoint,
}

struct Inner {
    socket: Socket,
    scheduler: Scheduler,
    config: Arc<rustls::ServerConfig>,
    poll_interval: TimeSpan,
    client_accepted: Event<TlsClientAccepted>,
    clients: HashMap<u64, TlsClient>,
    next_client_id: u64,
}

/// A TLS listener with the same shape as [`TcpServer`].
///
/// [`TcpServer`]: crate::TcpServer
#[derive(Clone)]
pub struct TlsServer {
    inner: Rc<RefCell<Inner>>,
}

impl TlsServer {
    /// Creates an unbound TLS server. `config` supplies the certificate
    /// chain and private key presented to clients.
    pub fn new(scheduler: &Scheduler, config: Arc<rustls::ServerConfig>) -> Result<Self, NetError> {
        let socket = Socket::stream()?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            inner: Rc::new(RefCell::new(Inner {
                socket,
                scheduler: scheduler.clone(),
                config,
                poll_interval: default_poll_interval(),
                client_accepted: Event::new(),
                clients: HashMap::new(),
                next_client_id: 0,
            })),
        })
    }

    /// Fires for every accepted connection, before its handshake starts.
    pub fn client_accepted(&self) -> Event<TlsClientAccepted> {
        self.inner.borrow().client_accepted.clone()
    }

    /// Binds the listening socket.
    pub fn bind(&self, port: u16) -> Result<(), NetError> {
        self.inner.borrow().socket.bind(port)?;
        Ok(())
    }

    /// The bound local address.
    pub fn local_endpoint(&self) -> Result<Endpoint, NetError> {
        Ok(self.inner.borrow().socket.local_endpoint()?)
    }

    /// Starts listening and begins the accept-poll loop.
    pub fn listen(&self, backlog: i32) -> Result<(), NetError> {
        self.inner.borrow().socket.listen(backlog)?;
        Self::schedule_accept(&self.inner);
        Ok(())
    }

    fn schedule_accept(inner: &Rc<RefCell<Inner>>) {
        let (scheduler, delay) = {
            let guard = inner.borrow();
            (guard.scheduler.clone(), guard.poll_interval)
        };
        let weak = Rc::downgrade(inner);
        scheduler.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                TlsServer::accept_poll(&inner);
            }
        });
    }

    fn accept_poll(inner: &Rc<RefCell<Inner>>) {
        let pending = inner.borrow().socket.poll(Interest::Read, TimeSpan::ZERO);

        if pending {
            let accepted = inner.borrow().socket.accept();
            match accepted {
                Some((socket, endpoint)) => Self::adopt(inner, socket, endpoint),
                None => warn!("a client was pending but could not be accepted"),
            }
        }

        Self::schedule_accept(inner);
    }

    fn adopt(inner: &Rc<RefCell<Inner>>, socket: Socket, endpoint: Endpoint) {
        if let Err(err) = socket.set_nonblocking(true) {
            warn!("accepted client could not be made non-blocking: {err}");
            return;
        }

        let (scheduler, config, accepted_event) = {
            let guard = inner.borrow();
            (
                guard.scheduler.clone(),
                guard.config.clone(),
                guard.client_accepted.clone(),
            )
        };

        let session = match rustls::ServerConnection::new(config) {
            Ok(session) => session,
            Err(err) => {
                warn!("tls server session could not be created: {err}");
                return;
            }
        };
        let client = TlsClient::from_accepted(socket, &scheduler, session);

        let id = {
            let mut guard = inner.borrow_mut();
            let id = guard.next_client_id;
            guard.next_client_id += 1;
            guard.clients.insert(id, client.clone());
            id
        };

        let weak: Weak<RefCell<Inner>> = Rc::downgrade(inner);
        let removal_scheduler = scheduler.clone();
        client.disconnected().subscribe(move |_| {
            let weak = weak.clone();
            removal_scheduler.invoke(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().clients.remove(&id);
                }
            });
        });

        accepted_event.emit(&TlsClientAccepted {
            client: client.clone(),
            endpoint,
        });
        client.assume_connected();
    }
}
