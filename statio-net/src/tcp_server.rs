//! Listening socket with an accept-poll loop and a client ownership arena.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::warn;

use statio::Event;
use statio_executor::{Scheduler, TimeSpan};

use crate::socket::{Endpoint, Interest, Socket};
use crate::tcp_client::{default_poll_interval, TcpClient};
use crate::NetError;

/// Argument of [`TcpServer::client_accepted`].
pub struct ClientAccepted {
    /// The freshly accepted, already-connected client.
    pub client: TcpClient,
    /// The peer's address.
    pub endpoint: Endpoint,
}

struct Inner {
    socket: Socket,
    scheduler: Scheduler,
    poll_interval: TimeSpan,
    client_accepted: Event<ClientAccepted>,
    clients: HashMap<u64, TcpClient>,
    next_client_id: u64,
}

/// A non-blocking TCP listener.
///
/// Accepted connections become [`TcpClient`]s owned by the server's arena;
/// each entry is dropped one loop turn after its client disconnects, so
/// handlers running inside the disconnect dispatch still see a live client.
#[derive(Clone)]
pub struct TcpServer {
    inner: Rc<RefCell<Inner>>,
}

impl TcpServer {
    /// Creates an unbound server with the default accept poll interval
    /// (1 ms).
    pub fn new(scheduler: &Scheduler) -> Result<Self, NetError> {
        Self::with_poll_interval(scheduler, default_poll_interval())
    }

    /// Creates an unbound server polling for pending connections at
    /// `poll_interval`.
    pub fn with_poll_interval(
        scheduler: &Scheduler,
        poll_interval: TimeSpan,
    ) -> Result<Self, NetError> {
        let socket = Socket::stream()?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            inner: Rc::new(RefCell::new(Inner {
                socket,
                scheduler: scheduler.clone(),
                poll_interval,
                client_accepted: Event::new(),
                clients: HashMap::new(),
                next_client_id: 0,
            })),
        })
    }

    /// Fires for every accepted connection, before the client reports
    /// `connected`, so handlers can subscribe to the client's events first.
    pub fn client_accepted(&self) -> Event<ClientAccepted> {
        self.inner.borrow().client_accepted.clone()
    }

    /// Binds the listening socket. Port 0 picks an ephemeral port; see
    /// [`local_endpoint`](Self::local_endpoint).
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

    /// The number of live accepted clients.
    pub fn client_count(&self) -> usize {
        self.inner.borrow().clients.len()
    }

    fn schedule_accept(inner: &Rc<RefCell<Inner>>) {
        let (scheduler, delay) = {
            let guard = inner.borrow();
            (guard.scheduler.clone(), guard.poll_interval)
        };
        let weak = Rc::downgrade(inner);
        scheduler.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                TcpServer::accept_poll(&inner);
            }
        });
    }

    fn accept_poll(inner: &Rc<RefCell<Inner>>) {
        let pending = inner
            .borrow()
            .socket
            .poll(Interest::Read, TimeSpan::ZERO);

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

        let (scheduler, accepted_event) = {
            let guard = inner.borrow();
            (guard.scheduler.clone(), guard.client_accepted.clone())
        };
        let client = TcpClient::from_accepted(socket, &scheduler);

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

        // Emit before assuming connected so listeners can register handlers
        // that must observe the client's connected event.
        accepted_event.emit(&ClientAccepted {
            client: client.clone(),
            endpoint,
        });
        client.assume_connected();
    }
}
