//! Owned-fd socket wrapper with readiness polling.
//!
//! The wrapper stays close to the OS surface: callers get exactly one
//! operation per method, errors map onto the taxonomy the upper layers route
//! on, and nothing here schedules or retries. Two contracts matter to the
//! transports built on top:
//!
//! - [`Socket::send`] on a non-blocking socket reports a would-block
//!   condition as `Ok(0)`, not as an error.
//! - [`Socket::recv`] returning an empty buffer after the socket polled
//!   readable means the peer closed the connection.

use std::fmt;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

use bytes::BytesMut;
use thiserror::Error;

use statio_executor::TimeSpan;

/// A `(host_or_ip, port)` pair. Resolution happens at connect/send time.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host name or IP literal and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host name or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Readiness condition for [`Socket::poll`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Interest {
    /// Data (or EOF) is available to read.
    Read,
    /// The socket accepts writes; for a connecting socket, the connect
    /// completed successfully.
    Write,
    /// An error condition is pending, e.g. a failed non-blocking connect.
    Error,
}

/// Socket-level failures.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The host name did not resolve to an IPv4 address.
    #[error("host {0} could not be resolved")]
    HostNotFound(String),

    /// A connect was refused outright.
    #[error("connection refused")]
    ConnectionRefused(#[source] io::Error),

    /// Binding the local port failed.
    #[error("bind failed")]
    BindFailed(#[source] io::Error),

    /// Entering the listening state failed.
    #[error("listen failed")]
    ListenFailed(#[source] io::Error),

    /// A write failed for a reason other than would-block.
    #[error("send failed")]
    SendFailed(#[source] io::Error),

    /// An ioctl (non-blocking toggle, readable-byte count) failed.
    #[error("ioctl failed")]
    IoctlFailed(#[source] io::Error),

    /// Setting a socket option failed.
    #[error("invalid socket option")]
    InvalidOption(#[source] io::Error),

    /// The OS refused to create the socket, or the fd went bad.
    #[error("invalid socket handle")]
    InvalidHandle(#[source] io::Error),
}

/// An exclusively-owned, close-on-drop socket handle.
pub struct Socket {
    fd: libc::c_int,
}

impl Socket {
    /// Opens a socket with raw address-family/type/protocol values.
    pub fn open(family: libc::c_int, kind: libc::c_int, protocol: libc::c_int) -> Result<Self, SocketError> {
        let fd = unsafe { libc::socket(family, kind, protocol) };
        if fd < 0 {
            return Err(SocketError::InvalidHandle(io::Error::last_os_error()));
        }
        Ok(Self { fd })
    }

    /// Opens an IPv4 TCP socket.
    pub fn stream() -> Result<Self, SocketError> {
        Self::open(libc::AF_INET, libc::SOCK_STREAM, libc::IPPROTO_TCP)
    }

    /// Opens an IPv4 UDP socket.
    pub fn datagram() -> Result<Self, SocketError> {
        Self::open(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_UDP)
    }

    pub(crate) fn from_fd(fd: libc::c_int) -> Self {
        Self { fd }
    }

    /// Binds the socket to `port` on all local interfaces.
    pub fn bind(&self, port: u16) -> Result<(), SocketError> {
        let addr = sockaddr_v4(Ipv4Addr::UNSPECIFIED, port);
        let rc = unsafe {
            libc::bind(
                self.fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(SocketError::BindFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Starts a connect to `endpoint`. On a non-blocking socket the connect
    /// is usually still in progress when this returns; poll
    /// [`Interest::Write`] to learn the outcome.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<(), SocketError> {
        let addr = resolve(endpoint)?;
        let rc = unsafe {
            libc::connect(
                self.fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(SocketError::ConnectionRefused(err));
            }
        }
        Ok(())
    }

    /// Starts listening with the given backlog.
    pub fn listen(&self, backlog: i32) -> Result<(), SocketError> {
        if unsafe { libc::listen(self.fd, backlog) } != 0 {
            return Err(SocketError::ListenFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Accepts one pending connection, if any.
    pub fn accept(&self) -> Option<(Socket, Endpoint)> {
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let fd = unsafe {
            libc::accept(
                self.fd,
                &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut len,
            )
        };
        if fd < 0 {
            return None;
        }
        Some((Socket::from_fd(fd), endpoint_of(&addr)))
    }

    /// Switches the socket between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), SocketError> {
        let mut value: libc::c_int = if nonblocking { 1 } else { 0 };
        let rc = unsafe { libc::ioctl(self.fd, libc::FIONBIO as _, &mut value) };
        if rc != 0 {
            return Err(SocketError::IoctlFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// The number of bytes that can be read without blocking.
    pub fn available(&self) -> Result<usize, SocketError> {
        let mut count: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.fd, libc::FIONREAD as _, &mut count) };
        if rc != 0 {
            return Err(SocketError::IoctlFailed(io::Error::last_os_error()));
        }
        Ok(count.max(0) as usize)
    }

    /// Sets a raw socket option.
    pub fn set_option(&self, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<(), SocketError> {
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                level,
                name,
                &value as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(SocketError::InvalidOption(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Polls one readiness condition, waiting at most `timeout`.
    ///
    /// A failed non-blocking connect reports [`Interest::Error`], never
    /// [`Interest::Write`].
    pub fn poll(&self, interest: Interest, timeout: TimeSpan) -> bool {
        let events = match interest {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
            // POLLERR and POLLHUP are always reported; no request bits needed.
            Interest::Error => 0,
        };
        let mut fds = libc::pollfd {
            fd: self.fd,
            events,
            revents: 0,
        };
        let millis = timeout.total_milliseconds().max(0.0) as libc::c_int;
        if unsafe { libc::poll(&mut fds, 1, millis) } <= 0 {
            return false;
        }
        match interest {
            Interest::Read => fds.revents & (libc::POLLIN | libc::POLLHUP) != 0,
            Interest::Write => {
                fds.revents & libc::POLLOUT != 0
                    && fds.revents & (libc::POLLERR | libc::POLLHUP) == 0
            }
            Interest::Error => fds.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
        }
    }

    /// Reads up to `count` bytes. An empty result on a socket that polled
    /// readable means the peer closed the connection.
    pub fn recv(&self, count: usize) -> BytesMut {
        let mut buf = vec![0u8; count];
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, count) };
        if n <= 0 {
            return BytesMut::new();
        }
        BytesMut::from(&buf[..n as usize])
    }

    /// Writes as much of `data` as the socket accepts, returning the count.
    /// Would-block counts as zero bytes written, not as an error.
    pub fn send(&self, data: &[u8]) -> Result<usize, SocketError> {
        let n = unsafe { libc::write(self.fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) | Some(libc::EINPROGRESS) => Ok(0),
                _ => Err(SocketError::SendFailed(err)),
            };
        }
        Ok(n as usize)
    }

    /// Receives one datagram of up to `count` bytes with its source.
    pub fn recv_from(&self, count: usize) -> Option<(BytesMut, Endpoint)> {
        let mut buf = vec![0u8; count];
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let n = unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                count,
                0,
                &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut len,
            )
        };
        if n < 0 {
            return None;
        }
        Some((BytesMut::from(&buf[..n as usize]), endpoint_of(&addr)))
    }

    /// Sends one datagram to `endpoint`, returning the byte count.
    /// Would-block counts as zero bytes, not as an error.
    pub fn send_to(&self, endpoint: &Endpoint, data: &[u8]) -> Result<usize, SocketError> {
        let addr = resolve(endpoint)?;
        let n = unsafe {
            libc::sendto(
                self.fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                0,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => Ok(0),
                _ => Err(SocketError::SendFailed(err)),
            };
        }
        Ok(n as usize)
    }

    /// The locally bound address, useful after binding port 0.
    pub fn local_endpoint(&self) -> Result<Endpoint, SocketError> {
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockname(
                self.fd,
                &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(SocketError::InvalidHandle(io::Error::last_os_error()));
        }
        Ok(endpoint_of(&addr))
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Raw reads for the TLS record pump; would-block surfaces as
/// `io::ErrorKind::WouldBlock` so the pump can suspend.
impl io::Read for &Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

/// Raw writes for the TLS record pump.
impl io::Write for &Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn sockaddr_v4(ip: Ipv4Addr, port: u16) -> libc::sockaddr_in {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr = libc::in_addr {
        // octets are already in network order
        s_addr: u32::from_ne_bytes(ip.octets()),
    };
    addr
}

fn endpoint_of(addr: &libc::sockaddr_in) -> Endpoint {
    let ip = Ipv4Addr::from(addr.sin_addr.s_addr.to_ne_bytes());
    Endpoint::new(ip.to_string(), u16::from_be(addr.sin_port))
}

fn resolve(endpoint: &Endpoint) -> Result<libc::sockaddr_in, SocketError> {
    let addrs = (endpoint.host(), endpoint.port())
        .to_socket_addrs()
        .map_err(|_| SocketError::HostNotFound(endpoint.host().to_string()))?;

    for addr in addrs {
        if let SocketAddr::V4(v4) = addr {
            return Ok(sockaddr_v4(*v4.ip(), v4.port()));
        }
    }
    Err(SocketError::HostNotFound(endpoint.host().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_display_as_host_port() {
        assert_eq!(Endpoint::new("localhost", 8080).to_string(), "localhost:8080");
    }

    #[test]
    fn unknown_hosts_fail_resolution() {
        let endpoint = Endpoint::new("no-such-host.invalid", 80);
        assert!(matches!(
            resolve(&endpoint),
            Err(SocketError::HostNotFound(_))
        ));
    }

    #[test]
    fn loopback_round_trips_through_sockaddr() {
        let addr = sockaddr_v4(Ipv4Addr::LOCALHOST, 9999);
        let endpoint = endpoint_of(&addr);
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 9999);
    }

    #[test]
    fn bound_sockets_report_their_local_endpoint() {
        let socket = Socket::stream().unwrap();
        socket.bind(0).unwrap();
        let endpoint = socket.local_endpoint().unwrap();
        assert_ne!(endpoint.port(), 0);
    }

    #[test]
    fn udp_datagrams_round_trip_on_loopback() {
        let receiver = Socket::datagram().unwrap();
        receiver.bind(0).unwrap();
        let port = receiver.local_endpoint().unwrap().port();

        let sender = Socket::datagram().unwrap();
        let target = Endpoint::new("127.0.0.1", port);
        assert_eq!(sender.send_to(&target, b"ping").unwrap(), 4);

        assert!(receiver.poll(Interest::Read, TimeSpan::from_seconds(1.0)));
        let (data, _from) = receiver.recv_from(64).unwrap();
        assert_eq!(&data[..], b"ping");
    }
}
