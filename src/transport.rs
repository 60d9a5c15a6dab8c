//! Socket seam between the server and the operating system
//!
//! The server only needs a handful of non-blocking primitives: accept a
//! socket, read into and write out of vectored buffers, and close. They are
//! expressed as two traits so the driver can run over plain TCP in
//! production and over in-memory doubles in tests.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};

use socket2::{Domain, Protocol, Socket as RawSocket, Type};
use tracing::debug;

use crate::error::{Error, Result};

/// A connected, non-blocking byte stream
pub trait Socket: Read + Write {
    /// Shut down the write side, drain whatever is still inbound, and release
    /// the handle. Errors are ignored: the slot is recycled either way.
    fn close(&mut self);
}

/// A non-blocking listening socket
pub trait Listener {
    type Socket: Socket;

    /// Accept one pending connection, `Ok(None)` if none is waiting
    fn accept(&mut self) -> io::Result<Option<Self::Socket>>;

    /// Port the listener is bound to
    fn local_port(&self) -> u16;
}

/// Bytes read (and discarded) per call while draining a closing socket
const DRAIN_CHUNK: usize = 128;

/// Upper bound on drain reads so closing never spins on a chatty peer
const DRAIN_ATTEMPTS: usize = 16;

impl Socket for TcpStream {
    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Write);
        let mut scratch = [0u8; DRAIN_CHUNK];
        for _ in 0..DRAIN_ATTEMPTS {
            match self.read(&mut scratch) {
                Ok(n) if n > 0 => continue,
                _ => break,
            }
        }
    }
}

/// Non-blocking TCP listener
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    port: u16,
}

impl TcpAcceptor {
    /// Bind the first free port in `port..port + attempts` on `address`.
    ///
    /// The socket is created with `SO_REUSEADDR` and put in non-blocking
    /// mode before binding.
    pub fn bind(address: IpAddr, port: u16, attempts: u16, backlog: i32) -> Result<Self> {
        let domain = match address {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        };
        let socket = RawSocket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        let mut bound = None;
        for i in 0..attempts {
            let Some(candidate) = port.checked_add(i) else {
                break;
            };
            let addr = SocketAddr::new(address, candidate);
            match socket.bind(&addr.into()) {
                Ok(()) => {
                    bound = Some(candidate);
                    break;
                }
                Err(e) => debug!(port = candidate, error = %e, "bind failed, trying next port"),
            }
        }
        if bound.is_none() {
            return Err(Error::Bind { port, attempts });
        }

        socket.listen(backlog)?;
        let listener: TcpListener = socket.into();
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }
}

impl Listener for TcpAcceptor {
    type Socket = TcpStream;

    fn accept(&mut self) -> io::Result<Option<TcpStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                let _ = stream.set_nodelay(true);
                debug!(%peer, "accepted socket");
                Ok(Some(stream))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_port(&self) -> u16 {
        self.port
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_bind_skips_taken_port() {
        let first = TcpAcceptor::bind(Ipv4Addr::LOCALHOST.into(), 0, 1, 8).unwrap();
        let taken = first.local_port();

        let second = TcpAcceptor::bind(Ipv4Addr::LOCALHOST.into(), taken, 20, 8).unwrap();
        assert_ne!(second.local_port(), taken);
        assert!(second.local_port() > taken);
    }

    #[test]
    fn test_accept_would_block_is_none() {
        let mut acceptor = TcpAcceptor::bind(Ipv4Addr::LOCALHOST.into(), 0, 1, 8).unwrap();
        assert!(acceptor.accept().unwrap().is_none());

        let _client = TcpStream::connect(("127.0.0.1", acceptor.local_port())).unwrap();
        let mut accepted = None;
        for _ in 0..100 {
            if let Some(s) = acceptor.accept().unwrap() {
                accepted = Some(s);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(accepted.is_some());
    }
}
