//! Error types for the polling WebSocket server

use std::fmt;
use std::io;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Server error types
#[derive(Debug)]
pub enum Error {
    /// Unexpected I/O error from a socket
    Io(io::Error),
    /// Would block (non-blocking I/O)
    WouldBlock,
    /// Connection reset or aborted by the peer
    ConnectionReset,
    /// `start` called on a server that is already listening
    AlreadyRunning,
    /// Operation needs a listening server
    NotRunning,
    /// No port in the probed range could be bound
    Bind {
        /// First port tried
        port: u16,
        /// Number of ports tried
        attempts: u16,
    },
    /// Configuration rejected by validation
    InvalidConfig(&'static str),
    /// Connection id not usable for this call
    InvalidTarget,
    /// No open connection has this id
    UnknownConnection,
    /// Output buffer too small for the next message, which stays queued
    BufferTooSmall {
        /// Payload size of the queued message
        needed: usize,
    },
    /// Payload exceeds the configured maximum message size
    MessageTooLarge,
    /// Some target connections had no room in their send buffer
    SendBlocked {
        /// Number of connections that were skipped
        failed: usize,
    },
}

impl Error {
    /// Transient condition: retry on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }

    /// Peer went away; the slot is recycled, nothing to escalate
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::ConnectionReset)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WouldBlock => write!(f, "Would block"),
            Error::ConnectionReset => write!(f, "Connection reset by peer"),
            Error::AlreadyRunning => write!(f, "Server already running"),
            Error::NotRunning => write!(f, "Server not running"),
            Error::Bind { port, attempts } => write!(
                f,
                "Could not bind any port in {}..{}",
                port,
                u32::from(*port) + u32::from(*attempts)
            ),
            Error::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            Error::InvalidTarget => write!(f, "Invalid connection target"),
            Error::UnknownConnection => write!(f, "Unknown connection"),
            Error::BufferTooSmall { needed } => {
                write!(f, "Buffer too small: message needs {} bytes", needed)
            }
            Error::MessageTooLarge => write!(f, "Message too large"),
            Error::SendBlocked { failed } => {
                write!(f, "Send buffer full on {} connection(s)", failed)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Error::WouldBlock,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Error::ConnectionReset,
            _ => Error::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        let e: Error = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(e.is_transient());
        let e: Error = io::Error::from(io::ErrorKind::Interrupted).into();
        assert!(e.is_transient());
        let e: Error = io::Error::from(io::ErrorKind::ConnectionAborted).into();
        assert!(e.is_disconnect());
        let e: Error = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(e.is_disconnect());
        let e: Error = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn test_display() {
        let e = Error::Bind {
            port: 1338,
            attempts: 20,
        };
        assert_eq!(e.to_string(), "Could not bind any port in 1338..1358");
        assert_eq!(
            Error::SendBlocked { failed: 2 }.to_string(),
            "Send buffer full on 2 connection(s)"
        );
    }
}
