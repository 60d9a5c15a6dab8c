//! # tickws: polling WebSocket server
//!
//! An embeddable WebSocket server driven entirely by the caller's own loop.
//! Call [`Server::update`] once per tick; it accepts sockets, performs the
//! HTTP upgrade, and moves bytes between sockets and per-connection ring
//! buffers without ever blocking. Messages are pulled with
//! [`Server::get_message`] and queued with [`Server::send_message`].
//!
//! - **No runtime**: no threads, no async executor, no locks
//! - **Fixed memory**: a fixed number of slots, each with two fixed-size rings
//! - **Single-frame text messages** in both directions
//!
//! ## Example
//!
//! ```no_run
//! use tickws::{Config, ConnectionId, Server};
//!
//! let mut server = Server::new(Config::default())?;
//! let port = server.start(1338)?;
//! println!("listening on {port}");
//!
//! let mut buf = vec![0u8; 8 * 1024];
//! loop {
//!     let status = server.update()?;
//!     while let Some(msg) = server.get_message(ConnectionId::ANY, &mut buf)? {
//!         // echo to everyone
//!         let _ = server.send_message(ConnectionId::ALL, &buf[..msg.len]);
//!     }
//!     # if status.version > 100 { break; }
//! }
//! # Ok::<(), tickws::Error>(())
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod ring;
pub mod server;
pub mod transport;

pub use connection::{ConnectionId, FailureCounters, Lifecycle};
pub use error::{Error, Result};
pub use frame::{Decoded, Violation};
pub use ring::RingBuffer;
pub use server::{ConnectionInfo, ConnectionState, Received, Server, UpdateStatus};
pub use transport::{Listener, Socket, TcpAcceptor};

/// Maximum WebSocket frame header size (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Small message threshold (<= 125 bytes uses the 7-bit length)
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Medium message threshold (<= 64KB uses the 16-bit length)
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default ring capacity per connection and direction (64KB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 << 10;

/// Default largest payload accepted by `send_message` (8KB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 << 10;

/// Default number of connection slots
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Default number of sockets accepted per `update`
pub const DEFAULT_MAX_ACCEPTS_PER_UPDATE: usize = 2;

/// Default number of successive ports tried by `start`
pub const DEFAULT_PORT_ATTEMPTS: u16 = 20;

/// Configuration for the server
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tickws::Config;
///
/// let config = Config::builder()
///     .max_connections(4)
///     .buffer_capacity(16 * 1024)
///     .max_message_size(4 * 1024)
///     .handshake_timeout(Some(Duration::from_secs(5)))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of each send and receive ring (default: 64KB)
    pub buffer_capacity: usize,
    /// Number of connection slots (default: 16)
    pub max_connections: usize,
    /// Sockets accepted per `update` at most (default: 2)
    pub max_accepts_per_update: usize,
    /// Largest payload `send_message` accepts (default: 8KB)
    pub max_message_size: usize,
    /// Successive ports tried when binding (default: 20)
    pub port_attempts: u16,
    /// Listen backlog (default: 8)
    pub listen_backlog: i32,
    /// Address to bind (default: 0.0.0.0)
    pub bind_address: IpAddr,
    /// Close connections that have not completed the upgrade within this
    /// time (default: 10s, `None` = never)
    pub handshake_timeout: Option<Duration>,
    /// Make one last send attempt per connection on shutdown (default: true)
    pub shutdown_flush: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_accepts_per_update: DEFAULT_MAX_ACCEPTS_PER_UPDATE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            port_attempts: DEFAULT_PORT_ATTEMPTS,
            listen_backlog: 8,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            handshake_timeout: Some(Duration::from_secs(10)),
            shutdown_flush: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Check the values can work together
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig("max_connections must be non-zero"));
        }
        if self.max_accepts_per_update == 0 {
            return Err(Error::InvalidConfig("max_accepts_per_update must be non-zero"));
        }
        if self.port_attempts == 0 {
            return Err(Error::InvalidConfig("port_attempts must be non-zero"));
        }
        if self.buffer_capacity <= handshake::RESPONSE_LEN {
            return Err(Error::InvalidConfig(
                "buffer_capacity cannot hold the handshake response",
            ));
        }
        let largest_frame = self.max_message_size.checked_add(MAX_FRAME_HEADER_SIZE);
        if largest_frame.is_none_or(|len| len >= self.buffer_capacity) {
            return Err(Error::InvalidConfig(
                "buffer_capacity cannot hold a maximum-size message",
            ));
        }
        Ok(())
    }
}

/// Builder for server configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the ring capacity per connection and direction
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.config.buffer_capacity = bytes;
        self
    }

    /// Set the number of connection slots
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set how many sockets one `update` may accept
    pub fn max_accepts_per_update(mut self, count: usize) -> Self {
        self.config.max_accepts_per_update = count;
        self
    }

    /// Set the largest payload `send_message` accepts
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    /// Set how many successive ports `start` tries
    pub fn port_attempts(mut self, attempts: u16) -> Self {
        self.config.port_attempts = attempts;
        self
    }

    /// Set the listen backlog
    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        self.config.listen_backlog = backlog;
        self
    }

    /// Set the address to bind
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.config.bind_address = address;
        self
    }

    /// Set the handshake timeout, `None` to disable
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Enable or disable the final send attempt on shutdown
    pub fn shutdown_flush(mut self, enabled: bool) -> Self {
        self.config.shutdown_flush = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::connection::ConnectionId;
    pub use crate::error::{Error, Result};
    pub use crate::server::{Received, Server, UpdateStatus};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .max_connections(2)
            .max_accepts_per_update(1)
            .port_attempts(3)
            .shutdown_flush(false)
            .handshake_timeout(None)
            .build();
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.max_accepts_per_update, 1);
        assert_eq!(config.port_attempts, 3);
        assert!(!config.shutdown_flush);
        assert!(config.handshake_timeout.is_none());
    }

    #[test]
    fn test_validate_rejects() {
        let small = Config::builder().buffer_capacity(64).build();
        assert!(matches!(small.validate(), Err(Error::InvalidConfig(_))));

        let big_message = Config::builder()
            .buffer_capacity(1024)
            .max_message_size(1024)
            .build();
        assert!(matches!(big_message.validate(), Err(Error::InvalidConfig(_))));

        let absurd = Config::builder().max_message_size(usize::MAX).build();
        assert!(matches!(absurd.validate(), Err(Error::InvalidConfig(_))));

        let no_slots = Config::builder().max_connections(0).build();
        assert!(matches!(no_slots.validate(), Err(Error::InvalidConfig(_))));
    }
}
