//! Polling WebSocket server
//!
//! [`Server`] owns the listener and the slot table. Everything happens
//! inside the caller's thread:
//!
//! - [`update`](Server::update) accepts sockets, does one receive and one
//!   send per live connection, advances pending handshakes, and reports how
//!   much unread data is waiting;
//! - [`get_message`](Server::get_message), [`send_message`](Server::send_message)
//!   and [`state`](Server::state) only touch memory.
//!
//! No call blocks. Connections that error, are reset, or stall in the
//! handshake are closed and their slots reused; callers notice through the
//! connection version changing.

use std::io::{Read, Write};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionId, FailureCounters, SlotTable};
use crate::error::{Error, Result};
use crate::frame::{self, Decoded, Violation};
use crate::handshake::{self, Handshake};
use crate::transport::{Listener, TcpAcceptor};
use crate::{Config, MAX_FRAME_HEADER_SIZE};

/// Returned by [`Server::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStatus {
    /// Connection-set version; changes whenever a connection opens or closes
    pub version: u32,
    /// Largest number of bytes buffered and not yet read on any open
    /// connection. Frame headers and partially received frames are counted,
    /// so this is an upper bound on the payload waiting.
    pub max_unread: usize,
}

/// One open connection in a [`ConnectionState`] snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    /// Bytes received but not yet read with `get_message`
    pub unread: usize,
    pub failures: FailureCounters,
}

/// Snapshot returned by [`Server::state`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub version: u32,
    pub connections: Vec<ConnectionInfo>,
}

/// A message copied out by [`Server::get_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Connection the message came from
    pub connection: ConnectionId,
    /// Payload bytes written to the output buffer
    pub len: usize,
}

/// Polling WebSocket server generic over its listening socket
pub struct Server<L: Listener = TcpAcceptor> {
    config: Config,
    listener: Option<L>,
    table: SlotTable<L::Socket>,
}

impl Server<TcpAcceptor> {
    /// Create a server over TCP. Nothing is bound until [`start`](Self::start).
    pub fn new(config: Config) -> Result<Self> {
        Self::with_config(config)
    }

    /// Bind the first free port starting at `port` and begin listening.
    ///
    /// Returns the port actually bound.
    pub fn start(&mut self, port: u16) -> Result<u16> {
        if self.listener.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let acceptor = TcpAcceptor::bind(
            self.config.bind_address,
            port,
            self.config.port_attempts,
            self.config.listen_backlog,
        )?;
        self.listen_on(acceptor)?;
        Ok(self.local_port().unwrap_or(port))
    }
}

impl<L: Listener> Server<L> {
    /// Create a server that will accept from a listener passed to
    /// [`listen_on`](Self::listen_on)
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        let table = SlotTable::new(config.max_connections, config.buffer_capacity);
        Ok(Self {
            config,
            listener: None,
            table,
        })
    }

    /// Start accepting from `listener`
    pub fn listen_on(&mut self, listener: L) -> Result<()> {
        if self.listener.is_some() {
            return Err(Error::AlreadyRunning);
        }
        info!(port = listener.local_port(), "websocket server listening");
        self.listener = Some(listener);
        Ok(())
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.listener.as_ref().map(Listener::local_port)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connection-set version
    #[inline]
    pub fn version(&self) -> u32 {
        self.table.version()
    }

    /// Run one tick of socket I/O.
    ///
    /// Transient conditions are retried on the next call and peer
    /// disconnects recycle the slot. Any other socket error closes the
    /// affected connection, finishes the tick, and is returned.
    pub fn update(&mut self) -> Result<UpdateStatus> {
        if self.listener.is_none() {
            return Err(Error::NotRunning);
        }
        let mut fatal = None;

        if let Err(e) = self.accept_pending() {
            fatal.get_or_insert(e);
        }

        for index in 0..self.table.len() {
            if !self.table.slot(index).is_live() {
                continue;
            }
            if let Err(e) = self.pump(index) {
                if let Some(e) = self.fail(index, e) {
                    fatal.get_or_insert(e);
                }
                continue;
            }

            if self.table.slot(index).is_opening() {
                if self.handshake_expired(index) {
                    warn!(connection = %self.table.slot(index).id(), "handshake timed out");
                    self.table.close(index);
                    continue;
                }
                if let Err(e) = self.try_handshake(index) {
                    if let Some(e) = self.fail(index, e) {
                        fatal.get_or_insert(e);
                    }
                }
            } else {
                self.check_frame_fits(index);
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(self.status()),
        }
    }

    fn status(&self) -> UpdateStatus {
        let max_unread = self
            .table
            .iter()
            .filter(|c| c.is_open())
            .map(|c| c.unread())
            .max()
            .unwrap_or(0);
        UpdateStatus {
            version: self.table.version(),
            max_unread,
        }
    }

    /// Accept up to the per-tick batch, never more than there are free slots
    fn accept_pending(&mut self) -> Result<()> {
        let Some(listener) = self.listener.as_mut() else {
            return Ok(());
        };
        for _ in 0..self.config.max_accepts_per_update {
            let Some(id) = self.table.find_free_slot() else {
                debug!("no free connection slot, leaving sockets in the backlog");
                break;
            };
            match listener.accept().map_err(Error::from) {
                Ok(Some(socket)) => {
                    let slot = self.table.assign(id, socket);
                    debug!(connection = %id, slot, "connection opening");
                }
                Ok(None) => break,
                Err(e) if e.is_transient() => break,
                Err(e) if e.is_disconnect() => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// One receive and one send attempt
    fn pump(&mut self, index: usize) -> Result<()> {
        self.receive(index)?;
        self.flush(index)
    }

    fn receive(&mut self, index: usize) -> Result<()> {
        let slot = self.table.slot_mut(index);
        let Some(socket) = slot.socket.as_mut() else {
            return Err(Error::ConnectionReset);
        };
        if slot.recv.put_space() == 0 {
            return Ok(());
        }
        let result = {
            let mut bufs = slot.recv.writable_io();
            socket.read_vectored(&mut bufs)
        };
        match result {
            Ok(0) => Err(Error::ConnectionReset),
            Ok(n) => {
                slot.recv.advance_put(n);
                Ok(())
            }
            Err(e) => {
                let e = Error::from(e);
                if e.is_transient() { Ok(()) } else { Err(e) }
            }
        }
    }

    fn flush(&mut self, index: usize) -> Result<()> {
        let slot = self.table.slot_mut(index);
        let Some(socket) = slot.socket.as_mut() else {
            return Err(Error::ConnectionReset);
        };
        if slot.send.is_empty() {
            return Ok(());
        }
        let result = {
            let bufs = slot.send.readable_io();
            socket.write_vectored(&bufs)
        };
        match result {
            Ok(0) => Err(Error::ConnectionReset),
            Ok(n) => {
                slot.send.advance_get(n);
                Ok(())
            }
            Err(e) => {
                let e = Error::from(e);
                if e.is_transient() { Ok(()) } else { Err(e) }
            }
        }
    }

    /// Close the slot; hand back errors that should reach the caller
    fn fail(&mut self, index: usize, e: Error) -> Option<Error> {
        let id = self.table.slot(index).id();
        self.table.close(index);
        match e {
            e if e.is_disconnect() => {
                debug!(connection = %id, "connection closed by peer");
                None
            }
            e => {
                error!(connection = %id, error = %e, "socket error, connection dropped");
                Some(e)
            }
        }
    }

    fn handshake_expired(&self, index: usize) -> bool {
        match (
            self.config.handshake_timeout,
            self.table.slot(index).accepted_at,
        ) {
            (Some(timeout), Some(at)) => Instant::now().duration_since(at) >= timeout,
            _ => false,
        }
    }

    fn try_handshake(&mut self, index: usize) -> Result<()> {
        let slot = self.table.slot_mut(index);
        let id = slot.id();
        let outcome = {
            let (first, second) = slot.recv.readable();
            if second.is_empty() {
                handshake::process(first)
            } else {
                handshake::process(&[first, second].concat())
            }
        };

        match outcome {
            Handshake::Incomplete => {
                if slot.recv.put_space() == 0 {
                    warn!(connection = %id, "upgrade request too large");
                    self.table.close(index);
                }
                Ok(())
            }
            Handshake::Rejected => {
                if !slot.handshake_rejected {
                    slot.handshake_rejected = true;
                    warn!(connection = %id, "upgrade request without Sec-WebSocket-Key");
                }
                Ok(())
            }
            Handshake::Accepted { consumed, response } => {
                if !slot.send.push(&response) {
                    return Ok(());
                }
                slot.recv.advance_get(consumed);
                self.table.mark_open(index);
                debug!(connection = %id, "connection open");
                self.flush(index)
            }
        }
    }

    /// Close a connection whose next frame can never fit its receive ring
    fn check_frame_fits(&mut self, index: usize) {
        let slot = self.table.slot_mut(index);
        if let Decoded::Incomplete { needed } = frame::try_read(&mut slot.recv) {
            if needed > slot.recv.usable() {
                warn!(connection = %slot.id(), needed, "incoming frame larger than receive buffer");
                self.table.close(index);
            }
        }
    }

    /// Snapshot of every open connection
    pub fn state(&self) -> ConnectionState {
        ConnectionState {
            version: self.table.version(),
            connections: self
                .table
                .iter()
                .filter(|c| c.is_open())
                .map(|c| ConnectionInfo {
                    id: c.id(),
                    unread: c.unread(),
                    failures: c.failures(),
                })
                .collect(),
        }
    }

    /// Copy the next message from `connection` (or [`ConnectionId::ANY`]) into `buf`.
    ///
    /// Returns `Ok(None)` when nothing complete is buffered. When `buf` is
    /// too small the message stays queued and `Error::BufferTooSmall` tells
    /// the size needed.
    pub fn get_message(
        &mut self,
        connection: ConnectionId,
        buf: &mut [u8],
    ) -> Result<Option<Received>> {
        match connection {
            ConnectionId::ANY => {
                for index in 0..self.table.len() {
                    if !self.table.slot(index).is_open() {
                        continue;
                    }
                    if let Some(received) = self.read_message(index, buf)? {
                        return Ok(Some(received));
                    }
                }
                Ok(None)
            }
            id if id.is_exact() => {
                let index = self.open_index(id)?;
                self.read_message(index, buf)
            }
            _ => Err(Error::InvalidTarget),
        }
    }

    fn open_index(&self, id: ConnectionId) -> Result<usize> {
        self.table
            .find(id)
            .filter(|&i| self.table.slot(i).is_open())
            .ok_or(Error::UnknownConnection)
    }

    fn read_message(&mut self, index: usize, buf: &mut [u8]) -> Result<Option<Received>> {
        let slot = self.table.slot_mut(index);
        loop {
            match frame::try_read(&mut slot.recv) {
                Decoded::Incomplete { .. } => return Ok(None),
                Decoded::Dropped {
                    violation,
                    consumed,
                } => {
                    match violation {
                        Violation::Close => {
                            slot.failures.fail_close = slot.failures.fail_close.saturating_add(1)
                        }
                        Violation::ReservedBits => {
                            slot.failures.fail_rsv = slot.failures.fail_rsv.saturating_add(1)
                        }
                    }
                    warn!(connection = %slot.id(), ?violation, "dropped frame");
                    slot.recv.advance_get(consumed);
                }
                Decoded::Message { offset, len } => {
                    if len > buf.len() {
                        return Err(Error::BufferTooSmall { needed: len });
                    }
                    slot.recv.copy_out(offset, &mut buf[..len]);
                    slot.recv.advance_get(offset + len);
                    return Ok(Some(Received {
                        connection: slot.id(),
                        len,
                    }));
                }
            }
        }
    }

    /// Frame `data` as a text message and queue it for `connection`,
    /// [`ConnectionId::ANY`] or [`ConnectionId::ALL`].
    ///
    /// A connection without room for the frame is skipped and its
    /// `send_blocked` counter bumped; the others still get the message and
    /// the call reports `Error::SendBlocked`.
    pub fn send_message(&mut self, connection: ConnectionId, data: &[u8]) -> Result<()> {
        if data.len() > self.config.max_message_size {
            return Err(Error::MessageTooLarge);
        }
        let needed = data.len() + MAX_FRAME_HEADER_SIZE;

        let targets = match connection {
            ConnectionId::ALL => 0..self.table.len(),
            ConnectionId::ANY => {
                let index = self.pick_any(needed)?;
                index..index + 1
            }
            id if id.is_exact() => {
                let index = self.open_index(id)?;
                index..index + 1
            }
            _ => return Err(Error::InvalidTarget),
        };

        let mut failed = 0;
        for index in targets {
            let slot = self.table.slot_mut(index);
            if !slot.is_open() {
                continue;
            }
            if slot.send.put_space() < needed || !frame::push_frame(&mut slot.send, data) {
                slot.failures.send_blocked = slot.failures.send_blocked.saturating_add(1);
                debug!(connection = %slot.id(), "send buffer full, message skipped");
                failed += 1;
            }
        }

        if failed > 0 {
            Err(Error::SendBlocked { failed })
        } else {
            Ok(())
        }
    }

    /// First open connection with room for `needed` bytes, else the first open one
    fn pick_any(&self, needed: usize) -> Result<usize> {
        let mut fallback = None;
        for (index, slot) in self.table.iter().enumerate() {
            if !slot.is_open() {
                continue;
            }
            if slot.send.put_space() >= needed {
                return Ok(index);
            }
            fallback.get_or_insert(index);
        }
        fallback.ok_or(Error::UnknownConnection)
    }

    /// Stop listening and close every connection without a close handshake.
    ///
    /// With `shutdown_flush` set, each connection gets one last send attempt
    /// first. The server can be started again afterwards.
    pub fn shutdown(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let mut closed = 0;
        for index in 0..self.table.len() {
            if !self.table.slot(index).is_live() {
                continue;
            }
            if self.config.shutdown_flush {
                let _ = self.flush(index);
            }
            self.table.close(index);
            closed += 1;
        }
        info!(port = listener.local_port(), connections = closed, "websocket server shut down");
    }
}

impl<L: Listener> Drop for Server<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<L: Listener> std::fmt::Debug for Server<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("running", &self.is_running())
            .field("port", &self.local_port())
            .field("version", &self.table.version())
            .finish()
    }
}
