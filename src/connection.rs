//! Connection slots and their lifecycle
//!
//! A fixed array of slots holds every connection the server can track. Each
//! slot carries three generation counters, `opening`, `open` and `closed`,
//! whose relative order encodes its state:
//!
//! | State   | Condition                                   |
//! |---------|---------------------------------------------|
//! | Free    | `opening == closed`                         |
//! | Opening | `opening` after `closed`, `open == closed`  |
//! | Open    | `open` after `closed`                       |
//!
//! Counters wrap at 32 bits, so "after" is decided by [`is_after`].
//! The externally visible [`ConnectionId`] is the slot's `opening` value.

use std::fmt;
use std::time::Instant;

use crate::ring::RingBuffer;
use crate::transport::Socket;

/// True if generation `a` is logically later than `b`.
///
/// Uses the signed difference so the comparison survives the 32-bit counter
/// wrapping around, as long as the two values are less than 2^31 apart.
#[inline]
pub fn is_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Identifier of a connection, or one of the reserved targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Never a live connection
    pub const INVALID: ConnectionId = ConnectionId(0xffff_ffff);
    /// Whichever open connection has something available first
    pub const ANY: ConnectionId = ConnectionId(0xffff_fffe);
    /// Every open connection (send only)
    pub const ALL: ConnectionId = ConnectionId(0xffff_fffd);

    /// True for an id that can name a single connection
    #[inline]
    pub fn is_exact(self) -> bool {
        self.0 < Self::ALL.0
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INVALID => f.write_str("invalid"),
            Self::ANY => f.write_str("any"),
            Self::ALL => f.write_str("all"),
            ConnectionId(id) => write!(f, "{}", id),
        }
    }
}

/// Which of the three lifecycle states a slot is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Free,
    Opening,
    Open,
}

/// Per-connection counters of frames and sends that did not go through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounters {
    /// Frames dropped for having a reserved bit set
    pub fail_rsv: u32,
    /// Close frames (`0x88`) dropped
    pub fail_close: u32,
    /// Messages skipped because the send ring was full
    pub send_blocked: u32,
}

/// One slot: buffers, socket and lifecycle counters
pub struct Connection<S> {
    pub(crate) send: RingBuffer,
    pub(crate) recv: RingBuffer,
    pub(crate) socket: Option<S>,
    opening: u32,
    open: u32,
    closed: u32,
    pub(crate) failures: FailureCounters,
    pub(crate) accepted_at: Option<Instant>,
    pub(crate) handshake_rejected: bool,
}

impl<S> Connection<S> {
    fn new(buffer_capacity: usize) -> Self {
        Self {
            send: RingBuffer::unallocated(buffer_capacity),
            recv: RingBuffer::unallocated(buffer_capacity),
            socket: None,
            opening: 0,
            open: 0,
            closed: 0,
            failures: FailureCounters::default(),
            accepted_at: None,
            handshake_rejected: false,
        }
    }

    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        if is_after(self.open, self.closed) {
            Lifecycle::Open
        } else if is_after(self.opening, self.closed) {
            Lifecycle::Opening
        } else {
            Lifecycle::Free
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.opening == self.closed
    }

    /// Handshake pending
    #[inline]
    pub fn is_opening(&self) -> bool {
        is_after(self.opening, self.closed) && self.open == self.closed
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        is_after(self.open, self.closed)
    }

    /// Opening or open
    #[inline]
    pub fn is_live(&self) -> bool {
        is_after(self.opening, self.closed)
    }

    /// Id of the connection currently occupying the slot
    #[inline]
    pub fn id(&self) -> ConnectionId {
        ConnectionId(self.opening)
    }

    /// Bytes received but not yet delivered
    #[inline]
    pub fn unread(&self) -> usize {
        self.recv.get_space()
    }

    #[inline]
    pub fn failures(&self) -> FailureCounters {
        self.failures
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("opening", &self.opening)
            .field("open", &self.open)
            .field("closed", &self.closed)
            .field("state", &self.lifecycle())
            .field("send", &self.send)
            .field("recv", &self.recv)
            .field("failures", &self.failures)
            .finish()
    }
}

/// Fixed-size table of connection slots
pub struct SlotTable<S> {
    slots: Vec<Connection<S>>,
    last_connection: u32,
    version: u32,
}

impl<S: Socket> SlotTable<S> {
    /// Create `max_connections` free slots with lazily allocated rings
    pub fn new(max_connections: usize, buffer_capacity: usize) -> Self {
        Self {
            slots: (0..max_connections)
                .map(|_| Connection::new(buffer_capacity))
                .collect(),
            last_connection: 1,
            version: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bumped on every state transition
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &Connection<S> {
        &self.slots[index]
    }

    #[inline]
    pub fn slot_mut(&mut self, index: usize) -> &mut Connection<S> {
        &mut self.slots[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> {
        self.slots.iter()
    }

    #[inline]
    fn index_of(&self, id: u32) -> usize {
        id as usize % self.slots.len()
    }

    /// Slot index of a live connection with this exact id
    pub fn find(&self, id: ConnectionId) -> Option<usize> {
        if !id.is_exact() || self.slots.is_empty() {
            return None;
        }
        let index = self.index_of(id.0);
        let slot = &self.slots[index];
        (slot.is_live() && slot.opening == id.0).then_some(index)
    }

    /// Find a free slot for the next connection.
    ///
    /// Scans starting at the slot of the next id. Ids that would be `0` or a
    /// reserved sentinel are skipped. Returns the id to hand to
    /// [`assign`](Self::assign), or `None` when every slot is occupied.
    pub fn find_free_slot(&self) -> Option<ConnectionId> {
        let mut id = self.last_connection;
        let mut tried = 0;
        while tried < self.slots.len() {
            if id == 0 || !ConnectionId(id).is_exact() {
                id = id.wrapping_add(1);
                continue;
            }
            let slot = &self.slots[self.index_of(id)];
            if slot.is_free() && is_after(id, slot.closed) {
                return Some(ConnectionId(id));
            }
            id = id.wrapping_add(1);
            tried += 1;
        }
        None
    }

    /// Bind `socket` to the slot chosen by [`find_free_slot`](Self::find_free_slot).
    ///
    /// Returns the slot index.
    pub fn assign(&mut self, id: ConnectionId, socket: S) -> usize {
        let index = self.index_of(id.0);
        let slot = &mut self.slots[index];
        debug_assert!(slot.is_free(), "assign into occupied slot");

        slot.send.reset();
        slot.recv.reset();
        slot.socket = Some(socket);
        slot.failures = FailureCounters::default();
        slot.accepted_at = Some(Instant::now());
        slot.handshake_rejected = false;
        slot.opening = id.0;

        self.last_connection = id.0.wrapping_add(1);
        self.version = self.version.wrapping_add(1);
        index
    }

    /// Opening -> Open after a successful handshake
    pub fn mark_open(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        debug_assert!(slot.is_opening(), "mark_open on slot not opening");
        slot.open = slot.opening;
        slot.accepted_at = None;
        self.version = self.version.wrapping_add(1);
    }

    /// Shut down and drop the socket and free the slot for reuse
    pub fn close(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if let Some(mut socket) = slot.socket.take() {
            socket.close();
        }
        slot.open = slot.opening;
        slot.closed = slot.opening;
        slot.accepted_at = None;
        self.version = self.version.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockSocket;

    fn table(n: usize) -> SlotTable<MockSocket> {
        SlotTable::new(n, 64)
    }

    #[test]
    fn test_is_after_wraps() {
        assert!(is_after(1, 0));
        assert!(!is_after(0, 1));
        assert!(!is_after(5, 5));
        assert!(is_after(3, u32::MAX - 2));
        assert!(!is_after(u32::MAX - 2, 3));
    }

    #[test]
    fn test_sentinels() {
        assert!(!ConnectionId::INVALID.is_exact());
        assert!(!ConnectionId::ANY.is_exact());
        assert!(!ConnectionId::ALL.is_exact());
        assert!(ConnectionId(0xffff_fffc).is_exact());
        assert_eq!(ConnectionId::ALL.to_string(), "all");
        assert_eq!(ConnectionId(42).to_string(), "42");
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut t = table(4);
        assert!(t.iter().all(|c| c.lifecycle() == Lifecycle::Free));
        assert!(t.iter().all(|c| !c.send.is_allocated()));

        let v0 = t.version();
        let id = t.find_free_slot().unwrap();
        assert_eq!(id, ConnectionId(1));
        let i = t.assign(id, MockSocket::default());
        assert_eq!(t.slot(i).lifecycle(), Lifecycle::Opening);
        assert!(t.slot(i).send.is_allocated());
        assert!(is_after(t.version(), v0));

        let v1 = t.version();
        t.mark_open(i);
        assert_eq!(t.slot(i).lifecycle(), Lifecycle::Open);
        assert!(t.slot(i).is_live());
        assert!(is_after(t.version(), v1));

        let v2 = t.version();
        t.close(i);
        assert_eq!(t.slot(i).lifecycle(), Lifecycle::Free);
        assert!(t.slot(i).socket.is_none());
        assert!(is_after(t.version(), v2));
        assert_eq!(t.find(id), None);
    }

    #[test]
    fn test_close_while_opening() {
        let mut t = table(2);
        let id = t.find_free_slot().unwrap();
        let i = t.assign(id, MockSocket::default());
        t.close(i);
        assert!(t.slot(i).is_free());
        assert!(!t.slot(i).is_open());
    }

    #[test]
    fn test_exactly_one_state_under_churn() {
        let mut t = table(3);
        let mut live = Vec::new();
        for step in 0..200u32 {
            match step % 5 {
                0 | 1 => {
                    if let Some(id) = t.find_free_slot() {
                        live.push(t.assign(id, MockSocket::default()));
                    }
                }
                2 => {
                    if let Some(&i) = live.first() {
                        if t.slot(i).is_opening() {
                            t.mark_open(i);
                        }
                    }
                }
                _ => {
                    if let Some(i) = live.pop() {
                        t.close(i);
                    }
                }
            }
            for c in t.iter() {
                let states = [c.is_free(), c.is_opening(), c.is_open()];
                assert_eq!(states.iter().filter(|s| **s).count(), 1, "{:?}", c);
            }
        }
    }

    #[test]
    fn test_full_table_refuses() {
        let mut t = table(2);
        for _ in 0..2 {
            let id = t.find_free_slot().unwrap();
            t.assign(id, MockSocket::default());
        }
        assert_eq!(t.find_free_slot(), None);
    }

    #[test]
    fn test_ids_skip_zero_and_sentinels() {
        let mut t = table(4);
        for slot in &mut t.slots {
            slot.opening = 0xffff_fff0;
            slot.open = 0xffff_fff0;
            slot.closed = 0xffff_fff0;
        }
        t.last_connection = 0xffff_fffc;
        let id = t.find_free_slot().unwrap();
        assert_eq!(id, ConnectionId(0xffff_fffc));
        t.assign(id, MockSocket::default());

        let next = t.find_free_slot().unwrap();
        assert_eq!(next, ConnectionId(1));
    }

    #[test]
    fn test_find_exact() {
        let mut t = table(4);
        let id = t.find_free_slot().unwrap();
        let i = t.assign(id, MockSocket::default());
        assert_eq!(t.find(id), Some(i));
        assert_eq!(t.find(ConnectionId(id.0 + 4)), None);
        assert_eq!(t.find(ConnectionId::ANY), None);
    }
}
