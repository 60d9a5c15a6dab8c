//! Fixed-capacity circular byte buffer
//!
//! Each connection owns two of these: one for bytes waiting to be sent and
//! one for bytes received but not yet decoded. The buffer is split at its
//! wrap point rather than mapped twice in virtual memory, so every operation
//! that may straddle the boundary hands out (or copies through) two slices.
//!
//! One byte of capacity is always kept free: `put == get` means empty, never
//! full.

use std::io::{IoSlice, IoSliceMut};

/// Bytes that can still be written when the cursors are at `put` and `get`.
#[inline]
pub fn put_space(put: usize, get: usize, capacity: usize) -> usize {
    if put < get {
        get - put - 1
    } else {
        capacity - put + get - 1
    }
}

/// Bytes that can be read when the cursors are at `get` and `put`.
#[inline]
pub fn get_space(get: usize, put: usize, capacity: usize) -> usize {
    if get <= put {
        put - get
    } else {
        put + capacity - get
    }
}

/// Circular byte store with put/get cursors
pub struct RingBuffer {
    data: Vec<u8>,
    capacity: usize,
    put: usize,
    get: usize,
}

impl RingBuffer {
    /// Create a ring with its storage allocated up front
    pub fn new(capacity: usize) -> Self {
        let mut ring = Self::unallocated(capacity);
        ring.reset();
        ring
    }

    /// Create a ring whose storage is allocated on the first [`reset`](Self::reset)
    pub fn unallocated(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2");
        Self {
            data: Vec::new(),
            capacity,
            put: 0,
            get: 0,
        }
    }

    /// Empty the ring, allocating its storage if this is the first use.
    ///
    /// Storage is never released; a slot reuses it across connections.
    pub fn reset(&mut self) {
        if self.data.len() != self.capacity {
            self.data = vec![0; self.capacity];
        }
        self.put = 0;
        self.get = 0;
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.data.len() == self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest number of bytes the ring can ever hold
    #[inline]
    pub fn usable(&self) -> usize {
        self.capacity - 1
    }

    #[inline]
    pub fn put_cursor(&self) -> usize {
        self.put
    }

    #[inline]
    pub fn get_cursor(&self) -> usize {
        self.get
    }

    /// Free space for writing
    #[inline]
    pub fn put_space(&self) -> usize {
        if !self.is_allocated() {
            return 0;
        }
        put_space(self.put, self.get, self.capacity)
    }

    /// Filled bytes available for reading
    #[inline]
    pub fn get_space(&self) -> usize {
        get_space(self.get, self.put, self.capacity)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.put == self.get
    }

    /// Move the put cursor after `n` bytes were written into [`writable`](Self::writable).
    ///
    /// # Panics
    /// If `n` exceeds [`put_space`](Self::put_space).
    #[inline]
    pub fn advance_put(&mut self, n: usize) {
        assert!(n <= self.put_space(), "advance_put past free space");
        self.put = (self.put + n) % self.capacity;
    }

    /// Move the get cursor after `n` bytes were consumed.
    ///
    /// # Panics
    /// If `n` exceeds [`get_space`](Self::get_space).
    #[inline]
    pub fn advance_get(&mut self, n: usize) {
        assert!(n <= self.get_space(), "advance_get past filled space");
        self.get = (self.get + n) % self.capacity;
    }

    /// Free space as two slices: up to the wrap point, then from the start.
    pub fn writable(&mut self) -> (&mut [u8], &mut [u8]) {
        let space = self.put_space();
        let first_len = space.min(self.capacity - self.put);
        let second_len = space - first_len;
        let put = self.put;
        let (head, tail) = self.data.split_at_mut(put);
        (&mut tail[..first_len], &mut head[..second_len])
    }

    /// Filled bytes as two slices: up to the wrap point, then from the start.
    pub fn readable(&self) -> (&[u8], &[u8]) {
        let space = self.get_space();
        let first_len = space.min(self.capacity - self.get);
        let second_len = space - first_len;
        (
            &self.data[self.get..self.get + first_len],
            &self.data[..second_len],
        )
    }

    /// Mutable view of the filled bytes, split like [`readable`](Self::readable).
    pub fn readable_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let space = self.get_space();
        let first_len = space.min(self.capacity - self.get);
        let second_len = space - first_len;
        let get = self.get;
        let (head, tail) = self.data.split_at_mut(get);
        (&mut tail[..first_len], &mut head[..second_len])
    }

    /// Free space for a vectored read from a socket
    pub fn writable_io(&mut self) -> [IoSliceMut<'_>; 2] {
        let (a, b) = self.writable();
        [IoSliceMut::new(a), IoSliceMut::new(b)]
    }

    /// Filled bytes for a vectored write to a socket
    pub fn readable_io(&self) -> [IoSlice<'_>; 2] {
        let (a, b) = self.readable();
        [IoSlice::new(a), IoSlice::new(b)]
    }

    /// Copy all of `src` into the ring, or nothing if it does not fit.
    pub fn push(&mut self, src: &[u8]) -> bool {
        if src.len() > self.put_space() {
            return false;
        }
        let (a, b) = self.writable();
        let top = src.len().min(a.len());
        a[..top].copy_from_slice(&src[..top]);
        b[..src.len() - top].copy_from_slice(&src[top..]);
        self.advance_put(src.len());
        true
    }

    /// Byte at `offset` past the get cursor
    #[cfg(test)]
    pub(crate) fn peek(&self, offset: usize) -> Option<u8> {
        if offset < self.get_space() {
            Some(self.data[(self.get + offset) % self.capacity])
        } else {
            None
        }
    }

    /// Copy `dst.len()` bytes starting `offset` past the get cursor.
    ///
    /// Returns false, copying nothing, when fewer bytes are buffered.
    pub fn copy_out(&self, offset: usize, dst: &mut [u8]) -> bool {
        if offset + dst.len() > self.get_space() {
            return false;
        }
        let start = (self.get + offset) % self.capacity;
        let top = dst.len().min(self.capacity - start);
        dst[..top].copy_from_slice(&self.data[start..start + top]);
        let rest = dst.len() - top;
        dst[top..].copy_from_slice(&self.data[..rest]);
        true
    }

    /// Mutable view of `len` buffered bytes starting `offset` past the get
    /// cursor, split at the wrap point.
    ///
    /// # Panics
    /// If the region extends past the filled bytes.
    pub fn region_mut(&mut self, offset: usize, len: usize) -> (&mut [u8], &mut [u8]) {
        assert!(offset + len <= self.get_space(), "region past filled space");
        let (a, b) = self.readable_mut();
        if offset >= a.len() {
            let start = offset - a.len();
            return (&mut b[start..start + len], Default::default());
        }
        let first_len = len.min(a.len() - offset);
        (&mut a[offset..offset + first_len], &mut b[..len - first_len])
    }

    /// Overwrite `len` buffered bytes starting `offset` past the get cursor with zero.
    pub fn zero(&mut self, offset: usize, len: usize) {
        assert!(offset + len <= self.get_space(), "zero past filled space");
        for i in 0..len {
            let idx = (self.get + offset + i) % self.capacity;
            self.data[idx] = 0;
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("put", &self.put)
            .field("get", &self.get)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}
