//! WebSocket frame parsing and serialization
//!
//! Decoding works in place over a connection's receive ring: the header is
//! read through the ring's cursors, a masked payload is unmasked where it
//! lies, and the result is an offset/length view. Nothing is consumed here;
//! the caller copies the payload out and then advances the ring.
//!
//! Encoding always produces a single unmasked text frame with the shortest
//! length encoding.

use bytes::{BufMut, BytesMut};

use crate::mask::apply_mask_split;
use crate::ring::RingBuffer;
use crate::{MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// First byte of an unfragmented close frame with no extension bits.
pub const CLOSE_FRAME_BYTE: u8 = 0x88;

/// Largest header a server frame can have (2 + 8, never masked).
pub const MAX_SERVER_HEADER_SIZE: usize = 10;

/// FIN bit of the first header byte
const FIN: u8 = 0x80;

/// Text opcode; the only one the server sends
const OPCODE_TEXT: u8 = 0x1;

/// A parsed WebSocket frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// RSV1..RSV3 as the low three bits
    pub rsv: u8,
    /// Payload length after resolving the 16/64-bit extensions
    pub payload_len: u64,
    /// Masking key (if the mask bit is set)
    pub mask: Option<[u8; 4]>,
    /// Bytes occupied by the header, mask key included
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a header from the start of `buf`.
    ///
    /// Returns `Err(needed)` with the number of header bytes required when
    /// `buf` is too short.
    pub fn parse(buf: &[u8]) -> Result<Self, usize> {
        if buf.len() < 2 {
            return Err(2);
        }
        let b1 = buf[1];

        let masked = b1 & 0x80 != 0;
        let len_byte = b1 & 0x7F;
        let ext = match len_byte {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + ext + if masked { 4 } else { 0 };
        if buf.len() < header_len {
            return Err(header_len);
        }

        let payload_len = match len_byte {
            126 => u16::from_be_bytes([buf[2], buf[3]]) as u64,
            127 => u64::from_be_bytes([
                buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
            ]),
            n => n as u64,
        };

        let mask = masked.then(|| {
            let at = 2 + ext;
            [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
        });

        Ok(Self {
            rsv: (buf[0] >> 4) & 0x07,
            payload_len,
            mask,
            header_len,
        })
    }

    /// Header plus payload, saturating if the declared length is absurd
    #[inline]
    pub fn frame_len(&self) -> usize {
        usize::try_from(self.payload_len)
            .ok()
            .and_then(|len| len.checked_add(self.header_len))
            .unwrap_or(usize::MAX)
    }
}

/// Why a frame was discarded without being delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Close frame (`0x88`); the close handshake is not supported
    Close,
    /// One of RSV1..RSV3 set without a negotiated extension
    ReservedBits,
}

/// Outcome of one decode attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame; its payload starts `offset` bytes past the get cursor
    Message {
        /// Distance from the get cursor to the first payload byte
        offset: usize,
        /// Payload length
        len: usize,
    },
    /// More bytes are needed; `needed` is the total the frame requires so far
    Incomplete {
        /// Bytes that must be buffered before the next attempt can progress
        needed: usize,
    },
    /// A complete but non-conformant frame, `consumed` bytes long
    Dropped {
        /// Reason for the drop
        violation: Violation,
        /// Frame length to skip
        consumed: usize,
    },
}

impl Decoded {
    /// Bytes the caller advances the ring by once it is done with the frame
    #[inline]
    pub fn consumed(&self) -> usize {
        match *self {
            Decoded::Message { offset, len } => offset + len,
            Decoded::Incomplete { .. } => 0,
            Decoded::Dropped { consumed, .. } => consumed,
        }
    }
}

/// Try to decode the frame at the ring's get cursor.
///
/// A masked payload is unmasked in place and the key in the ring is zeroed,
/// so decoding the same frame again yields the same payload without XORing
/// twice.
pub fn try_read(ring: &mut RingBuffer) -> Decoded {
    let available = ring.get_space();
    let mut head = [0u8; 14];
    let peeked = available.min(head.len());
    ring.copy_out(0, &mut head[..peeked]);

    let header = match FrameHeader::parse(&head[..peeked]) {
        Ok(header) => header,
        Err(needed) => return Decoded::Incomplete { needed },
    };

    let total = header.frame_len();
    if available < total {
        return Decoded::Incomplete { needed: total };
    }

    if head[0] == CLOSE_FRAME_BYTE {
        return Decoded::Dropped {
            violation: Violation::Close,
            consumed: total,
        };
    }
    if header.rsv != 0 {
        return Decoded::Dropped {
            violation: Violation::ReservedBits,
            consumed: total,
        };
    }

    let len = total - header.header_len;
    if let Some(mask) = header.mask.filter(|m| *m != [0; 4]) {
        let (first, second) = ring.region_mut(header.header_len, len);
        apply_mask_split(first, second, mask);
        ring.zero(header.header_len - 4, 4);
    }

    Decoded::Message {
        offset: header.header_len,
        len,
    }
}

/// Header size for a server frame carrying `payload_len` bytes
#[inline]
pub fn header_size(payload_len: usize) -> usize {
    2 + if payload_len > MEDIUM_MESSAGE_THRESHOLD {
        8
    } else if payload_len > SMALL_MESSAGE_THRESHOLD {
        2
    } else {
        0
    }
}

/// Encode the header of a final, unmasked text frame.
///
/// Returns the header bytes and how many of them are used.
#[inline]
pub fn encode_header(payload_len: usize) -> ([u8; MAX_SERVER_HEADER_SIZE], usize) {
    let mut out = [0u8; MAX_SERVER_HEADER_SIZE];
    out[0] = FIN | OPCODE_TEXT;

    if payload_len <= SMALL_MESSAGE_THRESHOLD {
        out[1] = payload_len as u8;
        (out, 2)
    } else if payload_len <= MEDIUM_MESSAGE_THRESHOLD {
        out[1] = 126;
        out[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
        (out, 4)
    } else {
        out[1] = 127;
        out[2..10].copy_from_slice(&(payload_len as u64).to_be_bytes());
        (out, 10)
    }
}

/// Write a text frame for `payload` into `dst`.
///
/// Returns the number of bytes written, or `None` if `dst` is too small.
pub fn write(dst: &mut [u8], payload: &[u8]) -> Option<usize> {
    let (header, n) = encode_header(payload.len());
    let total = n + payload.len();
    if dst.len() < total {
        return None;
    }
    dst[..n].copy_from_slice(&header[..n]);
    dst[n..total].copy_from_slice(payload);
    Some(total)
}

/// Append a text frame for `payload` to `buf`
#[inline]
pub fn encode_frame(buf: &mut BytesMut, payload: &[u8]) {
    let (header, n) = encode_header(payload.len());
    buf.reserve(n + payload.len());
    buf.put_slice(&header[..n]);
    buf.put_slice(payload);
}

/// Append a text frame for `payload` to the ring, or nothing if it does not fit.
pub fn push_frame(ring: &mut RingBuffer, payload: &[u8]) -> bool {
    let (header, n) = encode_header(payload.len());
    if ring.put_space() < n + payload.len() {
        return false;
    }
    ring.push(&header[..n]) && ring.push(payload)
}
