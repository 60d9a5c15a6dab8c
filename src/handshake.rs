//! WebSocket handshake implementation
//!
//! The server answers the HTTP upgrade request sitting at the front of a
//! connection's receive ring. The request is recognised by a plain byte
//! search: the first `\r\n\r\n` ends it and the first `Sec-WebSocket-Key: `
//! line (case-sensitive) provides the key. Nothing else in the request is
//! inspected.

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::WS_GUID;

/// End of the HTTP request head
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header carrying the client's nonce
const KEY_HEADER: &[u8] = b"Sec-WebSocket-Key: ";

/// Length of the response built by [`build_response`] (the accept value is
/// always 28 characters)
pub const RESPONSE_LEN: usize = 129;

/// Result of inspecting the buffered request bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// No `\r\n\r\n` yet: wait for more bytes
    Incomplete,
    /// Request complete but it carries no `Sec-WebSocket-Key`; nothing is
    /// consumed and no response is produced
    Rejected,
    /// Send `response` raw and consume `consumed` request bytes
    Accepted {
        /// Length of the request including the terminator
        consumed: usize,
        /// The `101 Switching Protocols` reply
        response: Bytes,
    },
}

/// Position just past the first `\r\n\r\n`, if any
#[inline]
pub fn find_request_end(buf: &[u8]) -> Option<usize> {
    find(buf, HEADER_TERMINATOR).map(|at| at + HEADER_TERMINATOR.len())
}

/// Value of the first `Sec-WebSocket-Key: ` header in `request`
pub fn extract_key(request: &[u8]) -> Option<&[u8]> {
    let start = find(request, KEY_HEADER)? + KEY_HEADER.len();
    let rest = &request[start..];
    let end = rest
        .iter()
        .position(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Inspect the buffered bytes of a connection that is still opening
pub fn process(buf: &[u8]) -> Handshake {
    let Some(end) = find_request_end(buf) else {
        return Handshake::Incomplete;
    };
    let request = &buf[..end];
    match extract_key(request) {
        Some(key) => Handshake::Accepted {
            consumed: end,
            response: build_response(&generate_accept_key(key)),
        },
        None => Handshake::Rejected,
    }
}

/// Generate the Sec-WebSocket-Accept key
///
/// This computes: Base64(SHA-1(key + GUID))
#[inline]
pub fn generate_accept_key(key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Build the upgrade response
pub fn build_response(accept_key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(RESPONSE_LEN);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.freeze()
}

#[inline]
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
