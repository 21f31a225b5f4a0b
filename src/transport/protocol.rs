//! # Request Framing
//!
//! The collection service speaks a minimal request dialect, not full HTTP:
//!
//! ```text
//! GET <path>\r\n\r\n
//! POST <path> <version>\r\nContent-Length: <n>\r\n\r\n<body>
//! ```
//!
//! Responses are raw bytes. A response is known to be complete when the peer
//! closes, or when it carries a header block with a `Content-Length` and
//! that many body bytes have arrived.

use bytes::{BufMut, BytesMut};

/// Version token sent on push requests
pub const DEFAULT_PROTOCOL_VERSION: &str = "HTTP/1.0";

/// End of a header block
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Encode a read request
///
/// # Examples
///
/// ```
/// use nmea_courier::transport::protocol::encode_fetch_request;
///
/// assert_eq!(encode_fetch_request("/api/ping"), b"GET /api/ping\r\n\r\n");
/// ```
pub fn encode_fetch_request(path: &str) -> Vec<u8> {
    format!("GET {}\r\n\r\n", path).into_bytes()
}

/// Encode a write request carrying `body`
///
/// # Arguments
///
/// * `path` - Endpoint path
/// * `version` - Version token placed after the path
/// * `body` - Raw request body, its length becomes the `Content-Length`
pub fn encode_push_request(path: &str, version: &str, body: &[u8]) -> BytesMut {
    let header = format!(
        "POST {} {}\r\nContent-Length: {}\r\n\r\n",
        path,
        version,
        body.len()
    );

    let mut frame = BytesMut::with_capacity(header.len() + body.len());
    frame.put_slice(header.as_bytes());
    frame.put_slice(body);
    frame
}

/// Check whether a response declares its length and has fully arrived
///
/// Returns `false` for responses without a header block or without a
/// `Content-Length`; those are complete only once the peer closes.
pub fn response_is_complete(response: &[u8]) -> bool {
    let header_end = match find_subslice(response, HEADER_TERMINATOR) {
        Some(pos) => pos,
        None => return false,
    };

    let header = String::from_utf8_lossy(&response[..header_end]);
    let declared = header.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    });

    match declared {
        Some(length) => response.len() >= header_end + HEADER_TERMINATOR.len() + length,
        None => false,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
