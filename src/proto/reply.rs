//! Response serialization.
//!
//! Every reply the hub sends is a header-only HTTP/1.1 message with an
//! explicit `Content-Length`, rendered up front into one `Bytes` so the
//! pipelined writer can put it on the wire in a single call.

use bytes::Bytes;
use http::StatusCode;

/// An empty response with the status code's canonical reason phrase.
pub(crate) fn empty(status: StatusCode) -> Bytes {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    Bytes::from(format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\n\r\n",
        status.as_u16(),
        reason
    ))
}

/// A `400` whose reason phrase names what was wrong with the request.
pub(crate) fn bad_request(reason: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 400 {}\r\nContent-Length: 0\r\n\r\n",
        reason
    ))
}

/// A `307` pointing the client at `location`.
pub(crate) fn redirect(location: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 307 Temporary Redirect\r\nLocation: {}\r\nContent-Length: 0\r\n\r\n",
        location
    ))
}

/// A `200` carrying an HTML body.
pub(crate) fn html(body: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: text/html\r\n\r\n{}",
        body.len(),
        body
    ))
}
