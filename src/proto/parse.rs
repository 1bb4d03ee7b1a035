//! Incremental HTTP/1.1 message parsing.
//!
//! Wrappers around `httparse` that re-scan the (bounded) staging buffer
//! until a full header block is present, then lift out just the pieces the
//! hub cares about. Bodies never appear on the wire the hub reads: clients
//! send bare `GET`s and peers answer `HEAD`s.

use std::str;
use std::time::SystemTime;

use httparse::Status;

/// Maximum number of headers accepted in one message.
pub(crate) const MAX_HEADERS: usize = 30;

/// A parsed incoming request.
#[derive(Debug)]
pub(crate) struct Request {
    /// The request target, verbatim (including any query string).
    pub(crate) path: String,
    /// `If-Modified-Since`, when present and well formed.
    pub(crate) if_modified_since: Option<SystemTime>,
}

/// A parsed probe response.
#[derive(Debug, Clone)]
pub(crate) struct Response {
    pub(crate) status: u16,
    /// `Last-Modified`, when present and well formed.
    pub(crate) last_modified: Option<SystemTime>,
    /// `Content-Length`, when present and well formed.
    pub(crate) content_length: Option<u64>,
}

/// Tries to parse one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied, or `None` when
/// the buffer does not yet hold a complete header block.
pub(crate) fn request(buf: &[u8]) -> Result<Option<(Request, usize)>, httparse::Error> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf)? {
        Status::Complete(len) => {
            let path = req.path.unwrap_or("/").to_owned();
            let if_modified_since = header_date(req.headers, "if-modified-since");
            Ok(Some((
                Request {
                    path,
                    if_modified_since,
                },
                len,
            )))
        }
        Status::Partial => Ok(None),
    }
}

/// Tries to parse one response from the front of `buf`.
///
/// `HEAD` responses carry no body, so a complete header block is a complete
/// message and the returned length covers all of it.
pub(crate) fn response(buf: &[u8]) -> Result<Option<(Response, usize)>, httparse::Error> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    match resp.parse(buf)? {
        Status::Complete(len) => {
            let status = resp.code.unwrap_or(0);
            let last_modified = header_date(resp.headers, "last-modified");
            let content_length = header_number(resp.headers, "content-length");
            Ok(Some((
                Response {
                    status,
                    last_modified,
                    content_length,
                },
                len,
            )))
        }
        Status::Partial => Ok(None),
    }
}

fn header_value<'a>(headers: &[httparse::Header<'a>], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .and_then(|header| str::from_utf8(header.value).ok())
}

fn header_date(headers: &[httparse::Header<'_>], name: &str) -> Option<SystemTime> {
    let value = header_value(headers, name)?;
    match httpdate::parse_http_date(value.trim()) {
        Ok(date) => Some(date),
        Err(_) => {
            debug!(header = name, value, "incorrect date header format");
            None
        }
    }
}

fn header_number(headers: &[httparse::Header<'_>], name: &str) -> Option<u64> {
    header_value(headers, name)?.trim().parse().ok()
}
