//! `multipart/x-mixed-replace` framing
//!
//! Byte layout of one part, as written by the stream writer:
//!
//! ```text
//! CRLF "--" boundary CRLF
//! "Content-Type: " mime CRLF
//! "Content-Length: " len CRLF
//! CRLF
//! payload
//! ```
//!
//! After the last part of a finished stream the close delimiter
//! `CRLF "--" boundary "--" CRLF` is written once. A part is never followed by a
//! trailing boundary of its own.

mod parser;

pub use parser::{boundary_from_content_type, parse, Multipart, ParseError, Part};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const CRLF: &[u8] = b"\r\n";

/// Longest boundary permitted by RFC 2046
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Boundary used when none is configured
pub const DEFAULT_BOUNDARY: &str = "abcd4321";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("boundary is empty")]
    Empty,

    #[error("boundary is {0} characters long, at most 70 are allowed")]
    TooLong(usize),

    #[error("boundary contains invalid character {0:?}")]
    InvalidChar(char),

    #[error("boundary must not end with a space")]
    TrailingSpace,
}

/// Checks a boundary token against the RFC 2046 `bchars` grammar.
pub fn validate_boundary(boundary: &str) -> Result<(), BoundaryError> {
    if boundary.is_empty() {
        return Err(BoundaryError::Empty);
    }

    let len = boundary.chars().count();
    if len > MAX_BOUNDARY_LEN {
        return Err(BoundaryError::TooLong(len));
    }

    if let Some(c) = boundary.chars().find(|c| !is_bchar(*c)) {
        return Err(BoundaryError::InvalidChar(c));
    }

    if boundary.ends_with(' ') {
        return Err(BoundaryError::TrailingSpace);
    }

    Ok(())
}

fn is_bchar(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '\'' | '(' | ')' | '+' | '_' | ',' | '-' | '.' | '/' | ':' | '=' | '?' | ' '
        )
}

/// Value of the response `Content-Type` header for a stream.
///
/// Boundaries that are not an RFC 2045 token (space, `:`, `/`, `=` and so on)
/// are written as a quoted string. `bchars` never contain `"` or `\`, so no
/// escaping is needed.
pub fn content_type(boundary: &str) -> String {
    if boundary.chars().all(is_token_char) {
        format!("multipart/x-mixed-replace; boundary={}", boundary)
    } else {
        format!("multipart/x-mixed-replace; boundary=\"{}\"", boundary)
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic()
        && !matches!(
            c,
            '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
        )
}

/// Size of the delimiter line and header block written before a payload
pub fn part_head_len(boundary: &str, mime_type: &str, payload_len: usize) -> usize {
    // CRLF "--" boundary CRLF
    let delimiter = 2 + 2 + boundary.len() + 2;
    // "Content-Type: " mime CRLF "Content-Length: " digits CRLF CRLF
    let headers = 14 + mime_type.len() + 2 + 16 + decimal_digits(payload_len) + 2 + 2;
    delimiter + headers
}

/// Encodes the delimiter line and header block that precede a payload.
pub fn part_head(boundary: &str, mime_type: &str, payload_len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(part_head_len(boundary, mime_type, payload_len));
    put_part_head(&mut buf, boundary, mime_type, payload_len);
    buf.freeze()
}

/// Appends the delimiter line and header block to `buf`.
pub fn put_part_head(buf: &mut BytesMut, boundary: &str, mime_type: &str, payload_len: usize) {
    buf.put_slice(CRLF);
    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(b"Content-Type: ");
    buf.put_slice(mime_type.as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(b"Content-Length: ");
    buf.put_slice(payload_len.to_string().as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(CRLF);
}

/// Encodes the close delimiter that ends a finished stream.
pub fn close_delimiter(boundary: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(boundary.len() + 8);
    buf.put_slice(CRLF);
    buf.put_slice(b"--");
    buf.put_slice(boundary.as_bytes());
    buf.put_slice(b"--");
    buf.put_slice(CRLF);
    buf.freeze()
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}
