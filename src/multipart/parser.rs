//! Decoder for `multipart/x-mixed-replace` bodies
//!
//! Used to check what a client will see. Parts are returned in wire order.
//! `Content-Length` is honoured when present, otherwise the payload runs up
//! to the next delimiter. A body that stops right after a complete part is
//! accepted, since live streams end that way when the connection drops.

use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no boundary delimiter found")]
    MissingBoundary,

    #[error("malformed delimiter at offset {0}")]
    MalformedDelimiter(usize),

    #[error("header block starting at offset {0} is not terminated")]
    TruncatedHeaders(usize),

    #[error("invalid header line: {0:?}")]
    InvalidHeader(String),

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("part declares {expected} bytes but only {available} remain")]
    TruncatedPart { expected: usize, available: usize },
}

/// One decoded body part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Part {
    /// Looks up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Result of decoding a whole body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart {
    pub parts: Vec<Part>,
    /// A close delimiter was seen
    pub closed: bool,
}

/// Decodes `body` using `boundary`.
pub fn parse(body: &[u8], boundary: &str) -> Result<Multipart, ParseError> {
    let mut delimiter = Vec::with_capacity(boundary.len() + 2);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary.as_bytes());

    let mut result = Multipart::default();

    let Some(first) = find_delimiter(body, &delimiter, 0) else {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(result);
        }
        return Err(ParseError::MissingBoundary);
    };

    let mut pos = first + delimiter.len();

    loop {
        if body[pos..].starts_with(b"--") {
            result.closed = true;
            return Ok(result);
        }

        // Transport padding is allowed before the line break
        while pos < body.len() && (body[pos] == b' ' || body[pos] == b'\t') {
            pos += 1;
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(ParseError::MalformedDelimiter(pos));
        }
        pos += 2;

        let (headers, payload_start) = if body[pos..].starts_with(b"\r\n") {
            (Vec::new(), pos + 2)
        } else {
            let end = find(body, b"\r\n\r\n", pos).ok_or(ParseError::TruncatedHeaders(pos))?;
            (parse_headers(&body[pos..end])?, end + 4)
        };

        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .map(|(_, v)| {
                v.parse::<usize>()
                    .map_err(|_| ParseError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        match content_length {
            Some(len) => {
                let available = body.len() - payload_start;
                if len > available {
                    return Err(ParseError::TruncatedPart {
                        expected: len,
                        available,
                    });
                }
                let payload_end = payload_start + len;
                result.parts.push(Part {
                    headers,
                    body: Bytes::copy_from_slice(&body[payload_start..payload_end]),
                });

                if payload_end == body.len() {
                    return Ok(result);
                }
                let rest = &body[payload_end..];
                if !(rest.starts_with(b"\r\n") && rest[2..].starts_with(&delimiter)) {
                    return Err(ParseError::MalformedDelimiter(payload_end));
                }
                pos = payload_end + 2 + delimiter.len();
            }
            None => match find_delimiter(body, &delimiter, payload_start) {
                Some(next) => {
                    // The CRLF before the delimiter belongs to the delimiter
                    let payload_end = next.saturating_sub(2).max(payload_start);
                    result.parts.push(Part {
                        headers,
                        body: Bytes::copy_from_slice(&body[payload_start..payload_end]),
                    });
                    pos = next + delimiter.len();
                }
                None => {
                    result.parts.push(Part {
                        headers,
                        body: Bytes::copy_from_slice(&body[payload_start..]),
                    });
                    return Ok(result);
                }
            },
        }
    }
}

/// Extracts the `boundary` parameter from a multipart `Content-Type` value.
///
/// Handles both token and quoted-string forms. Returns `None` for other
/// media types or a malformed parameter list.
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    let (media_type, mut rest) = value.split_once(';')?;
    if !media_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("multipart/")
    {
        return None;
    }

    loop {
        let (name, after) = rest.trim_start().split_once('=')?;
        let after = after.trim_start();

        let (param, next) = match after.strip_prefix('"') {
            Some(quoted) => {
                let mut param = String::new();
                let mut chars = quoted.char_indices();
                let mut end = None;
                while let Some((i, c)) = chars.next() {
                    match c {
                        '\\' => param.push(chars.next()?.1),
                        '"' => {
                            end = Some(i + 1);
                            break;
                        }
                        _ => param.push(c),
                    }
                }
                (param, &quoted[end?..])
            }
            None => {
                let end = after
                    .find(|c: char| c == ';' || c.is_whitespace())
                    .unwrap_or(after.len());
                (after[..end].to_string(), &after[end..])
            }
        };

        if name.trim().eq_ignore_ascii_case("boundary") {
            return (!param.is_empty()).then_some(param);
        }
        rest = next.trim_start().strip_prefix(';')?;
    }
}

fn parse_headers(block: &[u8]) -> Result<Vec<(String, String)>, ParseError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| ParseError::InvalidHeader(String::from_utf8_lossy(block).into_owned()))?;

    text.split("\r\n")
        .map(|line| {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::InvalidHeader(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ParseError::InvalidHeader(line.to_string()));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Finds a delimiter that starts a line: at offset 0 or right after CRLF.
fn find_delimiter(body: &[u8], delimiter: &[u8], from: usize) -> Option<usize> {
    let mut start = from;
    while let Some(idx) = find(body, delimiter, start) {
        if idx == 0 || (idx >= 2 && &body[idx - 2..idx] == b"\r\n") {
            return Some(idx);
        }
        start = idx + 1;
    }
    None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::{close_delimiter, part_head};

    fn encode(boundary: &str, parts: &[(&str, &[u8])], close: bool) -> Vec<u8> {
        let mut body = Vec::new();
        for (mime, payload) in parts {
            body.extend_from_slice(&part_head(boundary, mime, payload.len()));
            body.extend_from_slice(payload);
        }
        if close {
            body.extend_from_slice(&close_delimiter(boundary));
        }
        body
    }

    #[test]
    fn test_parse_closed_stream() {
        let body = encode(
            "abcd4321",
            &[("image/jpeg", b"\xFF\xD8one\xFF\xD9"), ("image/png", b"two")],
            true,
        );
        let parsed = parse(&body, "abcd4321").unwrap();

        assert!(parsed.closed);
        assert_eq!(parsed.parts.len(), 2);
        assert_eq!(parsed.parts[0].content_type(), Some("image/jpeg"));
        assert_eq!(&parsed.parts[0].body()[..], b"\xFF\xD8one\xFF\xD9");
        assert_eq!(parsed.parts[1].content_type(), Some("image/png"));
        assert_eq!(parsed.parts[1].header("content-length"), Some("3"));
    }

    #[test]
    fn test_parse_truncated_after_part() {
        let body = encode("abcd4321", &[("image/jpeg", b"payload")], false);
        let parsed = parse(&body, "abcd4321").unwrap();

        assert!(!parsed.closed);
        assert_eq!(parsed.parts.len(), 1);
    }

    #[test]
    fn test_parse_empty_bodies() {
        let parsed = parse(b"", "abcd4321").unwrap();
        assert!(parsed.parts.is_empty());
        assert!(!parsed.closed);

        let parsed = parse(&close_delimiter("abcd4321"), "abcd4321").unwrap();
        assert!(parsed.parts.is_empty());
        assert!(parsed.closed);
    }

    #[test]
    fn test_parse_without_content_length() {
        let body = b"--b\r\nContent-Type: image/jpeg\r\n\r\nAAA\r\n--b\r\nContent-Type: image/jpeg\r\n\r\nBB\r\n--b--\r\n";
        let parsed = parse(body, "b").unwrap();

        assert!(parsed.closed);
        assert_eq!(parsed.parts.len(), 2);
        assert_eq!(&parsed.parts[0].body()[..], b"AAA");
        assert_eq!(&parsed.parts[1].body()[..], b"BB");
    }

    #[test]
    fn test_parse_rejects_short_payload() {
        let mut body = part_head("abcd4321", "image/jpeg", 10).to_vec();
        body.extend_from_slice(b"short");

        assert_eq!(
            parse(&body, "abcd4321"),
            Err(ParseError::TruncatedPart {
                expected: 10,
                available: 5
            })
        );
    }

    #[test]
    fn test_parse_rejects_garbage_after_part() {
        let mut body = encode("abcd4321", &[("image/jpeg", b"abc")], false);
        body.extend_from_slice(b"junk");

        assert!(matches!(
            parse(&body, "abcd4321"),
            Err(ParseError::MalformedDelimiter(_))
        ));
    }

    #[test]
    fn test_parse_missing_boundary() {
        assert_eq!(
            parse(b"not multipart", "abcd4321"),
            Err(ParseError::MissingBoundary)
        );
    }

    #[test]
    fn test_delimiter_inside_line_is_ignored() {
        // A token that is not at the start of a line is payload, not a delimiter
        let body = b"preamble--b\r\n--b\r\nContent-Type: text/plain\r\n\r\nx\r\n--b--";
        let parsed = parse(body, "b").unwrap();
        assert_eq!(parsed.parts.len(), 1);
        assert_eq!(&parsed.parts[0].body()[..], b"x");
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=abcd4321").as_deref(),
            Some("abcd4321")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;boundary=\"a b\"").as_deref(),
            Some("a b")
        );
        assert_eq!(
            boundary_from_content_type("Multipart/X-Mixed-Replace; charset=x; BOUNDARY=\"frame:1\"")
                .as_deref(),
            Some("frame:1")
        );

        // Unquoted space ends the token
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=a b").as_deref(),
            Some("a")
        );

        assert_eq!(boundary_from_content_type("image/jpeg; boundary=x"), None);
        assert_eq!(boundary_from_content_type("multipart/mixed"), None);
        assert_eq!(boundary_from_content_type("multipart/mixed; boundary=\"open"), None);
        assert_eq!(boundary_from_content_type("multipart/mixed; boundary="), None);
    }
}
