//! Encoded image frames

use bytes::Bytes;
use std::borrow::Cow;

/// MIME type of JPEG frames
pub const MIME_JPEG: &str = "image/jpeg";

/// An encoded still image ready to be written to a client.
///
/// The payload is reference counted, so cloning a frame never copies image
/// data. The length is always derived from the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
    mime_type: Cow<'static, str>,
}

impl Frame {
    /// Creates a frame from an encoded payload and its MIME type
    pub fn new(payload: impl Into<Bytes>, mime_type: impl Into<Cow<'static, str>>) -> Self {
        Self {
            payload: payload.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Creates a JPEG frame
    pub fn jpeg(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, MIME_JPEG)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns true if `token` occurs anywhere inside the payload.
    pub fn contains_token(&self, token: &str) -> bool {
        let needle = token.as_bytes();
        if needle.is_empty() || needle.len() > self.payload.len() {
            return false;
        }
        self.payload
            .windows(needle.len())
            .any(|window| window == needle)
    }

    /// Returns true if the MIME type can be emitted as a header value.
    pub(crate) fn has_valid_mime_type(&self) -> bool {
        !self.mime_type.is_empty()
            && self
                .mime_type
                .bytes()
                .all(|b| b.is_ascii_graphic() || b == b' ')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_follows_payload() {
        let frame = Frame::jpeg(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        assert_eq!(frame.len(), 5);
        assert_eq!(frame.mime_type(), "image/jpeg");
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_contains_token() {
        let frame = Frame::new(&b"\xFF\xD8xxabcd4321yy\xFF\xD9"[..], "image/jpeg");
        assert!(frame.contains_token("abcd4321"));
        assert!(!frame.contains_token("abcd4322"));
        assert!(!frame.contains_token(""));

        let short = Frame::jpeg(&b"abc"[..]);
        assert!(!short.contains_token("abcd4321"));
    }

    #[test]
    fn test_mime_type_validation() {
        assert!(Frame::jpeg(vec![1]).has_valid_mime_type());
        assert!(Frame::new(vec![1], "image/png; q=1").has_valid_mime_type());
        assert!(!Frame::new(vec![1], "image/jpeg\r\nX-Evil: 1").has_valid_mime_type());
        assert!(!Frame::new(vec![1], "").has_valid_mime_type());
    }
}
