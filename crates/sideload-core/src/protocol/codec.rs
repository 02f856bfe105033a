//! Length-prefixed plist codec shared by lockdown and the plist services.
//!
//! Wire format:
//! ```text
//! [body_len:4][plist body:N]
//! ```
//! `body_len` is a big-endian `u32`.  Outbound bodies are XML plists; inbound
//! bodies may be XML or binary (`bplist00`), the parser detects which.

use std::io::Cursor;

use plist::{Dictionary, Value};
use thiserror::Error;

/// Size of the big-endian length prefix in front of every plist body.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest plist body accepted from or sent to a device (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur while encoding or decoding device messages.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A frame declared a body larger than [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The plist body could not be parsed or serialized.
    #[error("plist error: {0}")]
    Plist(String),

    /// The plist body parsed, but its top level is not a dictionary.
    #[error("plist body is not a dictionary")]
    NotADictionary,

    /// A required field is absent from a message.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but holds an unexpected value or type.
    #[error("unexpected value for `{field}`: {value}")]
    UnexpectedValue { field: &'static str, value: String },

    /// The device answered a request with an `Error` entry.
    #[error("device rejected {request}: {reason}")]
    Rejected { request: String, reason: String },

    /// An AFC packet did not start with the `CFA6LPAA` magic.
    #[error("invalid AFC magic: 0x{0:016X}")]
    BadMagic(u64),

    /// An AFC operation code is not one this codec understands.
    #[error("unknown AFC operation: 0x{0:02X}")]
    UnknownOperation(u64),

    /// A binary payload is structurally invalid.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `message` as an XML plist behind a 4-byte big-endian length prefix.
///
/// # Errors
///
/// Returns [`ProtocolError::Plist`] if serialization fails and
/// [`ProtocolError::FrameTooLarge`] if the body exceeds [`MAX_FRAME_SIZE`].
///
/// # Examples
///
/// ```rust
/// use plist::Dictionary;
/// use sideload_core::protocol::codec::{decode_plist_frame, encode_plist_frame};
///
/// let mut msg = Dictionary::new();
/// msg.insert("Request".to_string(), "QueryType".into());
/// let bytes = encode_plist_frame(&msg).unwrap();
/// let (decoded, consumed) = decode_plist_frame(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_plist_frame(message: &Dictionary) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; LENGTH_PREFIX_SIZE];
    plist::to_writer_xml(&mut buf, message).map_err(|e| ProtocolError::Plist(e.to_string()))?;

    let body_len = buf.len() - LENGTH_PREFIX_SIZE;
    if body_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body_len,
            max: MAX_FRAME_SIZE,
        });
    }
    buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&(body_len as u32).to_be_bytes());
    Ok(buf)
}

/// Decodes one framed plist dictionary from the beginning of `bytes`.
///
/// Returns the dictionary and the total number of bytes consumed (prefix +
/// body), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the prefix is truncated, the declared body is
/// too large or incomplete, or the body is not a plist dictionary.
pub fn decode_plist_frame(bytes: &[u8]) -> Result<(Dictionary, usize), ProtocolError> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: LENGTH_PREFIX_SIZE,
            available: bytes.len(),
        });
    }

    let prefix = [bytes[0], bytes[1], bytes[2], bytes[3]];
    let body_len = frame_body_len(prefix)?;

    let total = LENGTH_PREFIX_SIZE + body_len;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let message = decode_plist_body(&bytes[LENGTH_PREFIX_SIZE..total])?;
    Ok((message, total))
}

/// Interprets a length prefix read from a stream, enforcing [`MAX_FRAME_SIZE`].
///
/// Stream readers read the 4 prefix bytes first, call this, then read exactly
/// the returned number of body bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] for oversized declarations.
pub fn frame_body_len(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize, ProtocolError> {
    let body_len = u32::from_be_bytes(prefix) as usize;
    if body_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body_len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(body_len)
}

/// Parses a plist body (XML or binary) whose top level must be a dictionary.
///
/// # Errors
///
/// Returns [`ProtocolError::Plist`] for unparsable input and
/// [`ProtocolError::NotADictionary`] for any other top-level type.
pub fn decode_plist_body(body: &[u8]) -> Result<Dictionary, ProtocolError> {
    let value =
        Value::from_reader(Cursor::new(body)).map_err(|e| ProtocolError::Plist(e.to_string()))?;
    value.into_dictionary().ok_or(ProtocolError::NotADictionary)
}

// ── Field access ──────────────────────────────────────────────────────────────

/// Returns the string stored under `field`.
///
/// # Errors
///
/// [`ProtocolError::MissingField`] or [`ProtocolError::UnexpectedValue`].
pub fn required_string<'a>(
    message: &'a Dictionary,
    field: &'static str,
) -> Result<&'a str, ProtocolError> {
    let value = message.get(field).ok_or(ProtocolError::MissingField(field))?;
    value.as_string().ok_or_else(|| ProtocolError::UnexpectedValue {
        field,
        value: format!("{value:?}"),
    })
}

/// Returns the unsigned integer stored under `field`.
///
/// Devices are not consistent about integer signedness, so non-negative
/// signed values are accepted too.
///
/// # Errors
///
/// [`ProtocolError::MissingField`] or [`ProtocolError::UnexpectedValue`].
pub fn required_unsigned(message: &Dictionary, field: &'static str) -> Result<u64, ProtocolError> {
    let value = message.get(field).ok_or(ProtocolError::MissingField(field))?;
    as_unsigned(value).ok_or_else(|| ProtocolError::UnexpectedValue {
        field,
        value: format!("{value:?}"),
    })
}

/// Returns the unsigned integer under `field`, or `None` when absent or not a
/// non-negative integer.
pub fn optional_unsigned(message: &Dictionary, field: &str) -> Option<u64> {
    message.get(field).and_then(as_unsigned)
}

/// Returns the integer under `field` as signed, or `None` when absent, not an
/// integer, or above `i64::MAX`.
pub fn optional_signed(message: &Dictionary, field: &str) -> Option<i64> {
    message.get(field).and_then(Value::as_signed_integer)
}

/// Returns the boolean under `field`, treating absence as `false`.
pub fn flag(message: &Dictionary, field: &str) -> bool {
    message
        .get(field)
        .and_then(Value::as_boolean)
        .unwrap_or(false)
}

/// Returns the device's `Error` string if the message carries one.
pub fn device_error(message: &Dictionary) -> Option<&str> {
    message.get("Error").and_then(Value::as_string)
}

fn as_unsigned(value: &Value) -> Option<u64> {
    value
        .as_unsigned_integer()
        .or_else(|| value.as_signed_integer().and_then(|v| u64::try_from(v).ok()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dictionary {
        let mut d = Dictionary::new();
        d.insert("Label".to_string(), "test".into());
        d.insert("Request".to_string(), "QueryType".into());
        d
    }

    #[test]
    fn test_encode_writes_big_endian_body_length() {
        // Arrange
        let msg = sample();

        // Act
        let bytes = encode_plist_frame(&msg).unwrap();

        // Assert
        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(declared, bytes.len() - LENGTH_PREFIX_SIZE);
        assert!(bytes[LENGTH_PREFIX_SIZE..].starts_with(b"<?xml"));
    }

    #[test]
    fn test_decode_consumes_exactly_one_frame_from_concatenated_input() {
        // Arrange
        let first = encode_plist_frame(&sample()).unwrap();
        let mut input = first.clone();
        input.extend_from_slice(&first);

        // Act
        let (decoded, consumed) = decode_plist_frame(&input).unwrap();

        // Assert
        assert_eq!(decoded, sample());
        assert_eq!(consumed, first.len());
    }

    #[test]
    fn test_decode_truncated_prefix_returns_insufficient_data() {
        let result = decode_plist_frame(&[0x00, 0x01]);
        assert_eq!(
            result.unwrap_err(),
            ProtocolError::InsufficientData {
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn test_decode_truncated_body_returns_insufficient_data() {
        // Arrange – drop the last byte of a valid frame
        let mut bytes = encode_plist_frame(&sample()).unwrap();
        bytes.pop();

        // Act
        let result = decode_plist_frame(&bytes);

        // Assert
        assert!(matches!(
            result,
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_frame_body_len_rejects_oversized_declaration() {
        let prefix = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        assert!(matches!(
            frame_body_len(prefix),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_body_rejects_non_dictionary_top_level() {
        // Arrange – an XML plist whose root is an array
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><array><string>x</string></array></plist>"#;

        // Act / Assert
        assert_eq!(
            decode_plist_body(body).unwrap_err(),
            ProtocolError::NotADictionary
        );
    }

    #[test]
    fn test_decode_body_accepts_binary_plist() {
        // Arrange
        let mut body = Vec::new();
        plist::to_writer_binary(&mut body, &sample()).unwrap();

        // Act
        let decoded = decode_plist_body(&body).unwrap();

        // Assert
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_decode_body_rejects_garbage() {
        assert!(matches!(
            decode_plist_body(b"definitely not a plist"),
            Err(ProtocolError::Plist(_))
        ));
    }

    #[test]
    fn test_required_unsigned_accepts_non_negative_signed_integer() {
        // Arrange
        let mut d = Dictionary::new();
        d.insert("Port".to_string(), Value::Integer(49152i64.into()));

        // Act / Assert
        assert_eq!(required_unsigned(&d, "Port").unwrap(), 49152);
    }

    #[test]
    fn test_required_string_reports_wrong_type() {
        let mut d = Dictionary::new();
        d.insert("Type".to_string(), Value::Boolean(true));
        assert!(matches!(
            required_string(&d, "Type"),
            Err(ProtocolError::UnexpectedValue { field: "Type", .. })
        ));
    }

    #[test]
    fn test_flag_defaults_to_false_when_absent() {
        assert!(!flag(&Dictionary::new(), "EnableSessionSSL"));
    }
}
