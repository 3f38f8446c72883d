//! RESP (Redis Serialization Protocol) encoder and decoder
//!
//! Commands are encoded into a reusable buffer; replies are decoded
//! incrementally from a `BytesMut` read buffer so that a partially received
//! reply simply waits for more bytes.

use bytes::{Buf, BytesMut};

use super::error::ProtocolError;

/// RESP value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:1000\r\n)
    Integer(i64),
    /// Bulk string ($6\r\nfoobar\r\n)
    BulkString(Vec<u8>),
    /// Null bulk string or null array ($-1\r\n, *-1\r\n)
    Null,
    /// Array (*2\r\n...)
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Check if this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Check if this is a null reply
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Get as string (for simple string or bulk string)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get as bytes (for bulk string)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Short type name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "simple string",
            RespValue::Error(_) => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(_) => "bulk string",
            RespValue::Null => "null",
            RespValue::Array(_) => "array",
        }
    }
}

/// RESP encoder with pre-allocated buffer
pub struct RespEncoder {
    buf: Vec<u8>,
}

impl RespEncoder {
    /// Create new encoder with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Clear buffer for reuse
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Get encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encode a command as RESP array
    /// Each argument is encoded as a bulk string
    pub fn encode_command<A: AsRef<[u8]>>(&mut self, args: &[A]) {
        // Array header: *<count>\r\n
        self.buf.push(b'*');
        self.write_int(args.len() as i64);
        self.buf.extend_from_slice(b"\r\n");

        // Each argument as bulk string: $<len>\r\n<data>\r\n
        for arg in args {
            let arg = arg.as_ref();
            self.buf.push(b'$');
            self.write_int(arg.len() as i64);
            self.buf.extend_from_slice(b"\r\n");
            self.buf.extend_from_slice(arg);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    /// Write integer using fast itoa
    #[inline]
    fn write_int(&mut self, value: i64) {
        let mut buffer = itoa::Buffer::new();
        let s = buffer.format(value);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

/// Incremental RESP decoder
pub struct RespDecoder;

impl RespDecoder {
    /// Decode one value from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a value; the
    /// buffer is left untouched in that case. On success the consumed bytes
    /// are removed from the buffer.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>, ProtocolError> {
        match parse_value(&buf[..], 0)? {
            Some((value, end)) => {
                buf.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Find the line starting at `pos`; returns its content and the position
/// after the trailing CRLF.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let idx = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..idx], pos + idx + 2))
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            ProtocolError::Parse(format!(
                "Invalid integer: {}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn parse_value(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, ProtocolError> {
    let Some((line, next)) = read_line(buf, pos) else {
        return Ok(None);
    };
    let Some((&type_byte, content)) = line.split_first() else {
        return Err(ProtocolError::Parse("Empty RESP line".to_string()));
    };

    match type_byte {
        b'+' => Ok(Some((
            RespValue::SimpleString(String::from_utf8_lossy(content).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            RespValue::Error(String::from_utf8_lossy(content).into_owned()),
            next,
        ))),
        b':' => Ok(Some((RespValue::Integer(parse_int(content)?), next))),
        b'$' => {
            let len = parse_int(content)?;
            if len < 0 {
                return Ok(Some((RespValue::Null, next)));
            }
            let len = usize::try_from(len).map_err(|_| ProtocolError::InvalidLength(len))?;

            // Payload plus trailing \r\n
            let end = next + len + 2;
            if buf.len() < end {
                return Ok(None);
            }
            if &buf[next + len..end] != b"\r\n" {
                return Err(ProtocolError::InvalidLength(len as i64));
            }
            Ok(Some((RespValue::BulkString(buf[next..next + len].to_vec()), end)))
        }
        b'*' => {
            let count = parse_int(content)?;
            if count < 0 {
                return Ok(Some((RespValue::Null, next)));
            }

            let mut elements = Vec::with_capacity((count as usize).min(1024));
            let mut cursor = next;
            for _ in 0..count {
                match parse_value(buf, cursor)? {
                    Some((value, after)) => {
                        elements.push(value);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(elements), cursor)))
        }
        other => Err(ProtocolError::InvalidType(other)),
    }
}
