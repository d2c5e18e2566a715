//! RESP (Redis Serialization Protocol) encoder and decoder
//!
//! Commands are always written as arrays of bulk strings; replies are
//! decoded from a buffered stream one value at a time.

use std::io::{self, BufRead};

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

    /// Parse a MOVED/ASK error reply
    pub fn redirect(&self) -> Option<Redirect> {
        match self {
            RespValue::Error(e) => Redirect::parse(e),
            _ => None,
        }
    }

    /// Get as string (for simple string or bulk string)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

/// Cluster redirection carried by a MOVED or ASK error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub slot: u16,
    pub host: String,
    pub port: u16,
    /// ASK redirects are one-shot and need an ASKING prefix
    pub is_ask: bool,
}

impl Redirect {
    /// Parse "MOVED 3999 127.0.0.1:7001" or "ASK 3999 127.0.0.1:7001"
    pub fn parse(message: &str) -> Option<Self> {
        let mut parts = message.split_whitespace();
        let is_ask = match parts.next()? {
            "MOVED" => false,
            "ASK" => true,
            _ => return None,
        };
        let slot: u16 = parts.next()?.parse().ok()?;
        let (host, port) = parts.next()?.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;

        Some(Self {
            slot,
            host: host.to_string(),
            port,
            is_ask,
        })
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

    /// Encode one command as a RESP array of bulk strings
    pub fn encode_parts<'a, I>(&mut self, parts: I)
    where
        I: IntoIterator<Item = &'a [u8]>,
        I::IntoIter: ExactSizeIterator,
    {
        let parts = parts.into_iter();

        // Array header: *<count>\r\n
        self.buf.push(b'*');
        self.write_int(parts.len() as i64);
        self.buf.extend_from_slice(b"\r\n");

        // Each argument as bulk string: $<len>\r\n<data>\r\n
        for part in parts {
            self.buf.push(b'$');
            self.write_int(part.len() as i64);
            self.buf.extend_from_slice(b"\r\n");
            self.buf.extend_from_slice(part);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    #[inline]
    fn write_int(&mut self, value: i64) {
        let mut buffer = itoa::Buffer::new();
        let s = buffer.format(value);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

/// RESP decoder for streaming reads
pub struct RespDecoder<R> {
    reader: R,
    line_buf: String,
}

impl<R: BufRead> RespDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: String::with_capacity(256),
        }
    }

    /// Decode next RESP value from stream
    pub fn decode(&mut self) -> io::Result<RespValue> {
        self.line_buf.clear();
        self.reader.read_line(&mut self.line_buf)?;

        if self.line_buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed",
            ));
        }

        let line = self.line_buf.trim_end_matches(&['\r', '\n'][..]);
        if line.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Empty RESP line"));
        }

        let type_byte = line.as_bytes()[0];
        let content = &line[1..];

        match type_byte {
            b'+' => Ok(RespValue::SimpleString(content.to_string())),
            b'-' => Ok(RespValue::Error(content.to_string())),
            b':' => {
                let value: i64 = content
                    .parse()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid integer"))?;
                Ok(RespValue::Integer(value))
            }
            b'$' => {
                let len: i64 = content.parse().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "Invalid bulk string length")
                })?;

                if len < 0 {
                    return Ok(RespValue::Null);
                }

                let mut data = vec![0u8; len as usize];
                self.reader.read_exact(&mut data)?;

                // Trailing \r\n
                let mut crlf = [0u8; 2];
                self.reader.read_exact(&mut crlf)?;

                Ok(RespValue::BulkString(data))
            }
            b'*' => {
                let count: i64 = content.parse().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "Invalid array length")
                })?;

                if count < 0 {
                    return Ok(RespValue::Null);
                }

                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(self.decode()?);
                }

                Ok(RespValue::Array(elements))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid RESP type byte: {}", type_byte as char),
            )),
        }
    }

    /// Decode `count` consecutive replies (one per pipelined command)
    pub fn decode_pipeline(&mut self, count: usize) -> io::Result<Vec<RespValue>> {
        let mut responses = Vec::with_capacity(count);
        for _ in 0..count {
            responses.push(self.decode()?);
        }
        Ok(responses)
    }
}
