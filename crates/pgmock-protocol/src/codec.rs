//! Big-endian primitives over a duplex byte stream.
//!
//! Reads go straight to the stream and return their own `Result`. Writes are
//! chained into an output buffer and only reach the stream on [`WireCodec::flush`];
//! a message that fails half way through encoding is rolled back by
//! [`WireCodec::write_message`] so it never leaves partial bytes behind.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// PostgreSQL refuses frames larger than 1 GiB.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 1 << 30;

#[derive(Debug)]
pub struct WireCodec<S> {
    stream: S,
    out: BytesMut,
    max_message_length: usize,
}

impl<S> WireCodec<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            out: BytesMut::with_capacity(1024),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Bytes encoded but not yet flushed.
    pub fn pending(&self) -> &[u8] {
        &self.out
    }

    pub fn take_pending(&mut self) -> BytesMut {
        self.out.split()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.out.put_u8(value);
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.out.put_i16(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.out.put_i32(value);
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.out.put_i64(value);
        self
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.out.extend_from_slice(value);
        self
    }

    /// Writes `value` followed by a single zero byte.
    pub fn write_cstring(&mut self, value: &str) -> Result<&mut Self, ProtocolError> {
        if value.as_bytes().contains(&0) {
            return Err(ProtocolError::Malformed(format!(
                "string {value:?} contains an embedded NUL"
            )));
        }
        self.out.extend_from_slice(value.as_bytes());
        self.out.put_u8(0);
        Ok(self)
    }

    /// Runs `encode` against the output buffer, discarding everything it wrote
    /// if it fails.
    pub fn write_message<F>(&mut self, encode: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(&mut Self) -> Result<(), ProtocolError>,
    {
        let mark = self.out.len();
        let result = encode(self);
        if result.is_err() {
            self.out.truncate(mark);
        }
        result
    }
}

impl<S: AsyncRead + Unpin> WireCodec<S> {
    pub async fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.stream.read_u8().await?)
    }

    pub async fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(self.stream.read_i16().await?)
    }

    pub async fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.stream.read_i32().await?)
    }

    pub async fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(self.stream.read_i64().await?)
    }

    /// Reads up to a zero terminator. End of stream ends the string as well.
    pub async fn read_cstring(&mut self) -> Result<String, ProtocolError> {
        let mut buf = Vec::new();
        loop {
            match self.stream.read_u8().await {
                Ok(0) => break,
                Ok(byte) => buf.push(byte),
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
        }
        String::from_utf8(buf)
            .map_err(|err| ProtocolError::Malformed(format!("string is not valid UTF-8: {err}")))
    }

    /// Reads exactly `len` bytes; `len == 0` does not touch the stream.
    pub async fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut buf = Vec::new();
        (&mut self.stream)
            .take(len as u64)
            .read_to_end(&mut buf)
            .await?;
        if buf.len() != len {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("expected {len} bytes, stream ended after {}", buf.len()),
            )
            .into());
        }
        Ok(buf)
    }

    /// Reads a declared length and returns how many bytes follow once the
    /// `consumed` header bytes (length field included) are accounted for.
    pub async fn read_length(&mut self, consumed: usize) -> Result<usize, ProtocolError> {
        let declared = self.read_i32().await?;
        let len = usize::try_from(declared)
            .map_err(|_| ProtocolError::Malformed(format!("negative message length {declared}")))?;
        if len < consumed {
            return Err(ProtocolError::Malformed(format!(
                "message length {len} is shorter than its {consumed} byte header"
            )));
        }
        if len > self.max_message_length {
            return Err(ProtocolError::Malformed(format!(
                "message length {len} exceeds limit of {}",
                self.max_message_length
            )));
        }
        Ok(len - consumed)
    }

    /// Reads the length field and the body of a tagged message.
    pub async fn read_body(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_length(4).await?;
        self.read_bytes(len).await
    }

    /// Reads one tagged message as `(tag, body)`.
    pub async fn read_frame(&mut self) -> Result<(u8, Vec<u8>), ProtocolError> {
        let tag = self.read_u8().await?;
        let body = self.read_body().await?;
        Ok((tag, body))
    }
}

impl<S: AsyncWrite + Unpin> WireCodec<S> {
    /// Sends every buffered message to the stream.
    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        if !self.out.is_empty() {
            self.stream.write_all(&self.out).await?;
            self.out.clear();
        }
        self.stream.flush().await?;
        Ok(())
    }
}

/// Value of a length field covering itself plus `body_len` bytes.
pub fn declared_length(body_len: usize) -> Result<i32, ProtocolError> {
    i32::try_from(body_len + 4).map_err(|_| {
        ProtocolError::Malformed(format!("message body of {body_len} bytes is too large"))
    })
}

/// Encoded size of a protocol string, terminator included.
pub fn cstring_len(value: &str) -> usize {
    value.len() + 1
}

/// Converts a collection size into the Int16 count used on the wire.
pub fn count_i16(count: usize, what: &str) -> Result<i16, ProtocolError> {
    i16::try_from(count)
        .map_err(|_| ProtocolError::Malformed(format!("too many {what}: {count}")))
}

/// Converts a wire Int16 count back into a collection size.
pub fn count_usize(count: i16, what: &str) -> Result<usize, ProtocolError> {
    usize::try_from(count)
        .map_err(|_| ProtocolError::Malformed(format!("negative {what} count {count}")))
}
