//! The request/response codec.
//!
//! A frame is a block of `Name: value` header lines, a blank line, then a
//! body of exactly `Content-Length` bytes. Lines end with `\n`; a
//! trailing `\r` is tolerated on read. `Content-Length` belongs to the
//! codec: the writer derives it from the body and the reader consumes it,
//! so it never appears among a parsed frame's headers.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AlderError, Result};

/// Largest body the codec accepts. A peer announcing more is answered
/// with a protocol error before anything is allocated for it.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// One protocol message in either direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Append a header. Values must not contain newlines; the writer
    /// does not escape them.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Read one frame. `Ok(None)` means the peer closed the connection
    /// cleanly between frames; closing mid-frame is an error.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Frame>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut headers = Vec::new();
        let mut content_length = 0usize;

        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                if headers.is_empty() {
                    return Ok(None);
                }
                return Err(AlderError::protocol("connection closed mid-request"));
            }

            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                break;
            }

            let Some((name, value)) = line.split_once(':') else {
                let bad = line.to_string();
                Self::drain_headers(reader).await?;
                return Err(AlderError::protocol(format!(
                    "malformed header line `{bad}`"
                )));
            };
            let name = name.trim();
            let value = value.trim();

            if name.eq_ignore_ascii_case("content-length") {
                match value.parse() {
                    Ok(length) if length > MAX_BODY_BYTES => {
                        Self::drain_headers(reader).await?;
                        return Err(AlderError::protocol(format!(
                            "Content-Length {length} exceeds the {MAX_BODY_BYTES}-byte limit"
                        )));
                    }
                    Ok(length) => content_length = length,
                    Err(_) => {
                        let bad = value.to_string();
                        Self::drain_headers(reader).await?;
                        return Err(AlderError::protocol(format!(
                            "bad Content-Length `{bad}`"
                        )));
                    }
                }
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        Ok(Some(Frame { headers, body }))
    }

    /// Skip to the end of the current header block so the connection can
    /// carry the next frame.
    async fn drain_headers<R>(reader: &mut R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 || line.trim_end_matches(['\n', '\r']).is_empty() {
                return Ok(());
            }
        }
    }

    /// Write the frame, including the derived `Content-Length`, as one
    /// flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut out = Vec::with_capacity(self.body.len() + 64);
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(format!("Content-Length: {}\n\n", self.body.len()).as_bytes());
        out.extend_from_slice(&self.body);

        writer.write_all(&out).await?;
        writer.flush().await?;
        Ok(())
    }
}
