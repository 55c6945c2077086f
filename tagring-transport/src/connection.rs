use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, ErrorKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// Message size cap per spec.md §6: 16 MiB per request.
pub const MAX_MESSAGE_BYTES: u32 = 16 * 1024 * 1024;

/// A length-framed JSON connection: every message is a 4-byte big-endian
/// length prefix followed by that many bytes of JSON. One connection is used
/// for exactly one request-reply round trip by callers in this crate, but
/// the type itself is agnostic to how many frames pass over it.
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Connection {
        Connection { stream: BufWriter::new(socket), buffer: BytesMut::with_capacity(4 * 1024) }
    }

    /// Reads one length-prefixed frame. Returns `Ok(None)` on a clean EOF
    /// before any bytes of a new frame arrive (the "connection closed"
    /// case); returns an error for a truncated frame or an oversize length.
    pub async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        while self.buffer.len() < 4 {
            if self.fill_buf().await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated length prefix"))
                };
            }
        }
        let len = u32::from_be_bytes(self.buffer[..4].try_into().unwrap());
        if len > MAX_MESSAGE_BYTES {
            return Err(io::Error::new(ErrorKind::InvalidData, "frame exceeds 16 MiB cap"));
        }
        let total = 4 + len as usize;
        while self.buffer.len() < total {
            if self.fill_buf().await? == 0 {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated frame body"));
            }
        }
        self.buffer.advance(4);
        Ok(Some(self.buffer.split_to(len as usize).to_vec()))
    }

    async fn fill_buf(&mut self) -> io::Result<usize> {
        self.stream.read_buf(&mut self.buffer).await
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        if payload.len() as u64 > MAX_MESSAGE_BYTES as u64 {
            return Err(io::Error::new(ErrorKind::InvalidInput, "frame exceeds 16 MiB cap"));
        }
        self.stream.write_u32(payload.len() as u32).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await
    }

    pub async fn read_json<T: DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        match self.read_frame().await? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| io::Error::new(ErrorKind::InvalidData, e)),
        }
    }

    pub async fn write_json<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        let payload = serde_json::to_vec(value).map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
        self.write_frame(&payload).await
    }
}
