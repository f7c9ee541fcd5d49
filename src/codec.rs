//! Wire codec for the R-series command protocol
//!
//! Requests and responses are ASCII frames terminated by a NUL byte. Some
//! controller firmware terminates responses with a carriage return instead,
//! so both are accepted as frame terminators when decoding.

use crate::{DriverError, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const NUL: u8 = 0;
const CR: u8 = b'\r';

/// Encode a command as a NUL-terminated ASCII frame
pub fn encode_frame(command: &str) -> Result<Vec<u8>> {
    if !command.is_ascii() {
        return Err(DriverError::Protocol(format!("Command is not ASCII: {}", command)));
    }
    let mut frame = Vec::with_capacity(command.len() + 1);
    frame.extend_from_slice(command.as_bytes());
    frame.push(NUL);
    Ok(frame)
}

/// Accumulates raw bytes and yields complete frames
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete, non-empty frame
    pub fn next_frame(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.iter().position(|&b| b == NUL || b == CR) {
            let mut chunk: Vec<u8> = self.pending.drain(..=pos).collect();
            chunk.pop();
            if chunk.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&chunk).into_owned());
        }
        None
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// TCP connection that speaks the framed request/response protocol
#[derive(Debug)]
pub struct FramedConnection {
    stream: TcpStream,
    frames: FrameBuffer,
    buffer_size: usize,
    response_timeout: Duration,
}

impl FramedConnection {
    /// Open a connection, bounding the TCP handshake by `connect_timeout`
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        response_timeout: Duration,
        buffer_size: usize,
    ) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| DriverError::Timeout(connect_timeout))?
            .map_err(|e| DriverError::Connection(format!("{}:{}: {}", host, port, e)))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            frames: FrameBuffer::new(),
            buffer_size,
            response_timeout,
        })
    }

    pub async fn send(&mut self, command: &str) -> Result<()> {
        let frame = encode_frame(command)?;
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| DriverError::Send(e.to_string()))
    }

    /// Read the next frame, failing on timeout or when the peer closes
    pub async fn recv(&mut self) -> Result<String> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            if let Some(frame) = self.frames.next_frame() {
                return Ok(frame);
            }
            let n = timeout(self.response_timeout, self.stream.read(&mut buf))
                .await
                .map_err(|_| DriverError::Timeout(self.response_timeout))?
                .map_err(|e| DriverError::Receive(e.to_string()))?;
            if n == 0 {
                return Err(DriverError::EmptyResponse);
            }
            self.frames.extend(&buf[..n]);
        }
    }

    /// One request, one response
    pub async fn request(&mut self, command: &str) -> Result<String> {
        self.send(command).await?;
        self.recv().await
    }

    pub async fn shutdown(&mut self) {
        self.frames.clear();
        let _ = self.stream.shutdown().await;
    }
}
