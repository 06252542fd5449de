//! RTSP connection management.

use std::net::SocketAddr;
use std::time::Duration;

use airplay_core::error::{Error as CoreError, Result, RtspError};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::traits::RtspTransport;
use crate::{RtspRequest, RtspResponse};

/// Bound on connect and on each request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest response head accepted, status line and headers together.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Largest `Content-Length` accepted from a receiver.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Plaintext RTSP connection to a RAOP receiver.
pub struct RtspConnection {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    timeout: Duration,
}

impl RtspConnection {
    /// Create new connection (not yet connected).
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            stream: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Connect to the receiver.
    pub async fn connect(&mut self) -> Result<()> {
        let stream = timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| CoreError::Timeout)??;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Get local socket address if connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Send request and receive response.
    pub async fn send(&mut self, cseq: u32, request: RtspRequest) -> Result<RtspResponse> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(RtspError::ConnectionClosed)?;

        let request_data = request.serialize(cseq);
        debug!(
            "RTSP -> {} {} (cseq={}, body_len={})",
            request.method.as_str(),
            request.uri,
            cseq,
            request.body.as_ref().map(|b| b.len()).unwrap_or(0)
        );

        stream.write_all(&request_data).await?;
        stream.flush().await?;

        let response = timeout(self.timeout, self.read_response())
            .await
            .map_err(|_| CoreError::Timeout)??;
        debug!(
            "RTSP <- {} {} (cseq={:?})",
            response.status_code,
            response.status_text,
            response.cseq()
        );

        // Warning only, some receivers echo nothing
        if response.cseq() != Some(cseq) {
            warn!("CSeq mismatch: expected {}, got {:?}", cseq, response.cseq());
        }

        Ok(response)
    }

    /// Read one response: head lines up to the blank line, then the body.
    async fn read_response(&mut self) -> Result<RtspResponse> {
        let stream = self.stream.as_mut().ok_or(RtspError::ConnectionClosed)?;
        let mut reader = BufReader::new(stream);

        let mut head = String::new();
        let mut limited = (&mut reader).take(MAX_HEAD_BYTES as u64);
        loop {
            let before = head.len();
            if limited.read_line(&mut head).await? == 0 {
                if head.len() >= MAX_HEAD_BYTES {
                    return Err(RtspError::InvalidResponse(format!(
                        "response head exceeds {} bytes",
                        MAX_HEAD_BYTES
                    ))
                    .into());
                }
                return Err(RtspError::ConnectionClosed.into());
            }
            if head[before..].trim_end().is_empty() {
                break;
            }
        }

        let mut response = RtspResponse::parse_head(&head)?;
        if let Some(length) = response.content_length().filter(|&n| n > 0) {
            if length > MAX_BODY_BYTES {
                return Err(RtspError::InvalidResponse(format!(
                    "Content-Length {} exceeds {} bytes",
                    length, MAX_BODY_BYTES
                ))
                .into());
            }
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).await?;
            response.body = Some(body);
        }
        Ok(response)
    }

    /// Wait for the receiver to close the connection. Unsolicited bytes
    /// are discarded.
    pub async fn wait_closed(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut buf = [0u8; 512];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => trace!("Discarding {} unsolicited bytes from {}", n, self.addr),
            }
        }
    }

    /// Close the connection.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl RtspTransport for RtspConnection {
    async fn send(&mut self, cseq: u32, request: RtspRequest) -> Result<RtspResponse> {
        self.send(cseq, request).await
    }

    async fn closed(&mut self) {
        self.wait_closed().await
    }

    fn is_connected(&self) -> bool {
        self.is_connected()
    }

    async fn close(&mut self) -> Result<()> {
        self.close().await
    }
}
