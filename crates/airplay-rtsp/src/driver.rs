//! Per-session connection task.
//!
//! The task owns the transport and runs one request at a time. Results
//! come back through a callback so the owner never awaits the network.

use airplay_core::error::{Result, RtspError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::traits::RtspTransport;
use crate::{RtspRequest, RtspResponse};

/// What the connection task reports back.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The exchange for `cseq` finished.
    Response {
        cseq: u32,
        result: Result<RtspResponse>,
    },
    /// The peer closed the connection while idle.
    Closed,
}

/// Owning handle to a running connection task. Dropping it aborts the
/// task, which closes the socket.
pub struct ConnectionHandle {
    requests: mpsc::UnboundedSender<(u32, RtspRequest)>,
    task: JoinHandle<()>,
    detached: bool,
}

impl ConnectionHandle {
    /// Start driving `transport`, reporting through `on_event`.
    pub fn spawn<T, F>(transport: T, on_event: F) -> Self
    where
        T: RtspTransport + 'static,
        F: FnMut(ConnectionEvent) + Send + 'static,
    {
        let (requests, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(transport, rx, on_event));
        Self {
            requests,
            task,
            detached: false,
        }
    }

    /// Queue one request. The caller is responsible for never having two
    /// outstanding.
    pub fn submit(&self, cseq: u32, request: RtspRequest) -> Result<()> {
        self.requests
            .send((cseq, request))
            .map_err(|_| RtspError::ConnectionClosed.into())
    }

    /// Send one last request and let the task close the connection once
    /// it is answered or fails. Send errors are ignored.
    pub fn finish(mut self, cseq: u32, request: RtspRequest) {
        if self.requests.send((cseq, request)).is_ok() {
            self.detached = true;
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.task.abort();
        }
    }
}

async fn drive<T, F>(mut transport: T, mut rx: mpsc::UnboundedReceiver<(u32, RtspRequest)>, mut on_event: F)
where
    T: RtspTransport,
    F: FnMut(ConnectionEvent),
{
    loop {
        tokio::select! {
            biased;
            next = rx.recv() => match next {
                Some((cseq, request)) => {
                    let result = transport.send(cseq, request).await;
                    let failed = result.is_err();
                    on_event(ConnectionEvent::Response { cseq, result });
                    if failed {
                        break;
                    }
                }
                None => break,
            },
            _ = transport.closed() => {
                debug!("RTSP peer closed the connection");
                on_event(ConnectionEvent::Closed);
                break;
            }
        }
    }
    let _ = transport.close().await;
}
