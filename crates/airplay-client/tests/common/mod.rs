//! In-process RTSP receiver that answers from a script.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use airplay_client::{
    ChannelSink, Device, DeviceId, RaopSender, SenderConfig, SenderHandle, StatusEvent,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// One request as the receiver saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cseq(&self) -> u32 {
        self.header("CSeq").and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// A `key=value` field of the Transport header.
    pub fn transport_port(&self, key: &str) -> Option<u16> {
        self.header("Transport")?
            .split(';')
            .filter_map(|part| part.split_once('='))
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.parse().ok())
    }
}

/// Build a response with `CSeq` and optional extra headers.
pub fn response(status: u16, reason: &str, request: &Received, headers: &[(&str, &str)]) -> String {
    let mut out = format!("RTSP/1.0 {} {}\r\nCSeq: {}\r\n", status, reason, request.cseq());
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    out
}

pub fn ok(request: &Received) -> String {
    response(200, "OK", request, &[])
}

/// Accept one connection and answer each request with `script`. `None`
/// closes the connection. The task resolves to every request seen once
/// the sender closes its side.
pub async fn scripted_receiver<F>(mut script: F) -> (SocketAddr, JoinHandle<Vec<Received>>)
where
    F: FnMut(&Received) -> Option<String> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let mut seen = Vec::new();

        while let Some(request) = read_request(&mut reader).await {
            let answer = script(&request);
            seen.push(request);
            match answer {
                Some(text) => {
                    if write_half.write_all(text.as_bytes()).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
        seen
    });

    (addr, task)
}

pub async fn read_request<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Option<Received> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.ok()? == 0 {
        return None;
    }
    let mut parts = request_line.trim_end().splitn(3, ' ');
    let method = parts.next()?.to_string();
    let uri = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.ok()?;

    Some(Received {
        method,
        uri,
        headers,
        body,
    })
}

pub fn device(name: &str, addr: SocketAddr) -> Device {
    Device::new(
        DeviceId([0x02, 0, 0, 0, 0, 1]),
        name,
        vec![addr.ip()],
        addr.port(),
    )
}

pub fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// A running sender publishing status on a channel.
pub struct TestSender {
    pub handle: SenderHandle,
    pub status: mpsc::UnboundedReceiver<StatusEvent>,
    pub timing_port: u16,
    pub control_port: u16,
    pub task: JoinHandle<()>,
}

pub async fn start_sender(config: SenderConfig) -> TestSender {
    let (sink, status) = ChannelSink::new();
    let sender = RaopSender::bind(config, Arc::new(sink)).await.unwrap();
    let handle = sender.handle();
    let timing_port = sender.timing_port();
    let control_port = sender.control_port();
    let task = tokio::spawn(sender.run());
    TestSender {
        handle,
        status,
        timing_port,
        control_port,
        task,
    }
}

pub async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("timed out")
}
