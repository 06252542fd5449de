//! Long-lived UDP listeners for the timing and control ports.
//!
//! Each service binds one IPv4 socket (mandatory) and one IPv6-only
//! socket on the same port (best effort). Receive loops hand datagrams
//! to a callback; replies go out through [`UdpService::send_to`] without
//! awaiting.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use airplay_core::error::Result;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::NtpTimestamp;

/// What a service is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Timing,
    Control,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timing => "timing",
            Self::Control => "control",
        }
    }
}

/// One received datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub kind: ServiceKind,
    pub from: SocketAddr,
    pub data: Vec<u8>,
    /// Stamped as soon as the datagram was read.
    pub received: NtpTimestamp,
}

/// A bound service with its receive loops.
pub struct UdpService {
    kind: ServiceKind,
    port: u16,
    v4: Arc<UdpSocket>,
    v6: Option<Arc<UdpSocket>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpService {
    /// Bind `port` (0 picks one) and start listening.
    pub async fn bind<F>(kind: ServiceKind, port: u16, on_datagram: F) -> Result<Self>
    where
        F: Fn(Datagram) + Send + Sync + 'static,
    {
        let v4 = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?);
        let port = v4.local_addr()?.port();

        let v6 = match bind_v6_only(port) {
            Ok(socket) => Some(Arc::new(socket)),
            Err(e) => {
                warn!("{} service: no IPv6 listener on port {}: {}", kind.as_str(), port, e);
                None
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let on_datagram = Arc::new(on_datagram);
        let mut tasks = vec![tokio::spawn(recv_loop(
            kind,
            v4.clone(),
            on_datagram.clone(),
            shutdown_rx.clone(),
        ))];
        if let Some(v6) = &v6 {
            tasks.push(tokio::spawn(recv_loop(kind, v6.clone(), on_datagram, shutdown_rx)));
        }

        info!(
            "{} service listening on port {} ({})",
            kind.as_str(),
            port,
            if v6.is_some() { "IPv4+IPv6" } else { "IPv4" }
        );

        Ok(Self {
            kind,
            port,
            v4,
            v6,
            shutdown_tx,
            tasks,
        })
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Non-blocking send from the socket matching `to`'s family.
    pub fn send_to(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
        let socket = match to {
            SocketAddr::V4(_) => &self.v4,
            SocketAddr::V6(_) => self.v6.as_ref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no IPv6 listener")
            })?,
        };
        socket.try_send_to(data, to)
    }

    /// Stop the receive loops and wait for them.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        debug!("{} service on port {} stopped", self.kind.as_str(), self.port);
    }
}

impl Drop for UdpService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn bind_v6_only(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_only_v6(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port).into())?;
    UdpSocket::from_std(socket.into())
}

async fn recv_loop<F>(
    kind: ServiceKind,
    socket: Arc<UdpSocket>,
    on_datagram: Arc<F>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    F: Fn(Datagram) + Send + Sync + 'static,
{
    let mut buf = [0u8; 2048];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    let received = NtpTimestamp::now();
                    on_datagram(Datagram {
                        kind,
                        from,
                        data: buf[..len].to_vec(),
                        received,
                    });
                }
                Err(e) => debug!("{} service receive error: {}", kind.as_str(), e),
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn service(kind: ServiceKind) -> (UdpService, mpsc::UnboundedReceiver<Datagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = UdpService::bind(kind, 0, move |d| {
            let _ = tx.send(d);
        })
        .await
        .unwrap();
        (service, rx)
    }

    #[tokio::test]
    async fn delivers_datagrams_with_source() {
        let (service, mut rx) = service(ServiceKind::Timing).await;
        assert_ne!(service.port(), 0);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"ping", ("127.0.0.1", service.port()))
            .await
            .unwrap();

        let datagram = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(datagram.kind, ServiceKind::Timing);
        assert_eq!(datagram.data, b"ping");
        assert_eq!(datagram.from, client.local_addr().unwrap());
        assert!(datagram.received.seconds > 0);
    }

    #[tokio::test]
    async fn replies_reach_the_sender() {
        let (service, mut rx) = service(ServiceKind::Control).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"req", ("127.0.0.1", service.port()))
            .await
            .unwrap();
        let datagram = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();

        service.send_to(b"resp", datagram.from).unwrap();
        let mut buf = [0u8; 16];
        let (len, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"resp");
    }

    #[tokio::test]
    async fn stop_ends_the_loops() {
        let (mut service, mut rx) = service(ServiceKind::Timing).await;
        service.stop().await;
        // Callback (and its sender) dropped with the tasks
        assert!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap().is_none());
    }
}
