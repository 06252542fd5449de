//! Session records owned by the reactor.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use airplay_core::error::{Result, RtspError};
use airplay_core::Device;
use airplay_rtsp::{ConnectionHandle, Outgoing, RaopSession, SessionState, StartMode};
use tokio::sync::oneshot;

use crate::events::{SessionId, StatusEvent};

pub(crate) type StatusReply = oneshot::Sender<Result<StatusEvent>>;

/// A device whose TCP connect is still running.
pub(crate) struct PendingStart {
    pub device: Device,
    pub remote: SocketAddr,
    pub mode: StartMode,
    pub volume: i32,
    pub start_rtptime: u32,
    pub reply: StatusReply,
}

/// One receiver. Removing it from the reactor's map releases the
/// connection and the audio socket.
pub(crate) struct Session {
    pub id: SessionId,
    pub device: Device,
    pub machine: RaopSession,
    pub connection: Option<ConnectionHandle>,
    /// Present once CONNECTED.
    pub audio: Option<UdpSocket>,
    /// Logical volume, 0..=100.
    pub volume: i32,
    pub max_volume: Option<i32>,
    /// Answered the first time the session reaches a reportable state.
    pub waiter: Option<StatusReply>,
    pub stop_waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.machine.params().remote_ip
    }

    pub fn encrypt(&self) -> bool {
        self.machine.params().encrypt
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming && self.audio.is_some()
    }

    /// The receiver's control port, known after SETUP.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        let ports = self.machine.ports()?;
        Some(SocketAddr::new(self.remote_ip(), ports.control_port))
    }

    /// Whether a datagram from `addr` belongs to this receiver.
    pub fn matches(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        self.remote_ip().to_canonical() == addr || self.device.has_address(&addr)
    }

    pub fn status(&self) -> StatusEvent {
        StatusEvent {
            device: self.device.id,
            name: self.device.name.clone(),
            session: self.id,
            state: self.state(),
        }
    }

    /// Hand a request to the connection task.
    pub fn submit(&self, outgoing: Outgoing) -> Result<()> {
        match &self.connection {
            Some(connection) => connection.submit(outgoing.cseq, outgoing.request),
            None => Err(RtspError::ConnectionClosed.into()),
        }
    }

    /// Connect the audio socket to the receiver's server port.
    pub fn open_audio(&mut self) -> io::Result<()> {
        let ports = self
            .machine
            .ports()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no negotiated ports"))?;
        let socket = open_audio_socket(SocketAddr::new(self.remote_ip(), ports.server_port))?;
        self.audio = Some(socket);
        Ok(())
    }
}

/// Non-blocking UDP socket connected to `remote`.
pub(crate) fn open_audio_socket(remote: SocketAddr) -> io::Result<UdpSocket> {
    let local: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local)?;
    socket.connect(remote)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}
