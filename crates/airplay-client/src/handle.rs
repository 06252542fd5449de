//! Cross-thread command bus into the reactor.

use std::sync::Arc;

use airplay_core::error::{Error, Result};
use airplay_core::Device;
use tokio::sync::{mpsc, oneshot};

use crate::events::{SessionId, StatusEvent};
use crate::metadata::MetadataItem;
use crate::sender::Event;
use crate::stats::{StatsSnapshot, StreamStats};

/// Work posted to the reactor.
pub(crate) enum Command {
    Probe {
        device: Device,
        reply: oneshot::Sender<Result<StatusEvent>>,
    },
    Start {
        device: Device,
        volume: i32,
        start_rtptime: u32,
        reply: oneshot::Sender<Result<StatusEvent>>,
    },
    Stop {
        session: SessionId,
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        rtptime: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    SetVolume {
        session: SessionId,
        volume: i32,
        reply: oneshot::Sender<Result<()>>,
    },
    SetVolumeAll {
        volume: i32,
    },
    WriteAudio {
        pcm: Vec<u8>,
        rtptime: u32,
    },
    SendMetadata {
        item: MetadataItem,
        current: u32,
        startup: bool,
    },
    PlaybackStart {
        next_rtptime: u32,
        start_wall_ns: u64,
    },
    PlaybackStop,
    Sessions {
        reply: oneshot::Sender<Vec<StatusEvent>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle to a running [`RaopSender`](crate::RaopSender).
///
/// Every call is marshaled onto the reactor task; nothing here touches
/// session state directly.
#[derive(Clone)]
pub struct SenderHandle {
    tx: mpsc::UnboundedSender<Event>,
    stats: Arc<StreamStats>,
}

impl SenderHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>, stats: Arc<StreamStats>) -> Self {
        Self { tx, stats }
    }

    fn post(&self, command: Command) -> Result<()> {
        self.tx
            .send(Event::Command(command))
            .map_err(|_| Error::SenderClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.post(build(reply))?;
        rx.await.map_err(|_| Error::SenderClosed)
    }

    /// OPTIONS only, then close. Reports `Options`, `Password` or `Failed`.
    pub async fn probe(&self, device: Device) -> Result<StatusEvent> {
        self.request(|reply| Command::Probe { device, reply }).await?
    }

    /// Run the full handshake. Resolves once the session is CONNECTED
    /// (or STREAMING), or with the terminal state it ended in.
    pub async fn start(&self, device: Device, volume: i32, start_rtptime: u32) -> Result<StatusEvent> {
        self.request(|reply| Command::Start {
            device,
            volume,
            start_rtptime,
            reply,
        })
        .await?
    }

    /// Graceful TEARDOWN. Resolves once the session is gone.
    pub async fn stop(&self, session: SessionId) -> Result<()> {
        self.request(|reply| Command::Stop { session, reply }).await?
    }

    /// FLUSH every live session up to `rtptime`. Resolves once all of
    /// them answered or failed.
    pub async fn flush(&self, rtptime: u32) -> Result<()> {
        self.request(|reply| Command::Flush { rtptime, reply }).await?
    }

    pub async fn set_volume(&self, session: SessionId, volume: i32) -> Result<()> {
        self.request(|reply| Command::SetVolume {
            session,
            volume,
            reply,
        })
        .await?
    }

    pub fn set_volume_all(&self, volume: i32) -> Result<()> {
        self.post(Command::SetVolumeAll { volume })
    }

    /// One packet's worth of 16-bit little-endian stereo PCM that plays
    /// at `rtptime`.
    pub fn write_audio(&self, pcm: Vec<u8>, rtptime: u32) -> Result<()> {
        self.post(Command::WriteAudio { pcm, rtptime })
    }

    pub fn send_metadata(&self, item: MetadataItem, current: u32, startup: bool) -> Result<()> {
        self.post(Command::SendMetadata {
            item,
            current,
            startup,
        })
    }

    /// `next_rtptime` plays at `start_wall_ns` (Unix nanoseconds).
    pub fn playback_start(&self, next_rtptime: u32, start_wall_ns: u64) -> Result<()> {
        self.post(Command::PlaybackStart {
            next_rtptime,
            start_wall_ns,
        })
    }

    pub fn playback_stop(&self) -> Result<()> {
        self.post(Command::PlaybackStop)
    }

    /// Current status of every session.
    pub async fn sessions(&self) -> Result<Vec<StatusEvent>> {
        self.request(|reply| Command::Sessions { reply }).await
    }

    /// Tear everything down, waiting at most the configured stop timeout.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await?
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
