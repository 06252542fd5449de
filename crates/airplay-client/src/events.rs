//! Session status events and sinks.

use std::fmt;

use airplay_core::DeviceId;
use airplay_rtsp::SessionState;
use tokio::sync::mpsc;

/// Reactor-assigned session handle. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A session changed state.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub device: DeviceId,
    pub name: String,
    pub session: SessionId,
    pub state: SessionState,
}

/// Receives status changes. Called on the reactor task, so it must not
/// block.
#[cfg_attr(test, mockall::automock)]
pub trait StatusSink: Send + Sync {
    fn on_status(&self, event: StatusEvent);
}

/// Discards everything.
pub struct NoOpSink;

impl StatusSink for NoOpSink {
    fn on_status(&self, _event: StatusEvent) {}
}

/// Forwards events to a closure.
pub struct CallbackSink<F>
where
    F: Fn(StatusEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(StatusEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> StatusSink for CallbackSink<F>
where
    F: Fn(StatusEvent) + Send + Sync,
{
    fn on_status(&self, event: StatusEvent) {
        (self.callback)(event);
    }
}

/// Publishes events on an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn on_status(&self, event: StatusEvent) {
        // Nobody listening is fine
        let _ = self.tx.send(event);
    }
}
