//! # airplay-client
//!
//! Multi-room RAOP audio sender.
//!
//! This crate provides:
//! - The sender reactor owning every receiver session
//! - A cloneable handle for controlling it from any task
//! - The volume model and metadata push
//! - Session status events and stream statistics
//!
//! ## Example
//!
//! ```ignore
//! use airplay_client::{ChannelSink, RaopSender};
//! use std::sync::Arc;
//!
//! let (sink, mut status) = ChannelSink::new();
//! let (sender, _task) = RaopSender::spawn(SenderConfig::default(), Arc::new(sink)).await?;
//! let started = sender.start(device, 60, 0).await?;
//! sender.playback_start(0, now_ns + 2_000_000_000)?;
//! sender.write_audio(pcm, 0)?;
//! ```

mod events;
mod handle;
pub mod metadata;
mod sender;
mod session;
mod stats;
pub mod volume;

pub use events::{CallbackSink, ChannelSink, NoOpSink, SessionId, StatusEvent, StatusSink};
pub use handle::SenderHandle;
pub use metadata::{ArtworkFormat, MetadataItem, MetadataQueue, MetadataSource};
pub use sender::{RaopSender, DEFAULT_VOLUME};
pub use stats::{StatsSnapshot, StreamStats};

// Re-export commonly used types
pub use airplay_core::{AudioFormat, Device, DeviceConfig, DeviceId, Error, Result, SenderConfig};
pub use airplay_rtsp::SessionState;
