//! Out-of-band song metadata.
//!
//! An item carries the encoded DMAP tags, optional artwork and the RTP
//! window the song occupies. Each push is three SET_PARAMETER requests:
//! tags, artwork (when present), then progress.

use std::collections::VecDeque;

use airplay_core::error::Result;
use airplay_core::AudioFormat;
use airplay_rtsp::{RequestKind, RtspRequest};
use tracing::debug;

/// Progress delay, in samples, when a stream starts.
pub const STARTUP_DELAY_SAMPLES: u32 = 15360;

/// Progress delay on a song switch; audio from both songs is in flight.
pub const SWITCH_DELAY_SAMPLES: u32 = 2 * STARTUP_DELAY_SAMPLES;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Image formats receivers accept for artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkFormat {
    Png,
    Jpeg,
}

impl ArtworkFormat {
    /// Detect the format from magic bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(PNG_MAGIC) {
            Some(Self::Png)
        } else if data.starts_with(JPEG_MAGIC) {
            Some(Self::Jpeg)
        } else {
            None
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// Where song data comes from.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataSource: Send + Sync {
    /// DMAP-tagged blob for the song.
    fn encode_tags(&self, song_id: u32) -> Result<Vec<u8>>;

    fn song_length_ms(&self, song_id: u32) -> Option<u64>;

    /// Raw image bytes, if the song has artwork.
    fn artwork(&self, song_id: u32) -> Option<Vec<u8>>;
}

/// One song's metadata with its `[start, end)` RTP window.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataItem {
    pub song_id: u32,
    pub tags: Vec<u8>,
    pub artwork: Option<(ArtworkFormat, Vec<u8>)>,
    pub start: u32,
    pub end: u32,
}

impl MetadataItem {
    /// Gather everything for `song_id`, starting at `start_rtptime`.
    /// Artwork in an unknown format is skipped.
    pub fn prepare(
        source: &dyn MetadataSource,
        song_id: u32,
        start_rtptime: u32,
        format: &AudioFormat,
    ) -> Result<Self> {
        let tags = source.encode_tags(song_id)?;
        let length_ms = source.song_length_ms(song_id).unwrap_or(0);
        let end = start_rtptime.wrapping_add(format.ms_to_samples(length_ms) as u32);

        let artwork = source.artwork(song_id).and_then(|data| {
            match ArtworkFormat::detect(&data) {
                Some(format) => Some((format, data)),
                None => {
                    debug!("Song {}: artwork in unknown format, skipped", song_id);
                    None
                }
            }
        });

        Ok(Self {
            song_id,
            tags,
            artwork,
            start: start_rtptime,
            end,
        })
    }

    /// True once `position` has reached the end of the window.
    pub fn is_past(&self, position: u32) -> bool {
        position.wrapping_sub(self.end) as i32 >= 0
    }

    /// The requests that push this item, in send order.
    pub fn requests(&self, url: &str, current: u32, startup: bool) -> Vec<(RequestKind, RtspRequest)> {
        let delay = if startup {
            STARTUP_DELAY_SAMPLES
        } else {
            SWITCH_DELAY_SAMPLES
        };

        let mut requests = vec![(
            RequestKind::Metadata,
            RtspRequest::set_metadata(url, self.start, self.tags.clone()),
        )];
        if let Some((format, image)) = &self.artwork {
            requests.push((
                RequestKind::Artwork,
                RtspRequest::set_artwork(url, self.start, format.content_type(), image.clone()),
            ));
        }
        requests.push((
            RequestKind::Progress,
            RtspRequest::set_progress(
                url,
                self.start,
                self.start.wrapping_sub(delay),
                current,
                self.end,
            ),
        ));
        requests
    }
}

/// Items still relevant to late joiners.
#[derive(Debug, Default)]
pub struct MetadataQueue {
    items: VecDeque<MetadataItem>,
}

impl MetadataQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: MetadataItem) {
        self.items.push_back(item);
    }

    /// Drop items whose window is fully behind `position`.
    pub fn prune(&mut self, position: u32) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.is_past(position));
        before - self.items.len()
    }

    /// Items not yet past `position`, oldest first.
    pub fn pending(&self, position: u32) -> impl Iterator<Item = &MetadataItem> {
        self.items.iter().filter(move |item| !item.is_past(position))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
