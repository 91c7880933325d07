//! # Playout Data Model
//!
//! Entities the engine reads from and writes to its collaborators: channels,
//! schedule items, media references, filler presets, and the one durable
//! record the engine owns — the playback position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity key for a channel and everything hanging off it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity key for a media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaItemId(pub i64);

impl fmt::Display for MediaItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A linear channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// Display number shown to viewers
    pub number: u32,
    pub name: String,
    pub enabled: bool,
}

/// What a schedule entry points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemSource {
    /// Reference to a library media item
    Media(MediaItemId),
    /// Raw source URL, played as-is
    Url(String),
}

/// An ordered entry in a channel's active playout.
///
/// The store returns items already ordered; their start times only establish
/// that sequence and are not re-checked against the wall clock here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayoutItem {
    pub id: i64,
    pub source: ItemSource,
    /// Duration stated on the schedule entry itself
    pub duration: Option<Duration>,
    /// Duration of the underlying media, when the store knows it
    pub media_duration: Option<Duration>,
    /// Tag marking this entry as filler of a given kind
    pub filler_kind: Option<String>,
}

impl PlayoutItem {
    /// Duration used for wall-clock arithmetic: media duration when known,
    /// else the stated duration, else `fallback`.
    pub fn effective_duration(&self, fallback: Duration) -> Duration {
        self.media_duration
            .or(self.duration)
            .unwrap_or(fallback)
    }
}

/// How a media item is located by the external URL resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MediaReference {
    /// Path on local storage
    Local(String),
    /// Direct remote URL
    Remote(String),
    /// Source-type-specific key (e.g. a library or video id)
    External { kind: String, key: String },
}

/// A playable library entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: MediaItemId,
    pub title: String,
    pub duration: Option<Duration>,
    pub reference: MediaReference,
}

/// Durable per-channel playback state.
///
/// This is the only mutable state that survives a restart. It has exactly
/// one writer: the owning channel stream's loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackPosition {
    /// Wall-clock instant the current schedule cycle is measured from
    pub anchor: DateTime<Utc>,
    /// Index of the item currently (or last) playing
    pub current_index: usize,
    pub last_played_at: DateTime<Utc>,
}

impl PlaybackPosition {
    /// Fresh position for a channel starting for the first time.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            anchor: now,
            current_index: 0,
            last_played_at: now,
        }
    }
}

/// A weighted entry in a filler preset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerEntry {
    pub media: MediaItemId,
    pub weight: u32,
}

/// Pool of substitute content for when the schedule has nothing playable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerPreset {
    pub id: i64,
    /// Explicit weighted candidates; may be empty
    pub entries: Vec<FillerEntry>,
    /// Collection to draw from when no explicit entries are configured
    pub collection: Option<i64>,
}

/// Output of the external URL resolver
#[derive(Debug, Clone)]
pub struct ResolvedUrl {
    pub url: String,
    /// Extra request headers the transcoder must send
    pub headers: Vec<(String, String)>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResolvedUrl {
    /// A bare URL with no headers or expiry.
    pub fn plain(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            expires_at: None,
        }
    }
}
