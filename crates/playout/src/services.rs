//! # Collaborator Interfaces
//!
//! The engine talks to the rest of the system through these traits: the
//! persistence layer, the media-URL resolver, the external transcoder, and
//! the optional watchdog / error-screen capabilities. Everything is injected
//! through a single [`Services`] bundle constructed at startup — there is no
//! ambient global state.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PlayoutError;
use crate::model::{
    Channel, ChannelId, FillerPreset, MediaItem, MediaItemId, PlaybackPosition, PlayoutItem,
    ResolvedUrl,
};

/// A type alias for a boxed transcoded byte-chunk stream
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, PlayoutError>> + Send>>;

/// Read access to channels, schedules and the media library
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, PlayoutError>;

    async fn enabled_channels(&self) -> Result<Vec<Channel>, PlayoutError>;

    /// Ordered items of the channel's single active playout
    async fn active_playout_items(
        &self,
        channel: ChannelId,
    ) -> Result<Vec<PlayoutItem>, PlayoutError>;

    async fn media_item(&self, id: MediaItemId) -> Result<Option<MediaItem>, PlayoutError>;

    async fn filler_preset(
        &self,
        channel: ChannelId,
    ) -> Result<Option<FillerPreset>, PlayoutError>;
}

/// Durable playback position per channel.
///
/// The engine is the only writer for a given channel; a save failure is
/// logged and swallowed by callers (resume is best-effort).
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn load(&self, channel: ChannelId) -> Result<Option<PlaybackPosition>, PlayoutError>;

    async fn save(
        &self,
        channel: ChannelId,
        position: &PlaybackPosition,
    ) -> Result<(), PlayoutError>;
}

/// Turns a media item into something the transcoder can open
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, media: &MediaItem) -> Result<ResolvedUrl, PlayoutError>;
}

/// The external transcoding process.
///
/// A returned stream is one-shot: it cannot be restarted mid-stream, a
/// failure requires a fresh `open` call.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn open(&self, target: &ResolvedUrl, seek: Duration) -> Result<ChunkStream, PlayoutError>;
}

/// Resolves a filler candidate from a preset's referenced collection when the
/// preset carries no explicit entries
#[async_trait]
pub trait FillerSource: Send + Sync {
    async fn select_candidate(
        &self,
        preset: &FillerPreset,
    ) -> Result<Option<MediaItem>, PlayoutError>;
}

/// Fire-and-forget output telemetry consumed by the health watchdog
pub trait Watchdog: Send + Sync {
    fn report_output(&self, channel: ChannelId, byte_count: usize);
}

/// Optional capability: a generated "error screen" stream broadcast to
/// connected clients while a channel waits out a restart delay
#[async_trait]
pub trait ErrorScreenSource: Send + Sync {
    async fn open(&self, message: &str) -> Result<ChunkStream, PlayoutError>;
}

/// Collaborator bundle injected into the manager and every channel stream.
///
/// Optional capabilities are `None` when the feature is disabled; presence is
/// checked once at channel construction, not per call.
#[derive(Clone)]
pub struct Services {
    pub schedule: Arc<dyn ScheduleStore>,
    pub positions: Arc<dyn PositionStore>,
    pub resolver: Arc<dyn UrlResolver>,
    pub transcoder: Arc<dyn Transcoder>,
    pub filler: Arc<dyn FillerSource>,
    pub watchdog: Option<Arc<dyn Watchdog>>,
    pub error_screen: Option<Arc<dyn ErrorScreenSource>>,
}
