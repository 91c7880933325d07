//! In-memory collaborator implementations for tests and examples.
//!
//! These back the engine with plain maps and scripted byte streams so the
//! full playout lifecycle can run without a database, a resolver service or
//! a transcoder process.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::PlayoutError;
use crate::model::{
    Channel, ChannelId, FillerPreset, ItemSource, MediaItem, MediaItemId, MediaReference,
    PlaybackPosition, PlayoutItem,
};
use crate::services::{
    ChunkStream, FillerSource, PositionStore, ScheduleStore, Services, Transcoder, UrlResolver,
    Watchdog,
};

/// Macro to initialize tracing for tests
///
/// Usage:
/// - `init_test_tracing!()` - uses DEBUG level (default)
/// - `init_test_tracing!(INFO)` - uses specified level
#[macro_export]
macro_rules! init_test_tracing {
    () => {
        init_test_tracing!(DEBUG);
    };
    ($level:ident) => {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::$level)
            .with_test_writer()
            .try_init();
    };
}

pub use crate::init_test_tracing;

/// A channel fixture with sane defaults
pub fn test_channel(id: i64) -> Channel {
    Channel {
        id: ChannelId(id),
        number: id as u32,
        name: format!("Channel {id}"),
        enabled: true,
    }
}

/// A schedule entry playing a raw URL for `duration_secs`
pub fn url_item(id: i64, duration_secs: u64) -> PlayoutItem {
    PlayoutItem {
        id,
        source: ItemSource::Url(format!("file:///media/{id}.mkv")),
        duration: Some(Duration::from_secs(duration_secs)),
        media_duration: None,
        filler_kind: None,
    }
}

/// A library media item pointing at a remote URL
pub fn remote_media(id: i64, url: impl Into<String>) -> MediaItem {
    MediaItem {
        id: MediaItemId(id),
        title: format!("Media {id}"),
        duration: Some(Duration::from_secs(120)),
        reference: MediaReference::Remote(url.into()),
    }
}

/// Bundle in-memory collaborators into a [`Services`] value.
///
/// The resolver is a passthrough, filler resolution is empty and the
/// optional capabilities are absent; tests override fields as needed.
pub fn test_services(
    schedule: Arc<MemoryScheduleStore>,
    positions: Arc<MemoryPositionStore>,
    transcoder: Arc<ScriptedTranscoder>,
) -> Services {
    Services {
        schedule,
        positions,
        resolver: Arc::new(PassthroughResolver),
        transcoder,
        filler: Arc::new(NoFiller),
        watchdog: None,
        error_screen: None,
    }
}

#[derive(Default)]
struct ScheduleData {
    channels: HashMap<ChannelId, Channel>,
    items: HashMap<ChannelId, Vec<PlayoutItem>>,
    media: HashMap<MediaItemId, MediaItem>,
    presets: HashMap<ChannelId, FillerPreset>,
}

/// Map-backed [`ScheduleStore`]
#[derive(Default)]
pub struct MemoryScheduleStore {
    data: Mutex<ScheduleData>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(self, channel: Channel) -> Self {
        self.data.lock().channels.insert(channel.id, channel);
        self
    }

    pub fn with_items(self, channel: ChannelId, items: Vec<PlayoutItem>) -> Self {
        self.data.lock().items.insert(channel, items);
        self
    }

    pub fn with_media(self, media: MediaItem) -> Self {
        self.data.lock().media.insert(media.id, media);
        self
    }

    pub fn with_preset(self, channel: ChannelId, preset: FillerPreset) -> Self {
        self.data.lock().presets.insert(channel, preset);
        self
    }

    /// Replace a channel's schedule after construction.
    pub fn set_items(&self, channel: ChannelId, items: Vec<PlayoutItem>) {
        self.data.lock().items.insert(channel, items);
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn channel(&self, id: ChannelId) -> Result<Option<Channel>, PlayoutError> {
        Ok(self.data.lock().channels.get(&id).cloned())
    }

    async fn enabled_channels(&self) -> Result<Vec<Channel>, PlayoutError> {
        let mut channels: Vec<Channel> = self
            .data
            .lock()
            .channels
            .values()
            .filter(|channel| channel.enabled)
            .cloned()
            .collect();
        channels.sort_by_key(|channel| channel.number);
        Ok(channels)
    }

    async fn active_playout_items(
        &self,
        channel: ChannelId,
    ) -> Result<Vec<PlayoutItem>, PlayoutError> {
        Ok(self.data.lock().items.get(&channel).cloned().unwrap_or_default())
    }

    async fn media_item(&self, id: MediaItemId) -> Result<Option<MediaItem>, PlayoutError> {
        Ok(self.data.lock().media.get(&id).cloned())
    }

    async fn filler_preset(
        &self,
        channel: ChannelId,
    ) -> Result<Option<FillerPreset>, PlayoutError> {
        Ok(self.data.lock().presets.get(&channel).cloned())
    }
}

/// Map-backed [`PositionStore`] that records every save
#[derive(Default)]
pub struct MemoryPositionStore {
    positions: Mutex<HashMap<ChannelId, PlaybackPosition>>,
    saves: Mutex<Vec<(ChannelId, PlaybackPosition)>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(self, channel: ChannelId, position: PlaybackPosition) -> Self {
        self.positions.lock().insert(channel, position);
        self
    }

    pub fn position(&self, channel: ChannelId) -> Option<PlaybackPosition> {
        self.positions.lock().get(&channel).cloned()
    }

    /// Every save in order, for asserting persistence behavior.
    pub fn saves(&self) -> Vec<(ChannelId, PlaybackPosition)> {
        self.saves.lock().clone()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn load(&self, channel: ChannelId) -> Result<Option<PlaybackPosition>, PlayoutError> {
        Ok(self.positions.lock().get(&channel).cloned())
    }

    async fn save(
        &self,
        channel: ChannelId,
        position: &PlaybackPosition,
    ) -> Result<(), PlayoutError> {
        self.positions.lock().insert(channel, position.clone());
        self.saves.lock().push((channel, position.clone()));
        Ok(())
    }
}

/// Resolver that maps media references straight to URLs
pub struct PassthroughResolver;

#[async_trait]
impl UrlResolver for PassthroughResolver {
    async fn resolve(
        &self,
        media: &MediaItem,
    ) -> Result<crate::model::ResolvedUrl, PlayoutError> {
        let url = match &media.reference {
            MediaReference::Local(path) => format!("file://{path}"),
            MediaReference::Remote(url) => url.clone(),
            MediaReference::External { kind, key } => format!("{kind}://{key}"),
        };
        Ok(crate::model::ResolvedUrl::plain(url))
    }
}

/// One scripted response of the [`ScriptedTranscoder`]
#[derive(Debug, Clone)]
pub enum TranscodeRun {
    /// Yield these chunks, then end the item normally
    Chunks(Vec<Bytes>),
    /// Fail the `open` call
    Fail(String),
    /// Open a stream that never yields, parking the producer
    Hang,
}

/// Transcoder double driven by a queue of scripted runs.
///
/// Once the script is exhausted, `open` keeps answering with `fallback`
/// (default [`TranscodeRun::Hang`], which keeps the producer parked instead
/// of spinning).
pub struct ScriptedTranscoder {
    script: Mutex<VecDeque<TranscodeRun>>,
    fallback: TranscodeRun,
    opens: AtomicUsize,
    seeks: Mutex<Vec<Duration>>,
    targets: Mutex<Vec<String>>,
}

impl ScriptedTranscoder {
    pub fn new(script: Vec<TranscodeRun>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: TranscodeRun::Hang,
            opens: AtomicUsize::new(0),
            seeks: Mutex::new(Vec::new()),
            targets: Mutex::new(Vec::new()),
        }
    }

    /// A transcoder whose every `open` fails.
    pub fn always_failing() -> Self {
        Self {
            fallback: TranscodeRun::Fail("transcoder unavailable".into()),
            ..Self::new(Vec::new())
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.seeks.lock().clone()
    }

    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().clone()
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn open(
        &self,
        target: &crate::model::ResolvedUrl,
        seek: Duration,
    ) -> Result<ChunkStream, PlayoutError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.seeks.lock().push(seek);
        self.targets.lock().push(target.url.clone());

        let run = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match run {
            TranscodeRun::Fail(message) => Err(PlayoutError::Transcode(message)),
            TranscodeRun::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(
                chunks.into_iter().map(Ok::<_, PlayoutError>),
            ))),
            TranscodeRun::Hang => Ok(Box::pin(futures::stream::pending::<
                Result<Bytes, PlayoutError>,
            >())),
        }
    }
}

/// Filler source with no candidates
pub struct NoFiller;

#[async_trait]
impl FillerSource for NoFiller {
    async fn select_candidate(
        &self,
        _preset: &FillerPreset,
    ) -> Result<Option<MediaItem>, PlayoutError> {
        Ok(None)
    }
}

/// Filler source that always offers the same candidate
pub struct StaticFiller(pub MediaItem);

#[async_trait]
impl FillerSource for StaticFiller {
    async fn select_candidate(
        &self,
        _preset: &FillerPreset,
    ) -> Result<Option<MediaItem>, PlayoutError> {
        Ok(Some(self.0.clone()))
    }
}

/// Watchdog double collecting every report
#[derive(Default)]
pub struct RecordingWatchdog {
    reports: Mutex<Vec<(ChannelId, usize)>>,
}

impl RecordingWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(ChannelId, usize)> {
        self.reports.lock().clone()
    }
}

impl Watchdog for RecordingWatchdog {
    fn report_output(&self, channel: ChannelId, byte_count: usize) {
        self.reports.lock().push((channel, byte_count));
    }
}
