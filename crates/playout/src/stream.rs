//! # Channel Stream
//!
//! Owns one channel's complete playout lifecycle: resolving the wall-clock
//! position, running the supervised producer loop that pulls transcoded
//! bytes and fans them out to clients, persisting position after every item
//! transition, and applying bounded exponential backoff when the loop fails.
//!
//! One producer task per channel; any number of subscriber streams, each an
//! independently-paced consumer of the shared broadcast hub.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use tspad::NullPacketGenerator;

use crate::config::PlayoutConfig;
use crate::error::PlayoutError;
use crate::filler;
use crate::hub::{BroadcastHub, ClientEvent, ClientHandle};
use crate::model::{
    Channel, ChannelId, ItemSource, MediaItem, PlaybackPosition, PlayoutItem, ResolvedUrl,
};
use crate::position::{self, Resolution};
use crate::services::{ErrorScreenSource, Services, Watchdog};

/// Byte-chunk stream handed to one subscriber
pub type SubscriberStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Why a channel reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    MaxRestartsExceeded,
}

/// Lifecycle state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Idle,
    Running,
    Restarting,
    /// Terminal until an operator or the health monitor starts the channel
    /// again
    Stopped(StopReason),
}

/// Point-in-time read of a channel's playhead
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSnapshot {
    pub item_index: usize,
    pub anchor: DateTime<Utc>,
    pub item_started_at: DateTime<Utc>,
}

/// Observability surface for one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: ChannelId,
    pub running: bool,
    pub state: ChannelState,
    pub attached_clients: usize,
    pub bytes_streamed: u64,
    pub last_output_at: Option<DateTime<Utc>>,
}

// Mutable playhead/health state, guarded by its own lock so status queries
// never contend with the client set.
struct Playhead {
    anchor: DateTime<Utc>,
    item_index: usize,
    item_started_at: DateTime<Utc>,
    bytes_streamed: u64,
    last_output_at: Option<DateTime<Utc>>,
}

// What the playout loop decided to put on air next.
enum Programme {
    Scheduled {
        item: PlayoutItem,
        item_count: usize,
        index: usize,
    },
    Filler(MediaItem),
}

struct Subscriber {
    handle: ClientHandle,
    padding: NullPacketGenerator,
    silent_reads: u32,
}

impl std::fmt::Debug for ChannelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStream")
            .field("channel", &self.channel.id)
            .finish_non_exhaustive()
    }
}

/// Continuous playout engine for a single channel.
pub struct ChannelStream {
    channel: Channel,
    services: Arc<Services>,
    config: PlayoutConfig,
    hub: Arc<BroadcastHub>,
    playhead: Mutex<Playhead>,
    state: Mutex<ChannelState>,
    shutdown: broadcast::Sender<()>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    // optional capabilities, checked once here instead of per call
    watchdog: Option<Arc<dyn Watchdog>>,
    error_screen: Option<Arc<dyn ErrorScreenSource>>,
}

impl ChannelStream {
    pub fn new(channel: Channel, services: Arc<Services>, config: PlayoutConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let now = Utc::now();
        let watchdog = services.watchdog.clone();
        let error_screen = services.error_screen.clone();
        Self {
            hub: Arc::new(BroadcastHub::new(config.client_queue_capacity)),
            playhead: Mutex::new(Playhead {
                anchor: now,
                item_index: 0,
                item_started_at: now,
                bytes_streamed: 0,
                last_output_at: None,
            }),
            state: Mutex::new(ChannelState::Idle),
            shutdown,
            task: tokio::sync::Mutex::new(None),
            watchdog,
            error_screen,
            channel,
            services,
            config,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Start the producer task. Idempotent: a second call while the channel
    /// is running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<(), PlayoutError> {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!(channel = %self.channel.id, "start ignored, already running");
                return Ok(());
            }
        }

        let initial_seek = self.resolve_and_sync().await?;
        *self.state.lock() = ChannelState::Running;
        let shutdown_rx = self.shutdown.subscribe();
        *task = Some(tokio::spawn(
            Arc::clone(self).supervise(initial_seek, shutdown_rx),
        ));
        info!(
            channel = %self.channel.id,
            name = %self.channel.name,
            "channel started"
        );
        Ok(())
    }

    /// Stop the producer: signal shutdown, wait a bounded grace period (then
    /// abort), persist the final position and end every attached client.
    pub async fn stop(&self) {
        let handle = self.task.lock().await.take();
        let Some(mut handle) = handle else {
            self.hub.end_all();
            return;
        };

        let _ = self.shutdown.send(());
        if !handle.is_finished()
            && tokio::time::timeout(self.config.stop_grace, &mut handle)
                .await
                .is_err()
        {
            warn!(channel = %self.channel.id, "producer did not exit in time, aborting");
            handle.abort();
        }

        let position = {
            let playhead = self.playhead.lock();
            PlaybackPosition {
                anchor: playhead.anchor,
                current_index: playhead.item_index,
                last_played_at: Utc::now(),
            }
        };
        if let Err(err) = self.services.positions.save(self.channel.id, &position).await {
            warn!(channel = %self.channel.id, error = %err, "final position save failed");
        }

        self.hub.end_all();
        *self.state.lock() = ChannelState::Idle;
        info!(channel = %self.channel.id, "channel stopped");
    }

    /// Attach a new client and return its byte-chunk stream.
    ///
    /// Starts the channel if it is not already running. Reads from the
    /// client queue carry a timeout; a quiet producer yields keep-alive
    /// padding instead of silence, and sustained silence ends the stream.
    /// Dropping the stream detaches the client.
    pub async fn subscribe(self: &Arc<Self>) -> Result<SubscriberStream, PlayoutError> {
        // A channel past its restart budget stays down until an operator or
        // the health monitor starts it explicitly; viewers cannot revive it.
        if let ChannelState::Stopped(reason) = *self.state.lock() {
            debug!(channel = %self.channel.id, ?reason, "subscribe refused, channel stopped");
            return Err(PlayoutError::MaxRestartsExceeded(self.channel.id));
        }
        self.start().await?;

        let channel = self.channel.id;
        let read_timeout = self.config.client_read_timeout;
        let max_silent = self.config.max_silent_reads;
        let packets = self.config.keepalive_packets;
        let subscriber = Subscriber {
            handle: self.hub.attach(),
            padding: NullPacketGenerator::new(),
            silent_reads: 0,
        };

        let stream = futures::stream::unfold(subscriber, move |mut sub| async move {
            match tokio::time::timeout(read_timeout, sub.handle.recv()).await {
                Ok(Some(ClientEvent::Chunk(chunk))) => {
                    sub.silent_reads = 0;
                    Some((chunk, sub))
                }
                Ok(Some(ClientEvent::End)) | Ok(None) => {
                    debug!(channel = %channel, client = sub.handle.id(), "stream ended");
                    None
                }
                Err(_) => {
                    sub.silent_reads += 1;
                    if sub.silent_reads >= max_silent {
                        info!(
                            channel = %channel,
                            client = sub.handle.id(),
                            "closing client after sustained producer silence"
                        );
                        None
                    } else {
                        trace!(
                            channel = %channel,
                            client = sub.handle.id(),
                            silent_reads = sub.silent_reads,
                            "producer quiet, sending keep-alive padding"
                        );
                        Some((sub.padding.burst(packets), sub))
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    /// Point-in-time playhead read; never blocks on the producer loop.
    pub fn current_position(&self) -> PositionSnapshot {
        let playhead = self.playhead.lock();
        PositionSnapshot {
            item_index: playhead.item_index,
            anchor: playhead.anchor,
            item_started_at: playhead.item_started_at,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        let state = *self.state.lock();
        let playhead = self.playhead.lock();
        ChannelStatus {
            channel: self.channel.id,
            running: matches!(state, ChannelState::Running | ChannelState::Restarting),
            state,
            attached_clients: self.hub.client_count(),
            bytes_streamed: playhead.bytes_streamed,
            last_output_at: playhead.last_output_at,
        }
    }

    // Supervisory loop: runs the playout loop, and on unhandled failure
    // applies exponential backoff up to the restart budget.
    async fn supervise(self: Arc<Self>, initial_seek: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut restarts: u32 = 0;
        let mut first_seek = Some(initial_seek);

        loop {
            let run = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                result = self.playout_loop(first_seek.take()) => result,
            };
            let err = match run {
                Err(err) => err,
                // the playout loop only returns by failing
                Ok(()) => break,
            };

            restarts += 1;
            if restarts > self.config.max_restarts {
                error!(
                    channel = %self.channel.id,
                    restarts,
                    error = %err,
                    "restart budget exhausted, channel stopped"
                );
                *self.state.lock() = ChannelState::Stopped(StopReason::MaxRestartsExceeded);
                self.hub.end_all();
                return;
            }

            let delay = self.backoff_delay(restarts);
            warn!(
                channel = %self.channel.id,
                restarts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "playout loop failed, restarting after backoff"
            );
            *self.state.lock() = ChannelState::Restarting;
            if self.wait_out_backoff(delay, &mut shutdown).await {
                break;
            }
            *self.state.lock() = ChannelState::Running;
        }

        *self.state.lock() = ChannelState::Idle;
        debug!(channel = %self.channel.id, "supervisor exited");
    }

    fn backoff_delay(&self, restarts: u32) -> Duration {
        let factor = 2u32.saturating_pow(restarts.min(16));
        self.config
            .restart_backoff_base
            .saturating_mul(factor)
            .min(self.config.restart_backoff_cap)
    }

    // Sleep out a restart delay, broadcasting the generated error screen to
    // connected clients when that capability is present. Returns true when
    // interrupted by shutdown.
    async fn wait_out_backoff(&self, delay: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);

        if let Some(screen) = &self.error_screen {
            let message = format!("{} will be right back", self.channel.name);
            match screen.open(&message).await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => return true,
                        _ = &mut deadline => return false,
                        chunk = stream.next() => match chunk {
                            Some(Ok(chunk)) => self.hub.publish(chunk),
                            Some(Err(err)) => {
                                debug!(channel = %self.channel.id, error = %err, "error screen stream failed");
                                break;
                            }
                            None => break,
                        },
                    }
                },
                Err(err) => {
                    debug!(channel = %self.channel.id, error = %err, "error screen unavailable");
                }
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.recv() => true,
            _ = &mut deadline => false,
        }
    }

    // One run of the inner playout loop. Item-level errors are contained
    // here; anything escalating out of this function triggers the
    // supervisory restart policy.
    async fn playout_loop(&self, initial_seek: Option<Duration>) -> Result<(), PlayoutError> {
        // After a restart the wall clock has moved on; rejoin it instead of
        // resuming from the stale in-memory index.
        let mut pending_seek = match initial_seek {
            Some(seek) => seek,
            None => self.resolve_and_sync().await?,
        };
        let mut consecutive_failures: u32 = 0;

        loop {
            let Some(programme) = self.next_programme().await? else {
                debug!(channel = %self.channel.id, "nothing to play, idling");
                tokio::time::sleep(self.config.idle_retry_delay).await;
                continue;
            };

            let advance_over = match &programme {
                Programme::Scheduled {
                    item_count, index, ..
                } => {
                    self.mark_on_air(Some(*index));
                    Some(*item_count)
                }
                Programme::Filler(_) => {
                    self.mark_on_air(None);
                    None
                }
            };

            // the seek offset applies to the first item only
            let seek = std::mem::take(&mut pending_seek);
            match self.play_programme(&programme, seek).await {
                Ok(bytes) => {
                    trace!(channel = %self.channel.id, bytes, "item finished");
                    consecutive_failures = 0;
                    if let Some(item_count) = advance_over {
                        self.advance_and_persist(item_count).await;
                    }
                }
                Err(err) if err.is_item_level() => {
                    consecutive_failures += 1;
                    warn!(
                        channel = %self.channel.id,
                        error = %err,
                        consecutive_failures,
                        "item playback failed, skipping to next"
                    );
                    if consecutive_failures >= self.config.max_consecutive_item_failures {
                        return Err(err);
                    }
                    tokio::time::sleep(self.config.item_error_pause).await;
                    if let Some(item_count) = advance_over {
                        self.advance_and_persist(item_count).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    // Resolve what should be airing right now, persist a fresh anchor when
    // none exists yet, sync the playhead, and return the one-shot seek
    // offset for the first item.
    async fn resolve_and_sync(&self) -> Result<Duration, PlayoutError> {
        let items = self
            .services
            .schedule
            .active_playout_items(self.channel.id)
            .await?;
        let persisted = match self.services.positions.load(self.channel.id).await {
            Ok(position) => position,
            Err(err) => {
                warn!(channel = %self.channel.id, error = %err, "position load failed, starting fresh");
                None
            }
        };

        let now = Utc::now();
        match position::resolve(now, persisted.as_ref(), &items, &self.config.resolve) {
            Resolution::At {
                item_index,
                seek_offset,
            } => {
                let anchor = persisted.map(|p| p.anchor).unwrap_or(now);
                {
                    let mut playhead = self.playhead.lock();
                    playhead.anchor = anchor;
                    playhead.item_index = item_index;
                    playhead.item_started_at = now;
                }
                debug!(
                    channel = %self.channel.id,
                    item_index,
                    seek_secs = seek_offset.as_secs(),
                    "resumed from persisted position"
                );
                Ok(seek_offset)
            }
            Resolution::FreshStart => {
                let position = PlaybackPosition::fresh(now);
                if let Err(err) = self.services.positions.save(self.channel.id, &position).await {
                    warn!(channel = %self.channel.id, error = %err, "failed to persist fresh anchor");
                }
                {
                    let mut playhead = self.playhead.lock();
                    playhead.anchor = now;
                    playhead.item_index = 0;
                    playhead.item_started_at = now;
                }
                info!(channel = %self.channel.id, "first start, fresh anchor persisted");
                Ok(Duration::ZERO)
            }
            Resolution::NoContent => {
                debug!(channel = %self.channel.id, "no scheduled content, filler only");
                Ok(Duration::ZERO)
            }
        }
    }

    // Pick the next thing to put on air: the scheduled item at the playhead
    // index, else a filler candidate, else nothing (idle).
    async fn next_programme(&self) -> Result<Option<Programme>, PlayoutError> {
        let items = self
            .services
            .schedule
            .active_playout_items(self.channel.id)
            .await?;
        if !items.is_empty() {
            let index = self.playhead.lock().item_index % items.len();
            return Ok(Some(Programme::Scheduled {
                item: items[index].clone(),
                item_count: items.len(),
                index,
            }));
        }

        let Some(preset) = self
            .services
            .schedule
            .filler_preset(self.channel.id)
            .await?
        else {
            return Ok(None);
        };
        let media = match filler::pick_weighted(&preset) {
            Some(media_id) => self.services.schedule.media_item(media_id).await?,
            None => self.services.filler.select_candidate(&preset).await?,
        };
        Ok(media.map(Programme::Filler))
    }

    async fn play_programme(
        &self,
        programme: &Programme,
        seek: Duration,
    ) -> Result<u64, PlayoutError> {
        let target = match programme {
            Programme::Scheduled { item, .. } => match &item.source {
                ItemSource::Url(url) => ResolvedUrl::plain(url.clone()),
                ItemSource::Media(media_id) => {
                    let media = self
                        .services
                        .schedule
                        .media_item(*media_id)
                        .await?
                        .ok_or_else(|| {
                            PlayoutError::Resolution(format!("media item {media_id} is missing"))
                        })?;
                    self.services.resolver.resolve(&media).await?
                }
            },
            Programme::Filler(media) => self.services.resolver.resolve(media).await?,
        };
        self.pump(&target, seek).await
    }

    // Pull the transcoded stream for one item and publish every chunk.
    async fn pump(&self, target: &ResolvedUrl, seek: Duration) -> Result<u64, PlayoutError> {
        let mut stream = self.services.transcoder.open(target, seek).await?;
        let mut total: u64 = 0;
        while let Some(next) = stream.next().await {
            let chunk = next?;
            total += chunk.len() as u64;
            {
                let mut playhead = self.playhead.lock();
                playhead.bytes_streamed += chunk.len() as u64;
                playhead.last_output_at = Some(Utc::now());
            }
            if let Some(watchdog) = &self.watchdog {
                watchdog.report_output(self.channel.id, chunk.len());
            }
            self.hub.publish(chunk);
        }
        Ok(total)
    }

    fn mark_on_air(&self, index: Option<usize>) {
        let mut playhead = self.playhead.lock();
        if let Some(index) = index {
            playhead.item_index = index;
        }
        playhead.item_started_at = Utc::now();
    }

    // Advance past the finished item and persist immediately: a crash loses
    // at most the current item's position. Save failures are logged and
    // swallowed (resume is best-effort).
    async fn advance_and_persist(&self, item_count: usize) {
        let position = {
            let mut playhead = self.playhead.lock();
            playhead.item_index = (playhead.item_index + 1) % item_count;
            PlaybackPosition {
                anchor: playhead.anchor,
                current_index: playhead.item_index,
                last_played_at: Utc::now(),
            }
        };
        if let Err(err) = self.services.positions.save(self.channel.id, &position).await {
            warn!(channel = %self.channel.id, error = %err, "position save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_tracing;
    use crate::model::{FillerEntry, FillerPreset, MediaItemId};
    use crate::testing::{
        MemoryPositionStore, MemoryScheduleStore, ScriptedTranscoder, StaticFiller, TranscodeRun,
        remote_media, test_channel, test_services, url_item,
    };

    fn fast_config() -> PlayoutConfig {
        PlayoutConfig::builder()
            .restart_backoff(Duration::from_millis(10), Duration::from_millis(80))
            .item_error_pause(Duration::from_millis(10))
            .idle_retry_delay(Duration::from_millis(10))
            .stop_grace(Duration::from_millis(200))
            .build()
    }

    struct Fixture {
        schedule: Arc<MemoryScheduleStore>,
        positions: Arc<MemoryPositionStore>,
        transcoder: Arc<ScriptedTranscoder>,
    }

    impl Fixture {
        fn new(schedule: MemoryScheduleStore, transcoder: ScriptedTranscoder) -> Self {
            Self {
                schedule: Arc::new(schedule),
                positions: Arc::new(MemoryPositionStore::new()),
                transcoder: Arc::new(transcoder),
            }
        }

        fn with_positions(mut self, positions: MemoryPositionStore) -> Self {
            self.positions = Arc::new(positions);
            self
        }

        fn stream(&self, config: PlayoutConfig) -> Arc<ChannelStream> {
            self.stream_with(config, |services| services)
        }

        fn stream_with(
            &self,
            config: PlayoutConfig,
            customize: impl FnOnce(Services) -> Services,
        ) -> Arc<ChannelStream> {
            let services = customize(test_services(
                Arc::clone(&self.schedule),
                Arc::clone(&self.positions),
                Arc::clone(&self.transcoder),
            ));
            Arc::new(ChannelStream::new(
                test_channel(1),
                Arc::new(services),
                config,
            ))
        }
    }

    async fn wait_for(mut predicate: impl FnMut() -> bool) {
        for _ in 0..500 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn chunk(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 188])
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        init_test_tracing!();
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_items(ChannelId(1), vec![url_item(1, 600)]),
            ScriptedTranscoder::new(vec![]),
        );
        let stream = fixture.stream(fast_config());

        stream.start().await.unwrap();
        let transcoder = Arc::clone(&fixture.transcoder);
        wait_for(move || transcoder.open_count() == 1).await;

        stream.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        // no second producer appeared
        assert_eq!(fixture.transcoder.open_count(), 1);
        assert!(stream.status().running);
        assert_eq!(stream.status().state, ChannelState::Running);

        stream.stop().await;
        assert_eq!(stream.status().state, ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_item_is_skipped_without_a_restart() {
        init_test_tracing!();
        // three items; item 1 fails mid-schedule, the loop must move on
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_items(
                    ChannelId(1),
                    vec![url_item(1, 600), url_item(2, 600), url_item(3, 600)],
                ),
            ScriptedTranscoder::new(vec![
                TranscodeRun::Chunks(vec![chunk(0)]),
                TranscodeRun::Fail("decoder exploded".into()),
                TranscodeRun::Chunks(vec![chunk(2)]),
            ]),
        );
        let stream = fixture.stream(fast_config());
        stream.start().await.unwrap();

        let transcoder = Arc::clone(&fixture.transcoder);
        wait_for(move || transcoder.open_count() >= 4).await;

        // fresh anchor, then one advance per item: 0, 1, 2, wrap to 0
        let indices: Vec<usize> = fixture
            .positions
            .saves()
            .iter()
            .map(|(_, position)| position.current_index)
            .collect();
        assert_eq!(&indices[..4], &[0, 1, 2, 0]);
        // the failure never reached the supervisor
        assert_eq!(stream.status().state, ChannelState::Running);

        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_budget_exhaustion_is_terminal() {
        init_test_tracing!();
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_items(ChannelId(1), vec![url_item(1, 600)]),
            ScriptedTranscoder::always_failing(),
        );
        let config = PlayoutConfig::builder()
            .restart_backoff(Duration::from_millis(10), Duration::from_millis(80))
            .max_restarts(2)
            .max_consecutive_item_failures(1)
            .build();
        let stream = fixture.stream(config);

        let mut subscriber = stream.subscribe().await.unwrap();
        let watched = Arc::clone(&stream);
        wait_for(move || {
            watched.status().state == ChannelState::Stopped(StopReason::MaxRestartsExceeded)
        })
        .await;

        // initial run plus two restarts, then nothing more
        assert_eq!(fixture.transcoder.open_count(), 3);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fixture.transcoder.open_count(), 3);
        assert!(!stream.status().running);

        // attached clients were ended, and new viewers are refused
        assert!(subscriber.next().await.is_none());
        assert!(matches!(
            stream.subscribe().await,
            Err(PlayoutError::MaxRestartsExceeded(ChannelId(1)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_producer_yields_keepalive_then_closes() {
        init_test_tracing!();
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_items(ChannelId(1), vec![url_item(1, 600)]),
            ScriptedTranscoder::new(vec![TranscodeRun::Hang]),
        );
        let config = PlayoutConfig {
            max_silent_reads: 3,
            keepalive_packets: 4,
            ..fast_config()
        };
        let stream = fixture.stream(config);
        let mut subscriber = stream.subscribe().await.unwrap();

        for _ in 0..2 {
            let padding = subscriber.next().await.expect("keep-alive burst");
            assert_eq!(padding.len(), 4 * tspad::TS_PACKET_SIZE);
            tspad::check_packets(&padding).unwrap();
        }
        // third consecutive timeout ends the connection
        assert!(subscriber.next().await.is_none());

        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn seek_offset_is_consumed_exactly_once() {
        init_test_tracing!();
        // anchored 630s ago over [600s, 600s]: resume 30s into item 1
        let anchor = Utc::now() - chrono::Duration::seconds(630);
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_items(ChannelId(1), vec![url_item(1, 600), url_item(2, 600)]),
            ScriptedTranscoder::new(vec![
                TranscodeRun::Chunks(vec![chunk(0)]),
                TranscodeRun::Chunks(vec![chunk(1)]),
            ]),
        )
        .with_positions(MemoryPositionStore::new().with_position(
            ChannelId(1),
            PlaybackPosition {
                anchor,
                current_index: 0,
                last_played_at: anchor,
            },
        ));
        let stream = fixture.stream(fast_config());
        stream.start().await.unwrap();

        let transcoder = Arc::clone(&fixture.transcoder);
        wait_for(move || transcoder.open_count() >= 2).await;

        let seeks = fixture.transcoder.seeks();
        assert!(
            seeks[0] >= Duration::from_secs(29) && seeks[0] < Duration::from_secs(32),
            "expected ~30s seek, got {:?}",
            seeks[0]
        );
        assert_eq!(seeks[1], Duration::ZERO);

        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_start_persists_a_fresh_anchor() {
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_items(ChannelId(1), vec![url_item(1, 600)]),
            ScriptedTranscoder::new(vec![]),
        );
        let stream = fixture.stream(fast_config());

        let before = Utc::now();
        stream.start().await.unwrap();

        let saves = fixture.positions.saves();
        assert_eq!(saves.len(), 1);
        let (channel, position) = &saves[0];
        assert_eq!(*channel, ChannelId(1));
        assert_eq!(position.current_index, 0);
        assert!(position.anchor >= before);

        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_schedule_plays_weighted_filler() {
        init_test_tracing!();
        let preset = FillerPreset {
            id: 1,
            entries: vec![FillerEntry {
                media: MediaItemId(42),
                weight: 3,
            }],
            collection: None,
        };
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_media(remote_media(42, "http://library/filler.ts"))
                .with_preset(ChannelId(1), preset),
            ScriptedTranscoder::new(vec![]),
        );
        let stream = fixture.stream(fast_config());
        stream.start().await.unwrap();

        let transcoder = Arc::clone(&fixture.transcoder);
        wait_for(move || transcoder.open_count() >= 1).await;
        assert_eq!(
            fixture.transcoder.targets()[0],
            "http://library/filler.ts"
        );
        // filler never advances the persisted index
        assert_eq!(fixture.positions.saves().len(), 0);

        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn preset_without_entries_falls_back_to_the_collection() {
        init_test_tracing!();
        let preset = FillerPreset {
            id: 1,
            entries: Vec::new(),
            collection: Some(9),
        };
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_preset(ChannelId(1), preset),
            ScriptedTranscoder::new(vec![]),
        );
        let stream = fixture.stream_with(fast_config(), |mut services| {
            services.filler = Arc::new(StaticFiller(remote_media(
                77,
                "http://library/collection-pick.ts",
            )));
            services
        });
        stream.start().await.unwrap();

        let transcoder = Arc::clone(&fixture.transcoder);
        wait_for(move || transcoder.open_count() >= 1).await;
        assert_eq!(
            fixture.transcoder.targets()[0],
            "http://library/collection-pick.ts"
        );

        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_content_idles_instead_of_failing() {
        init_test_tracing!();
        let fixture = Fixture::new(
            MemoryScheduleStore::new().with_channel(test_channel(1)),
            ScriptedTranscoder::new(vec![]),
        );
        let stream = fixture.stream(fast_config());
        stream.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fixture.transcoder.open_count(), 0);
        assert!(stream.status().running);

        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_sees_every_published_chunk() {
        init_test_tracing!();
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_items(ChannelId(1), vec![url_item(1, 600)]),
            ScriptedTranscoder::new(vec![TranscodeRun::Chunks(vec![chunk(0), chunk(1)])]),
        );
        let watchdog = Arc::new(crate::testing::RecordingWatchdog::new());
        let stream = fixture.stream_with(fast_config(), |mut services| {
            services.watchdog = Some(Arc::clone(&watchdog) as Arc<dyn Watchdog>);
            services
        });
        stream.start().await.unwrap();

        let transcoder = Arc::clone(&fixture.transcoder);
        wait_for(move || transcoder.open_count() >= 2).await;
        let reports = watchdog.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|(id, bytes)| *id == ChannelId(1) && *bytes == 188));
        assert!(stream.status().bytes_streamed >= 376);

        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn current_position_reads_do_not_touch_the_producer() {
        let fixture = Fixture::new(
            MemoryScheduleStore::new()
                .with_channel(test_channel(1))
                .with_items(ChannelId(1), vec![url_item(1, 600), url_item(2, 600)]),
            ScriptedTranscoder::new(vec![]),
        );
        let stream = fixture.stream(fast_config());
        stream.start().await.unwrap();

        let transcoder = Arc::clone(&fixture.transcoder);
        wait_for(move || transcoder.open_count() >= 1).await;
        let snapshot = stream.current_position();
        assert_eq!(snapshot.item_index, 0);
        assert!(snapshot.item_started_at >= snapshot.anchor);

        stream.stop().await;
    }
}
