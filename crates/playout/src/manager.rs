//! # Channel Manager
//!
//! Registry of channel streams, created lazily on first use. Starting the
//! manager does not start any channel — a channel spins up when its first
//! viewer subscribes, or ahead of demand via `prewarm`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::config::PlayoutConfig;
use crate::error::PlayoutError;
use crate::model::ChannelId;
use crate::services::Services;
use crate::stream::{ChannelStatus, ChannelStream, SubscriberStream};

/// Registry and lifecycle control for all channel streams
pub struct ChannelManager {
    services: Arc<Services>,
    config: PlayoutConfig,
    channels: Mutex<HashMap<ChannelId, Arc<ChannelStream>>>,
    ready: AtomicBool,
}

impl ChannelManager {
    pub fn new(services: Arc<Services>, config: PlayoutConfig) -> Self {
        Self {
            services,
            config,
            channels: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the manager ready. Channels stay lazy.
    pub fn start(&self) {
        self.ready.store(true, Ordering::SeqCst);
        info!("channel manager ready");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Stop and remove every managed channel stream.
    pub async fn stop(&self) {
        let drained: Vec<Arc<ChannelStream>> = {
            let mut channels = self.channels.lock();
            channels.drain().map(|(_, stream)| stream).collect()
        };
        for stream in &drained {
            stream.stop().await;
        }
        self.ready.store(false, Ordering::SeqCst);
        info!(stopped = drained.len(), "channel manager stopped");
    }

    /// Look up the stream for `id`, creating it on first use.
    pub async fn channel_stream(&self, id: ChannelId) -> Result<Arc<ChannelStream>, PlayoutError> {
        if let Some(existing) = self.channels.lock().get(&id) {
            return Ok(Arc::clone(existing));
        }

        let channel = self
            .services
            .schedule
            .channel(id)
            .await?
            .ok_or_else(|| PlayoutError::Configuration(format!("unknown channel {id}")))?;
        let created = Arc::new(ChannelStream::new(
            channel,
            Arc::clone(&self.services),
            self.config.clone(),
        ));

        let mut channels = self.channels.lock();
        Ok(Arc::clone(channels.entry(id).or_insert(created)))
    }

    /// Attach a viewer to `id`, starting the channel when needed.
    pub async fn subscribe(&self, id: ChannelId) -> Result<SubscriberStream, PlayoutError> {
        self.channel_stream(id).await?.subscribe().await
    }

    /// Start streams ahead of client demand, eliminating first-viewer
    /// cold-start latency.
    ///
    /// With `ids = None` every enabled channel is warmed. One channel's
    /// failure never aborts the batch; the outcome map carries the
    /// per-channel results.
    pub async fn prewarm(
        &self,
        ids: Option<&[ChannelId]>,
    ) -> Result<HashMap<ChannelId, Result<(), PlayoutError>>, PlayoutError> {
        let targets: Vec<ChannelId> = match ids {
            Some(ids) => ids.to_vec(),
            None => self
                .services
                .schedule
                .enabled_channels()
                .await?
                .into_iter()
                .map(|channel| channel.id)
                .collect(),
        };

        let mut results = HashMap::new();
        for id in targets {
            let outcome = match self.channel_stream(id).await {
                Ok(stream) => stream.start().await,
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome {
                warn!(channel = %id, error = %err, "prewarm failed");
            }
            results.insert(id, outcome);
        }
        info!(
            warmed = results.values().filter(|r| r.is_ok()).count(),
            failed = results.values().filter(|r| r.is_err()).count(),
            "prewarm finished"
        );
        Ok(results)
    }

    /// Explicit start, used by the health monitor to force a restart.
    pub async fn start_channel(&self, id: ChannelId) -> Result<(), PlayoutError> {
        self.channel_stream(id).await?.start().await
    }

    /// Explicit stop. A channel that was never created is a no-op.
    pub async fn stop_channel(&self, id: ChannelId) {
        let stream = self.channels.lock().get(&id).cloned();
        match stream {
            Some(stream) => stream.stop().await,
            None => debug!(channel = %id, "stop for unmanaged channel ignored"),
        }
    }

    /// Status of every channel currently running.
    pub fn active_channels(&self) -> Vec<ChannelStatus> {
        self.channels
            .lock()
            .values()
            .map(|stream| stream.status())
            .filter(|status| status.running)
            .collect()
    }

    pub fn channel_status(&self, id: ChannelId) -> Option<ChannelStatus> {
        self.channels.lock().get(&id).map(|stream| stream.status())
    }
}
