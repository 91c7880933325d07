//! # Playout Engine
//!
//! Emulates linear ("live") TV channels: each channel continuously plays
//! its schedule, computing what should be airing right now from wall-clock
//! time, so every viewer sees the same content at the same offset and a
//! restarted process resumes where an uninterrupted one would be.
//!
//! ## Features
//!
//! - Pure wall-clock position resolution with crash-safe resume
//! - Supervised per-channel producer loops with bounded restart backoff
//! - Non-blocking fan-out to independently-paced clients
//! - Weighted filler fallback for empty or exhausted schedules
//! - Keep-alive padding for clients whose producer has gone quiet
//!
//! Persistence, media-URL resolution and transcoding are collaborator
//! processes behind the traits in [`services`].

pub mod config;
pub mod error;
pub mod filler;
pub mod hub;
pub mod manager;
pub mod model;
pub mod position;
pub mod services;
pub mod stream;
pub mod testing;

pub use config::{PlayoutConfig, PlayoutConfigBuilder};
pub use error::PlayoutError;
pub use hub::{BroadcastHub, ClientEvent, ClientHandle, HubStats};
pub use manager::ChannelManager;
pub use model::{
    Channel, ChannelId, FillerEntry, FillerPreset, ItemSource, MediaItem, MediaItemId,
    MediaReference, PlaybackPosition, PlayoutItem, ResolvedUrl,
};
pub use position::{Resolution, ResolveOptions, resolve};
pub use services::{
    ChunkStream, ErrorScreenSource, FillerSource, PositionStore, ScheduleStore, Services,
    Transcoder, UrlResolver, Watchdog,
};
pub use stream::{
    ChannelState, ChannelStatus, ChannelStream, PositionSnapshot, StopReason, SubscriberStream,
};
