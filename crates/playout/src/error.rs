use crate::model::ChannelId;

// Error taxonomy for the playout engine. Item-level variants (Resolution,
// Transcode) are contained by the playout loop; MaxRestartsExceeded is the
// only terminal condition a channel can surface.
#[derive(Debug, thiserror::Error)]
pub enum PlayoutError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("media url resolution failed: {0}")]
    Resolution(String),

    #[error("transcoder failure: {0}")]
    Transcode(String),

    #[error("no schedule item and no filler available")]
    NoContent,

    #[error("playback position persistence failed: {0}")]
    Persistence(String),

    #[error("channel {0} exceeded its restart budget")]
    MaxRestartsExceeded(ChannelId),
}

impl PlayoutError {
    /// Whether the playout loop may swallow this error and move on to the
    /// next item, as opposed to escalating to the supervisor.
    pub fn is_item_level(&self) -> bool {
        matches!(self, Self::Resolution(_) | Self::Transcode(_))
    }
}
