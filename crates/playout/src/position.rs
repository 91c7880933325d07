//! # Wall-Clock Position Resolution
//!
//! Pure computation of "what should be airing right now": given the active
//! playout's items, the persisted anchor time and the current wall clock,
//! determine the item index and the seek offset into it. Every viewer tuning
//! in — and every process restart — lands on the same answer for the same
//! instant.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::model::{PlaybackPosition, PlayoutItem};

/// Tunables for position resolution
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Duration assumed for items whose media and stated durations are both
    /// unknown
    pub fallback_duration: Duration,
    /// Never seek within this many trailing seconds of an item; a seek past
    /// (or too near) end-of-media yields no decodable output from the
    /// transcoder
    pub seek_end_guard: Duration,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            fallback_duration: Duration::from_secs(1800),
            seek_end_guard: Duration::from_secs(10),
        }
    }
}

/// Outcome of resolving a channel's position
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The schedule has no items; the caller falls back to filler
    NoContent,
    /// No anchor has ever been persisted. The caller must persist a fresh
    /// position (anchor = now, index 0) immediately and play from the top.
    FreshStart,
    /// Play `item_index`, seeking `seek_offset` into it
    At {
        item_index: usize,
        seek_offset: Duration,
    },
}

/// Resolve which item should be playing at `now` and how far into it.
///
/// The schedule repeats as a cycle of `total = Σ effective durations`;
/// elapsed time since the anchor, modulo that total, picks the item. When
/// the total is zero there is nothing to divide by and resolution degrades
/// to the persisted raw index with no seek.
pub fn resolve(
    now: DateTime<Utc>,
    position: Option<&PlaybackPosition>,
    items: &[PlayoutItem],
    opts: &ResolveOptions,
) -> Resolution {
    if items.is_empty() {
        return Resolution::NoContent;
    }
    let Some(position) = position else {
        return Resolution::FreshStart;
    };

    let durations: Vec<Duration> = items
        .iter()
        .map(|item| item.effective_duration(opts.fallback_duration))
        .collect();
    let total_ms: u128 = durations.iter().map(|d| d.as_millis()).sum();
    if total_ms == 0 {
        return Resolution::At {
            item_index: position.current_index % items.len(),
            seek_offset: Duration::ZERO,
        };
    }

    // An anchor in the future counts as zero elapsed, not an error.
    let elapsed_ms = (now - position.anchor)
        .to_std()
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let cycle_ms = elapsed_ms % total_ms;

    let mut acc_ms: u128 = 0;
    for (index, duration) in durations.iter().enumerate() {
        let end_ms = acc_ms + duration.as_millis();
        if cycle_ms < end_ms {
            let raw_ms = cycle_ms - acc_ms;
            let max_ms = duration.saturating_sub(opts.seek_end_guard).as_millis();
            return Resolution::At {
                item_index: index,
                seek_offset: Duration::from_millis(raw_ms.min(max_ms) as u64),
            };
        }
        acc_ms = end_ms;
    }

    // The walk overran the accumulated total (schedule changed underneath
    // us); wrap to the top of the cycle.
    Resolution::At {
        item_index: 0,
        seek_offset: Duration::ZERO,
    }
}
