//! # Filler Selection
//!
//! Weighted random choice of substitute content for channels whose schedule
//! has nothing playable. Explicit preset entries are expanded into a pool
//! where each entry appears `weight` times; presets without entries defer to
//! the external collection resolver.

use rand::RngExt;

use crate::model::{FillerPreset, MediaItemId};

/// Pick one entry from the preset's explicit weighted pool.
///
/// Every entry appears `max(weight, 1)` times in the expanded pool, then one
/// slot is chosen uniformly. Returns `None` for an empty pool; the channel
/// stream then falls back to the preset's referenced collection through the
/// external [`FillerSource`](crate::services::FillerSource).
pub fn pick_weighted(preset: &FillerPreset) -> Option<MediaItemId> {
    let pool: Vec<MediaItemId> = preset
        .entries
        .iter()
        .flat_map(|entry| std::iter::repeat_n(entry.media, entry.weight.max(1) as usize))
        .collect();
    if pool.is_empty() {
        return None;
    }
    Some(pool[rand::rng().random_range(0..pool.len())])
}
