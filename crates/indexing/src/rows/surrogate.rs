//! Resource surrogate ids.
//!
//! A surrogate id is the resource's last-updated instant, truncated to the
//! millisecond and expressed in 100ns ticks since 0001-01-01, shifted left by
//! [`SHIFT_FACTOR`] bits. The low bits plus the sub-millisecond ticks leave
//! room for [`IDS_PER_MILLISECOND`] distinct ids per millisecond.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Bits reserved below the tick count.
pub const SHIFT_FACTOR: u32 = 3;

/// Ticks between 0001-01-01 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Distinct ids available within one millisecond.
pub const IDS_PER_MILLISECOND: i64 = TICKS_PER_MILLISECOND << SHIFT_FACTOR;

const MAX_TICKS: i64 = i64::MAX >> SHIFT_FACTOR;

/// Returns the first surrogate id of the millisecond containing `last_updated`.
pub fn surrogate_id_from_last_updated(last_updated: DateTime<Utc>) -> i64 {
    let ticks = last_updated
        .timestamp_millis()
        .saturating_mul(TICKS_PER_MILLISECOND)
        .saturating_add(UNIX_EPOCH_TICKS)
        .clamp(0, MAX_TICKS - MAX_TICKS % TICKS_PER_MILLISECOND);
    ticks << SHIFT_FACTOR
}

/// Returns the last-updated instant encoded in a surrogate id.
pub fn last_updated_from_surrogate_id(id: i64) -> Option<DateTime<Utc>> {
    let ticks = id >> SHIFT_FACTOR;
    DateTime::from_timestamp_millis((ticks - UNIX_EPOCH_TICKS).div_euclid(TICKS_PER_MILLISECOND))
}

/// Hands out increasing surrogate ids.
///
/// Ids requested within the same millisecond get consecutive offsets. When a
/// millisecond runs out of offsets the id spills into the next millisecond,
/// so callers should take the last-updated instant from the returned id.
#[derive(Debug, Default)]
pub struct SurrogateIdGenerator {
    last: Mutex<i64>,
}

impl SurrogateIdGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id at or after `now`, with its last-updated instant.
    pub fn next(&self, now: DateTime<Utc>) -> (i64, DateTime<Utc>) {
        let base = surrogate_id_from_last_updated(now);
        let mut last = self.last.lock();
        let id = base.max(last.saturating_add(1));
        *last = id;
        let last_updated = last_updated_from_surrogate_id(id).unwrap_or(now);
        (id, last_updated)
    }
}
