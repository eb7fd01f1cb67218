//! Ephemeral message scheduler: computes expiry and visibility timestamps
//! for disappearing and scheduled messages.
//!
//! This component runs no timers. Expired rows are reclaimed by the storage
//! layer (history reads exclude and purge them); not-yet-due scheduled
//! messages are persisted but withheld from real-time fan-out at creation.

use chrono::{DateTime, Duration, Utc};

/// Compute the instant a disappearing message stops being visible.
/// Deterministic over the supplied `now` so creation and expiry agree on
/// the same clock reading.
pub fn compute_expiry(
    disappear_after_minutes: Option<i64>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    disappear_after_minutes.map(|minutes| now + Duration::minutes(minutes))
}

/// Whether a message should be fanned out live at creation time.
/// True iff it has no scheduled time or the scheduled time has passed.
pub fn is_due_for_live_delivery(scheduled_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match scheduled_at {
        Some(at) => at <= now,
        None => true,
    }
}
