//! Monotonic wall-clock helpers.
//!
//! Cooldown and hot-pool age comparisons use Unix seconds rather than [`std::time::Instant`]
//! so that they can be serialized into events and durable records without a conversion step.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH")
        .as_secs()
}
