//! Difficulty target retargeting and block-time helpers.
//!
//! The VM itself never adjusts difficulty; these helpers exist because the
//! block env carries the current target and the retargeting rule must be
//! shared by every component that derives one.

use crate::types::numeric::U256;
use chainvm_derive::BinaryCodec;
use primitive_types::U512;

/// Number of block timestamps in the retargeting window.
pub const DIFFICULTY_WINDOW: usize = 18;

/// Target block interval in milliseconds.
pub const BLOCK_TIME_MS: u64 = 64_000;

/// Maximum single-step adjustment factor, applied symmetrically.
pub const MAX_ADJUST_FACTOR: u64 = 4;

/// Compact difficulty target: larger is easier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BinaryCodec)]
pub struct Target(pub U256);

impl Target {
    /// The easiest possible target.
    pub fn max() -> Target {
        Target(U256::MAX)
    }
}

/// Expected timespan of a full retargeting window in milliseconds.
pub fn expected_window_span_ms() -> u64 {
    (DIFFICULTY_WINDOW as u64 - 1) * BLOCK_TIME_MS
}

/// Scales `current` by the ratio of observed to expected timespan.
///
/// Blocks arriving slower than expected raise the target (easier); faster
/// lowers it. The observed span is clamped to `expected / 4 .. expected * 4`
/// so a single window cannot swing difficulty more than 4x.
pub fn retarget(current: Target, actual_span_ms: u64, expected_span_ms: u64) -> Target {
    debug_assert!(expected_span_ms > 0);
    let clamped = actual_span_ms
        .max(expected_span_ms / MAX_ADJUST_FACTOR)
        .min(expected_span_ms.saturating_mul(MAX_ADJUST_FACTOR));

    // Widen to 512 bits for the intermediate product; the clamp guarantees
    // the final quotient fits back into 256 bits for any current <= MAX / 4.
    let scaled: U512 = current.0.full_mul(U256::from(clamped)) / U512::from(expected_span_ms);
    let capped = scaled.min(U512::from(U256::MAX));
    Target(U256::try_from(capped).unwrap_or(U256::MAX))
}

/// Observed timespan of a timestamp window: newest minus oldest.
///
/// Timestamps arrive in chain order; an out-of-order window saturates to 0
/// rather than underflowing.
pub fn window_span_ms(timestamps: &[u64]) -> u64 {
    match (timestamps.first(), timestamps.last()) {
        (Some(first), Some(last)) => last.saturating_sub(*first),
        _ => 0,
    }
}

/// Median timestamp of a block window.
///
/// Uses the upper median (`sorted[len / 2]`). With duplicated timestamps the
/// duplicate value wins, which the tests pin as the protocol behavior.
pub fn median_block_time(timestamps: &[u64]) -> Option<u64> {
    if timestamps.is_empty() {
        return None;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort();
    Some(sorted[sorted.len() / 2])
}
