//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Named timing constants shared by the signaling client and the call
//! controller. These are bit-exact across implementations of this control
//! plane, so they are kept as a single source of truth rather than scattered
//! literals the way `common::units` groups shared measurement types in the
//! teacher crate.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResilienceConstants {
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    pub ws_fallback_consecutive_failures: u32,
    pub pong_miss_threshold: u32,
    pub join_connect_kickstart: Duration,
    pub join_recovery: Duration,
    pub join_hard_timeout: Duration,
    pub offer_timeout: Duration,
    pub ice_restart_cooldown: Duration,
    pub non_host_fallback_delay: Duration,
    pub non_host_fallback_max_attempts: u32,
    pub ice_candidate_buffer_max: usize,
    pub turn_fetch_timeout: Duration,
    pub turn_refresh_trigger_ratio: f64,
    pub reconnect_backoff_base: Duration,
    pub reconnect_backoff_cap: Duration,
}

impl Default for ResilienceConstants {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(PING_INTERVAL_MS),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            ws_fallback_consecutive_failures: WS_FALLBACK_CONSECUTIVE_FAILURES,
            pong_miss_threshold: PONG_MISS_THRESHOLD,
            join_connect_kickstart: Duration::from_millis(JOIN_CONNECT_KICKSTART_MS),
            join_recovery: Duration::from_millis(JOIN_RECOVERY_MS),
            join_hard_timeout: Duration::from_millis(JOIN_HARD_TIMEOUT_MS),
            offer_timeout: Duration::from_millis(OFFER_TIMEOUT_MS),
            ice_restart_cooldown: Duration::from_millis(ICE_RESTART_COOLDOWN_MS),
            non_host_fallback_delay: Duration::from_millis(NON_HOST_FALLBACK_DELAY_MS),
            non_host_fallback_max_attempts: NON_HOST_FALLBACK_MAX_ATTEMPTS,
            ice_candidate_buffer_max: ICE_CANDIDATE_BUFFER_MAX,
            turn_fetch_timeout: Duration::from_millis(TURN_FETCH_TIMEOUT_MS),
            turn_refresh_trigger_ratio: TURN_REFRESH_TRIGGER_RATIO,
            reconnect_backoff_base: Duration::from_millis(RECONNECT_BACKOFF_BASE_MS),
            reconnect_backoff_cap: Duration::from_millis(RECONNECT_BACKOFF_CAP_MS),
        }
    }
}

impl ResilienceConstants {
    /// Exponential backoff: `min(cap, base * 2^(attempt-1))`, `attempt >= 1`.
    pub fn reconnect_backoff(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let scaled = self
            .reconnect_backoff_base
            .as_millis()
            .saturating_mul(1u128 << (attempt - 1).min(32));
        Duration::from_millis(scaled.min(self.reconnect_backoff_cap.as_millis()) as u64)
    }
}

pub const PING_INTERVAL_MS: u64 = 12_000;
pub const CONNECT_TIMEOUT_MS: u64 = 2_000;
pub const WS_FALLBACK_CONSECUTIVE_FAILURES: u32 = 3;
pub const PONG_MISS_THRESHOLD: u32 = 2;
pub const JOIN_CONNECT_KICKSTART_MS: u64 = 1_200;
pub const JOIN_RECOVERY_MS: u64 = 4_000;
pub const JOIN_HARD_TIMEOUT_MS: u64 = 15_000;
pub const OFFER_TIMEOUT_MS: u64 = 8_000;
pub const ICE_RESTART_COOLDOWN_MS: u64 = 10_000;
pub const NON_HOST_FALLBACK_DELAY_MS: u64 = 4_000;
pub const NON_HOST_FALLBACK_MAX_ATTEMPTS: u32 = 2;
pub const ICE_CANDIDATE_BUFFER_MAX: usize = 50;
pub const TURN_FETCH_TIMEOUT_MS: u64 = 2_000;
pub const TURN_REFRESH_TRIGGER_RATIO: f64 = 0.8;
pub const RECONNECT_BACKOFF_BASE_MS: u64 = 500;
pub const RECONNECT_BACKOFF_CAP_MS: u64 = 5_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let c = ResilienceConstants::default();
        assert_eq!(c.reconnect_backoff(1), Duration::from_millis(500));
        assert_eq!(c.reconnect_backoff(2), Duration::from_millis(1000));
        assert_eq!(c.reconnect_backoff(3), Duration::from_millis(2000));
        assert_eq!(c.reconnect_backoff(4), Duration::from_millis(4000));
        assert_eq!(c.reconnect_backoff(5), Duration::from_millis(5000));
        assert_eq!(c.reconnect_backoff(20), Duration::from_millis(5000));
    }
}
