//! Inbound frame limiting
//!
//! A well-behaved client produces one action packet per tick plus the odd
//! ping, so the per-connection frame quota follows the match's broadcast
//! cadence instead of a fixed global rate. The admission layer still
//! enforces one *action* per tick; this only shields the JSON decoder
//! from frame spam on fast-tick servers.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

/// Frames tolerated per tick: the action itself, a ping, and retries
const FRAMES_PER_TICK: u32 = 4;

/// Floor for slow-tick servers, so control traffic is never starved
const MIN_FRAMES_PER_SECOND: u32 = 16;

/// Sustained frames per second a connection may send for this cadence
fn frame_quota(broadcast_interval: Duration) -> u32 {
    let interval_ms = broadcast_interval.as_millis().max(1) as u64;
    let ticks_per_second = (1000 / interval_ms).max(1) as u32;
    ticks_per_second
        .saturating_mul(FRAMES_PER_TICK)
        .max(MIN_FRAMES_PER_SECOND)
}

/// Per-connection rate limiter over inbound text frames
pub struct ConnectionRateLimiter {
    frame_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ConnectionRateLimiter {
    /// Build a limiter sized for the given broadcast cadence. The burst
    /// allowance equals one second of quota, covering a client that
    /// batches a few ticks' worth of replies after a network stall.
    pub fn for_interval(broadcast_interval: Duration) -> Self {
        let per_second =
            NonZeroU32::new(frame_quota(broadcast_interval)).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(per_second);
        Self {
            frame_limiter: RateLimiter::direct(quota),
        }
    }

    /// Check if an inbound frame is allowed (returns true if allowed)
    pub fn check_frame(&self) -> bool {
        self.frame_limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_follows_the_tick_cadence() {
        assert_eq!(frame_quota(Duration::from_millis(100)), 40);
        assert_eq!(frame_quota(Duration::from_millis(50)), 80);
        // Slow servers keep the control-traffic floor
        assert_eq!(frame_quota(Duration::from_secs(1)), MIN_FRAMES_PER_SECOND);
        assert_eq!(frame_quota(Duration::from_secs(10)), MIN_FRAMES_PER_SECOND);
    }

    #[test]
    fn limiter_passes_normal_traffic_and_stops_floods() {
        let limiter = ConnectionRateLimiter::for_interval(Duration::from_millis(100));
        let allowed = (0..1000).filter(|_| limiter.check_frame()).count();
        assert!(allowed >= 1, "legitimate frames must pass");
        assert!(allowed < 1000, "a flood must be cut off");
    }
}
