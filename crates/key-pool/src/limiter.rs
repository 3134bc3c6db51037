//! Per-credential quota windows
//!
//! The provider allows `per_minute` requests per minute and `per_day` per day
//! for each key. A reservation is the atomic check-and-increment of both
//! counters; callers hold the credential's mutex for its whole duration, so
//! two selectors can never both take the last free slot.
//!
//! Windows are fixed-length and anchored to the first reservation made after
//! the previous window elapsed.

use std::time::Duration;

use tokio::time::Instant;

use crate::credential::{CredentialId, CredentialState, CredentialStatus};

pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 2;
pub const DEFAULT_REQUESTS_PER_DAY: u32 = 400;
pub const MINUTE: Duration = Duration::from_secs(60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Provider-enforced limits for a single credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub per_minute: u32,
    pub per_day: u32,
    pub minute_window: Duration,
    pub day_window: Duration,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            per_day: DEFAULT_REQUESTS_PER_DAY,
            minute_window: MINUTE,
            day_window: DAY,
        }
    }
}

/// Proof of one charged slot, naming the windows it was charged against.
///
/// Releasing only refunds when those windows are still current, so a late
/// release never eats into a fresh window's count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub credential: CredentialId,
    minute_window: Instant,
    day_window: Instant,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    quota: Quota,
}

impl RateLimiter {
    pub fn new(quota: Quota) -> Self {
        Self { quota }
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Roll elapsed windows and expire Cooling/Exhausted.
    ///
    /// Idempotent; every limiter entry point calls it first.
    pub fn refresh(&self, state: &mut CredentialState, now: Instant) {
        if state
            .minute_window_start
            .is_some_and(|start| now.duration_since(start) >= self.quota.minute_window)
        {
            state.minute_count = 0;
            state.minute_window_start = None;
        }
        if state
            .day_window_start
            .is_some_and(|start| now.duration_since(start) >= self.quota.day_window)
        {
            state.day_count = 0;
            state.day_window_start = None;
        }

        match state.status {
            CredentialStatus::Cooling { until } if now >= until => {
                state.status = CredentialStatus::Active;
            }
            CredentialStatus::Exhausted if state.day_count < self.quota.per_day => {
                state.status = CredentialStatus::Active;
            }
            _ => {}
        }
        // A cooldown can outlast the minute window but not the daily quota
        if state.status == CredentialStatus::Active && state.day_count >= self.quota.per_day {
            state.status = CredentialStatus::Exhausted;
        }
    }

    /// Charge one request against both windows if the credential can take it.
    ///
    /// Returns `None` without touching the counters when the credential is
    /// not Active after refresh, or either window is full.
    pub fn try_reserve(
        &self,
        state: &mut CredentialState,
        credential: CredentialId,
        now: Instant,
    ) -> Option<Reservation> {
        self.refresh(state, now);

        if state.status != CredentialStatus::Active
            || state.minute_count >= self.quota.per_minute
            || state.day_count >= self.quota.per_day
        {
            return None;
        }

        let minute_window = *state.minute_window_start.get_or_insert(now);
        let day_window = *state.day_window_start.get_or_insert(now);
        state.minute_count += 1;
        state.day_count += 1;
        state.last_used_at = Some(now);

        if state.day_count >= self.quota.per_day {
            state.status = CredentialStatus::Exhausted;
        }

        Some(Reservation {
            credential,
            minute_window,
            day_window,
        })
    }

    /// Refund a reservation for a call that never consumed provider quota.
    ///
    /// Returns whether the minute slot was refunded (false when the window
    /// already rolled over).
    pub fn release(&self, state: &mut CredentialState, reservation: &Reservation) -> bool {
        let mut refunded = false;
        if state.minute_window_start == Some(reservation.minute_window) && state.minute_count > 0 {
            state.minute_count -= 1;
            refunded = true;
        }
        if state.day_window_start == Some(reservation.day_window) && state.day_count > 0 {
            state.day_count -= 1;
            if state.status == CredentialStatus::Exhausted && state.day_count < self.quota.per_day {
                state.status = CredentialStatus::Active;
            }
        }
        refunded
    }

    /// Earliest instant the credential could take a reservation, or `None`
    /// if it never will (Invalid). Returns `now` when it is eligible now.
    pub fn next_available_at(&self, state: &CredentialState, now: Instant) -> Option<Instant> {
        let mut state = state.clone();
        self.refresh(&mut state, now);

        let mut at = now;
        match state.status {
            CredentialStatus::Invalid => return None,
            CredentialStatus::Cooling { until } => at = at.max(until),
            CredentialStatus::Active | CredentialStatus::Exhausted => {}
        }
        if state.day_count >= self.quota.per_day
            && let Some(start) = state.day_window_start
        {
            at = at.max(start + self.quota.day_window);
        }
        if state.minute_count >= self.quota.per_minute
            && let Some(start) = state.minute_window_start
        {
            at = at.max(start + self.quota.minute_window);
        }
        Some(at)
    }

    /// End of the current minute window, or a full window from `now` if no
    /// window is open or it already elapsed.
    pub fn minute_window_end(&self, state: &CredentialState, now: Instant) -> Instant {
        state
            .minute_window_start
            .map(|start| start + self.quota.minute_window)
            .filter(|end| *end > now)
            .unwrap_or(now + self.quota.minute_window)
    }
}
