//! Credential pool: ownership, outcome bookkeeping and observability
//!
//! The pool owns every credential for the life of the process. Each
//! credential's state sits behind its own mutex; reservations, refunds and
//! outcome updates all take that lock for a few counter updates and nothing
//! else, so the network round-trip never runs under a lock.
//!
//! Credentials are never added or removed after `Pool::new`. The only
//! one-way transition is to `Invalid`.

use std::collections::HashSet;
use std::time::Duration;

use common::Secret;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::credential::{Credential, CredentialId, CredentialState, CredentialStatus};
use crate::dispatch::Outcome;
use crate::error::{Error, Result};
use crate::limiter::{Quota, RateLimiter, Reservation};

/// Failure streak after which a credential is cooled down.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Cooldown applied once the failure streak reaches the threshold.
pub const DEFAULT_FAILURE_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub quota: Quota,
    pub failure_threshold: u32,
    pub failure_cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            quota: Quota::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_cooldown: DEFAULT_FAILURE_COOLDOWN,
        }
    }
}

/// Redacted view of one credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSnapshot {
    pub id: CredentialId,
    pub status: &'static str,
    pub minute_count: u32,
    pub day_count: u32,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
}

/// Redacted view of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    /// "healthy" (all active), "degraded" (some active) or "unhealthy".
    pub status: &'static str,
    pub total: usize,
    pub active: usize,
    pub cooling: usize,
    pub exhausted: usize,
    pub invalid: usize,
    pub requests_this_minute: u64,
    pub requests_today: u64,
    /// Combined limits of every credential that is not invalid.
    pub minute_capacity: u64,
    pub day_capacity: u64,
    pub credentials: Vec<CredentialSnapshot>,
}

pub struct Pool {
    credentials: Vec<Credential>,
    limiter: RateLimiter,
    failure_threshold: u32,
    failure_cooldown: Duration,
}

impl Pool {
    /// Build the pool from raw secrets, in order. Duplicates are dropped.
    ///
    /// Returns `NoCredentials` if nothing is left.
    pub fn new(secrets: Vec<String>, config: PoolConfig) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut duplicates = 0usize;
        let mut credentials = Vec::with_capacity(secrets.len());

        for secret in secrets {
            if !seen.insert(secret.clone()) {
                duplicates += 1;
                continue;
            }
            let id = CredentialId(credentials.len());
            credentials.push(Credential::new(id, Secret::new(secret)));
        }

        if duplicates > 0 {
            warn!(duplicates, "dropped duplicate credentials");
        }
        if credentials.is_empty() {
            return Err(Error::NoCredentials);
        }

        info!(
            credentials = credentials.len(),
            per_minute = config.quota.per_minute,
            per_day = config.quota.per_day,
            "pool initialized"
        );
        Ok(Self {
            credentials,
            limiter: RateLimiter::new(config.quota),
            failure_threshold: config.failure_threshold.max(1),
            failure_cooldown: config.failure_cooldown,
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub(crate) fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Ids are only minted by this pool, so the index is always in range.
    pub(crate) fn credential(&self, id: CredentialId) -> &Credential {
        &self.credentials[id.0]
    }

    pub(crate) fn secret(&self, id: CredentialId) -> &Secret<String> {
        self.credential(id).secret()
    }

    /// Copy of one credential's current state.
    pub fn state_of(&self, id: CredentialId) -> CredentialState {
        self.credential(id).lock().clone()
    }

    /// Refund a reservation whose call never reached the provider.
    pub fn release(&self, reservation: &Reservation) {
        let mut state = self.credential(reservation.credential).lock();
        self.limiter.release(&mut state, reservation);
    }

    /// Apply the result of one dispatch attempt to its credential.
    pub fn record_outcome(
        &self,
        reservation: &Reservation,
        outcome: Outcome,
        reached_provider: bool,
        now: Instant,
    ) {
        let id = reservation.credential;
        let mut state = self.credential(id).lock();

        match outcome {
            Outcome::Success => {
                state.consecutive_failures = 0;
                state.last_used_at = Some(now);
            }
            Outcome::RateLimited => {
                state.consecutive_failures += 1;
                if state.status != CredentialStatus::Invalid {
                    let until = self.limiter.minute_window_end(&state, now);
                    state.status = CredentialStatus::Cooling { until };
                    info!(
                        credential = %id,
                        cooldown_secs = until.duration_since(now).as_secs(),
                        "credential cooling (rate limited upstream)"
                    );
                }
            }
            Outcome::Invalid => {
                if state.status != CredentialStatus::Invalid {
                    warn!(credential = %id, "credential invalidated permanently");
                }
                state.status = CredentialStatus::Invalid;
                self.limiter.release(&mut state, reservation);
            }
            Outcome::Transient => {
                state.consecutive_failures += 1;
                if !reached_provider {
                    self.limiter.release(&mut state, reservation);
                }
            }
            Outcome::Rejected => {}
        }

        if state.consecutive_failures >= self.failure_threshold
            && matches!(outcome, Outcome::RateLimited | Outcome::Transient)
            && state.status != CredentialStatus::Invalid
        {
            let until = match state.status {
                CredentialStatus::Cooling { until } => until.max(now + self.failure_cooldown),
                _ => now + self.failure_cooldown,
            };
            state.status = CredentialStatus::Cooling { until };
            warn!(
                credential = %id,
                failures = state.consecutive_failures,
                cooldown_secs = self.failure_cooldown.as_secs(),
                "credential cooling (failure streak)"
            );
        }
    }

    /// Earliest instant any credential outside `excluded` could take a
    /// reservation, or `None` if none ever will.
    pub fn next_available_at(
        &self,
        excluded: &HashSet<CredentialId>,
        now: Instant,
    ) -> Option<Instant> {
        self.credentials
            .iter()
            .filter(|c| !excluded.contains(&c.id()))
            .filter_map(|c| self.limiter.next_available_at(&c.lock(), now))
            .min()
    }

    /// Redacted snapshot for health and stats endpoints.
    ///
    /// Rolls elapsed windows first so counts reflect `now`.
    pub fn snapshot(&self, now: Instant) -> PoolSnapshot {
        let quota = *self.limiter.quota();
        let mut snapshot = PoolSnapshot {
            status: "unhealthy",
            total: self.credentials.len(),
            active: 0,
            cooling: 0,
            exhausted: 0,
            invalid: 0,
            requests_this_minute: 0,
            requests_today: 0,
            minute_capacity: 0,
            day_capacity: 0,
            credentials: Vec::with_capacity(self.credentials.len()),
        };

        for credential in &self.credentials {
            let mut state = credential.lock();
            self.limiter.refresh(&mut state, now);

            let mut cooldown_remaining_secs = None;
            match state.status {
                CredentialStatus::Active => snapshot.active += 1,
                CredentialStatus::Cooling { until } => {
                    snapshot.cooling += 1;
                    cooldown_remaining_secs = Some(until.saturating_duration_since(now).as_secs());
                }
                CredentialStatus::Exhausted => snapshot.exhausted += 1,
                CredentialStatus::Invalid => snapshot.invalid += 1,
            }
            if state.status != CredentialStatus::Invalid {
                snapshot.minute_capacity += u64::from(quota.per_minute);
                snapshot.day_capacity += u64::from(quota.per_day);
            }
            snapshot.requests_this_minute += u64::from(state.minute_count);
            snapshot.requests_today += u64::from(state.day_count);
            snapshot.credentials.push(CredentialSnapshot {
                id: credential.id(),
                status: state.status.label(),
                minute_count: state.minute_count,
                day_count: state.day_count,
                consecutive_failures: state.consecutive_failures,
                cooldown_remaining_secs,
            });
        }

        snapshot.status = if snapshot.total > 0 && snapshot.active == snapshot.total {
            "healthy"
        } else if snapshot.active > 0 {
            "degraded"
        } else {
            "unhealthy"
        };
        snapshot
    }

    /// JSON body carried by `Error::PoolExhausted`: status counts only.
    pub(crate) fn exhausted_message(&self, now: Instant) -> String {
        let snapshot = self.snapshot(now);
        serde_json::json!({
            "error": {
                "type": "pool_exhausted",
                "message": "No eligible credential available",
                "pool": {
                    "credentials_total": snapshot.total,
                    "credentials_active": snapshot.active,
                    "credentials_cooling": snapshot.cooling,
                    "credentials_exhausted": snapshot.exhausted,
                    "credentials_invalid": snapshot.invalid
                }
            }
        })
        .to_string()
    }
}
