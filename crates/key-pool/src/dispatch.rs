//! Single-attempt dispatch and outcome classification
//!
//! The dispatcher runs one provider call for one subunit on one reserved
//! credential, classifies what came back, and reports it to the pool so the
//! credential's counters and health are updated. The network call holds only
//! a process-wide concurrency permit, never a credential lock.

use std::sync::Arc;
use std::time::Duration;

use provider::{ImageProvider, ProviderError, UnitOutput, UnitRequest};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credential::CredentialId;
use crate::error::Error;
use crate::limiter::Reservation;
use crate::pool::Pool;

/// How one attempt ended, from the credential's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// 429: this credential is throttled upstream.
    RateLimited,
    /// 401/403: the credential itself is rejected.
    Invalid,
    /// 5xx, timeouts and transport failures.
    Transient,
    /// The request content is at fault; not the credential's problem.
    Rejected,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::RateLimited => "rate_limited",
            Outcome::Invalid => "invalid",
            Outcome::Transient => "transient",
            Outcome::Rejected => "rejected",
        }
    }

    /// The caller-facing error for a failed outcome.
    pub fn error(&self) -> Option<Error> {
        match self {
            Outcome::Success => None,
            Outcome::RateLimited => Some(Error::UpstreamRateLimited),
            Outcome::Invalid => Some(Error::CredentialInvalid),
            Outcome::Transient => Some(Error::UpstreamTransient),
            Outcome::Rejected => Some(Error::UpstreamRejected),
        }
    }
}

/// Classify an upstream HTTP status.
///
/// 429 is a per-credential rate limit, 401/403 a dead credential, 400/422 a
/// malformed request. Everything else (408, 5xx, unknown) is retryable.
pub fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        429 => Outcome::RateLimited,
        401 | 403 => Outcome::Invalid,
        400 | 422 => Outcome::Rejected,
        _ => Outcome::Transient,
    }
}

/// Classify the result of a provider call.
///
/// A 2xx reply that carries no image cannot fill its subunit, so it is
/// retried like any other transient failure.
pub fn classify(result: &Result<UnitOutput, ProviderError>) -> Outcome {
    match result {
        Ok(output) if output.images.is_empty() => Outcome::Transient,
        Ok(_) => Outcome::Success,
        Err(ProviderError::Status { status, .. }) => classify_status(*status),
        Err(
            ProviderError::Connect(_)
            | ProviderError::Timeout(_)
            | ProviderError::Transport(_)
            | ProviderError::Decode(_),
        ) => Outcome::Transient,
    }
}

/// Record of one (subunit, credential) attempt. Never persisted.
#[derive(Debug)]
pub struct DispatchAttempt {
    pub credential: CredentialId,
    pub subunit: usize,
    /// 1-based attempt number for this subunit.
    pub attempt: u32,
    pub started_at: Instant,
    pub latency: Duration,
    pub outcome: Outcome,
    /// False only when the call provably never left this process.
    pub reached_provider: bool,
    pub output: Option<UnitOutput>,
}

/// Runs provider calls under a process-wide concurrency ceiling.
pub struct Dispatcher {
    provider: Arc<dyn ImageProvider>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn ImageProvider>, max_in_flight: usize) -> Self {
        Self {
            provider,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Take a call permit if one is free right now.
    pub(crate) fn try_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }

    /// Wait for a call permit. The semaphore is never closed, so this only
    /// returns `None` if that ever changes.
    pub(crate) async fn permit(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }

    /// Execute one attempt on a reserved credential and apply its outcome.
    ///
    /// The permit is taken before the reservation, so the call goes out in
    /// the window it was charged to.
    pub async fn attempt(
        &self,
        pool: &Pool,
        reservation: Reservation,
        _permit: OwnedSemaphorePermit,
        unit: &UnitRequest,
        attempt: u32,
    ) -> DispatchAttempt {
        let credential = reservation.credential;
        let started_at = Instant::now();
        let result = self
            .provider
            .generate(pool.secret(credential).expose(), unit)
            .await;
        let latency = started_at.elapsed();

        let outcome = classify(&result);
        let reached_provider = match &result {
            Ok(_) => true,
            Err(e) => e.reached_provider(),
        };

        match &result {
            Ok(output) if output.images.is_empty() => warn!(
                credential = %credential,
                subunit = unit.index,
                attempt,
                provider = self.provider.id(),
                "provider answered without images"
            ),
            Ok(_) => debug!(
                credential = %credential,
                subunit = unit.index,
                attempt,
                latency_ms = latency.as_millis() as u64,
                "dispatch succeeded"
            ),
            Err(e) if outcome == Outcome::Invalid => warn!(
                credential = %credential,
                subunit = unit.index,
                attempt,
                error = %e,
                "credential rejected by provider"
            ),
            Err(e) => info!(
                credential = %credential,
                subunit = unit.index,
                attempt,
                outcome = outcome.label(),
                provider = self.provider.id(),
                error = %e,
                "dispatch failed"
            ),
        }
        metrics::counter!("pool_dispatch_attempts_total", "outcome" => outcome.label())
            .increment(1);

        pool.record_outcome(&reservation, outcome, reached_provider, Instant::now());

        DispatchAttempt {
            credential,
            subunit: unit.index,
            attempt,
            started_at,
            latency,
            outcome,
            reached_provider,
            output: result.ok(),
        }
    }
}
