//! Fan-out and retry engine
//!
//! Turns one `GenerationRequest` for N images into N unit calls spread across
//! distinct credentials, and returns either all N images in index order or a
//! single terminal error. Each subunit is an explicit state machine:
//!
//! ```text
//! Pending ──select──▶ Dispatched ──▶ Succeeded
//!    ▲                    │
//!    └──── requeue ◀──────┤ (rate limited, transient, invalid credential)
//!                         └──▶ Failed (rejected, retry ceiling)
//! ```
//!
//! Attempts per subunit and idle scheduling passes are both bounded, so the
//! loop always terminates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use provider::{GenerationRequest, ImageProvider, ImageRef, UnitOutput, UnitRequest};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credential::CredentialId;
use crate::dispatch::{DispatchAttempt, Dispatcher, Outcome};
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::selector::select_eligible;

/// Largest batch a single request may ask for.
pub const MAX_BATCH_SIZE: u8 = 10;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per subunit, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive passes that dispatch nothing before giving up.
    pub max_scheduling_passes: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            max_scheduling_passes: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before re-selecting after failed attempt number `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

/// Aggregated result of a fully successful request.
#[derive(Debug, Clone)]
pub struct Generation {
    /// One entry per subunit output, in subunit index order.
    pub images: Vec<ImageRef>,
    pub seed: u64,
    /// Mean per-unit inference time in seconds.
    pub inference_time: f64,
    /// Provider calls made, including retried ones.
    pub attempts: u32,
}

#[derive(Debug)]
enum SubunitState {
    Pending { ready_at: Instant },
    Dispatched { credential: CredentialId },
    Succeeded(UnitOutput),
    Failed,
}

#[derive(Debug)]
struct Subunit {
    unit: UnitRequest,
    state: SubunitState,
    attempts: u32,
    /// Every credential that already failed this subunit.
    excluded: HashSet<CredentialId>,
}

impl Subunit {
    fn is_ready(&self, now: Instant) -> bool {
        matches!(self.state, SubunitState::Pending { ready_at } if ready_at <= now)
    }

    fn dispatched_to(&self) -> Option<CredentialId> {
        match self.state {
            SubunitState::Dispatched { credential } => Some(credential),
            _ => None,
        }
    }
}

/// Drives generation requests against a shared pool.
///
/// Cheap to share: clone the `Arc` it lives in. Concurrent `generate` calls
/// share the pool and the process-wide in-flight ceiling, nothing else.
pub struct Engine {
    pool: Arc<Pool>,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
}

impl Engine {
    pub fn new(
        pool: Arc<Pool>,
        provider: Arc<dyn ImageProvider>,
        max_in_flight: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            dispatcher: Arc::new(Dispatcher::new(provider, max_in_flight)),
            retry,
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Generate every image of `request` or fail the whole request.
    ///
    /// No new attempt starts once `deadline` passes; attempts already in
    /// flight are always awaited so their outcomes reach the pool.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        deadline: Instant,
    ) -> Result<Generation> {
        let result = self.run(request, deadline).await;
        let label = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::counter!("pool_requests_total", "result" => label).increment(1);
        result
    }

    async fn run(&self, request: GenerationRequest, deadline: Instant) -> Result<Generation> {
        if request.batch_size == 0 || request.batch_size > MAX_BATCH_SIZE {
            return Err(Error::InvalidBatchSize(usize::from(request.batch_size)));
        }

        let started = Instant::now();
        let base_seed = request.seed.unwrap_or(0);
        let request = Arc::new(request);
        let total = usize::from(request.batch_size);
        let mut subunits: Vec<Subunit> = (0..total)
            .map(|index| Subunit {
                unit: UnitRequest::new(request.clone(), index),
                state: SubunitState::Pending { ready_at: started },
                attempts: 0,
                excluded: HashSet::new(),
            })
            .collect();

        let mut in_flight: JoinSet<DispatchAttempt> = JoinSet::new();
        let mut tasks: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut failure: Option<Error> = None;
        let mut idle_passes = 0u32;
        let mut calls = 0u32;
        // Permit obtained by waiting, spent on the next ready subunit
        let mut held: Option<OwnedSemaphorePermit> = None;

        loop {
            let now = Instant::now();
            let dispatching = failure.is_none() && now < deadline;
            let mut starved: Vec<usize> = Vec::new();
            let mut throttled = false;

            if dispatching {
                // One credential per in-flight subunit of this request
                let mut busy: HashSet<CredentialId> =
                    subunits.iter().filter_map(Subunit::dispatched_to).collect();

                for (index, subunit) in subunits.iter_mut().enumerate() {
                    if !subunit.is_ready(now) {
                        continue;
                    }
                    // Permit before reservation: a queued call must not sit on
                    // a slot charged to a window it may miss
                    let Some(permit) = held.take().or_else(|| self.dispatcher.try_permit())
                    else {
                        throttled = true;
                        break;
                    };
                    let excluded: HashSet<CredentialId> =
                        subunit.excluded.union(&busy).copied().collect();
                    let Some(reservation) =
                        select_eligible(&self.pool, 1, &excluded, now).pop()
                    else {
                        starved.push(index);
                        continue;
                    };

                    let credential = reservation.credential;
                    subunit.attempts += 1;
                    subunit.state = SubunitState::Dispatched { credential };
                    busy.insert(credential);
                    calls += 1;
                    idle_passes = 0;

                    let pool = self.pool.clone();
                    let dispatcher = self.dispatcher.clone();
                    let unit = subunit.unit.clone();
                    let attempt = subunit.attempts;
                    let handle = in_flight.spawn(async move {
                        dispatcher
                            .attempt(&pool, reservation, permit, &unit, attempt)
                            .await
                    });
                    tasks.insert(handle.id(), index);
                }
            }
            held = None;

            if in_flight.is_empty() {
                if let Some(err) = failure {
                    return Err(err);
                }
                if subunits
                    .iter()
                    .all(|s| matches!(s.state, SubunitState::Succeeded(_)))
                {
                    return Ok(self.assemble(subunits, base_seed, calls, started));
                }

                let now = Instant::now();
                if now >= deadline {
                    let outstanding = subunits
                        .iter()
                        .filter(|s| !matches!(s.state, SubunitState::Succeeded(_)))
                        .count();
                    warn!(outstanding, total, "generation deadline elapsed");
                    return Err(Error::RequestTimeout { outstanding, total });
                }

                if throttled {
                    // Every permit is held by other requests
                    tokio::select! {
                        permit = self.dispatcher.permit() => held = permit,
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                    continue;
                }

                if starved.is_empty() {
                    // Only backoff delays remain
                    let wake = subunits
                        .iter()
                        .filter_map(|s| match s.state {
                            SubunitState::Pending { ready_at } => Some(ready_at),
                            _ => None,
                        })
                        .min()
                        .map_or(deadline, |at| at.min(deadline));
                    tokio::time::sleep_until(wake).await;
                    continue;
                }

                idle_passes += 1;
                let next = starved
                    .iter()
                    .filter_map(|&i| self.pool.next_available_at(&subunits[i].excluded, now))
                    .min();
                match next {
                    Some(at) if at <= deadline && idle_passes <= self.retry.max_scheduling_passes => {
                        debug!(
                            waiting = starved.len(),
                            pass = idle_passes,
                            wait_ms = at.saturating_duration_since(now).as_millis() as u64,
                            "waiting for a credential to free up"
                        );
                        tokio::time::sleep_until(at).await;
                        continue;
                    }
                    _ => {
                        warn!(
                            waiting = starved.len(),
                            passes = idle_passes,
                            "no eligible credential for pending images"
                        );
                        return Err(Error::PoolExhausted(self.pool.exhausted_message(now)));
                    }
                }
            }

            let wake = if dispatching {
                self.next_wake(&subunits, &starved, now)
                    .filter(|at| *at > now && *at < deadline)
            } else {
                None
            };
            let joined = tokio::select! {
                joined = in_flight.join_next_with_id() => joined,
                _ = tokio::time::sleep_until(wake.unwrap_or(deadline)), if wake.is_some() => None,
                permit = self.dispatcher.permit(), if throttled => {
                    held = permit;
                    None
                }
            };

            match joined {
                Some(Ok((id, attempt))) => {
                    tasks.remove(&id);
                    let index = attempt.subunit;
                    self.settle(&mut subunits[index], attempt, &mut failure);
                }
                Some(Err(join_error)) => {
                    // The attempt task panicked; treat it as a transient failure
                    if let Some(index) = tasks.remove(&join_error.id())
                        && let Some(credential) = subunits[index].dispatched_to()
                    {
                        warn!(credential = %credential, subunit = index, "dispatch task failed");
                        let subunit = &mut subunits[index];
                        let attempt = DispatchAttempt {
                            credential,
                            subunit: index,
                            attempt: subunit.attempts,
                            started_at: Instant::now(),
                            latency: Duration::ZERO,
                            outcome: Outcome::Transient,
                            reached_provider: true,
                            output: None,
                        };
                        self.settle(subunit, attempt, &mut failure);
                    }
                }
                None => {}
            }
        }
    }

    /// Earliest instant a waiting subunit might become dispatchable.
    fn next_wake(&self, subunits: &[Subunit], starved: &[usize], now: Instant) -> Option<Instant> {
        let busy: HashSet<CredentialId> =
            subunits.iter().filter_map(Subunit::dispatched_to).collect();
        let backoff = subunits
            .iter()
            .filter_map(|s| match s.state {
                SubunitState::Pending { ready_at } if ready_at > now => Some(ready_at),
                _ => None,
            })
            .min();
        let freed = starved
            .iter()
            .filter_map(|&i| {
                let excluded: HashSet<CredentialId> =
                    subunits[i].excluded.union(&busy).copied().collect();
                self.pool.next_available_at(&excluded, now)
            })
            .min();
        match (backoff, freed) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Apply one finished attempt to its subunit.
    fn settle(&self, subunit: &mut Subunit, attempt: DispatchAttempt, failure: &mut Option<Error>) {
        let now = Instant::now();
        match attempt.outcome {
            Outcome::Success => {
                let mut output = attempt.output.unwrap_or_default();
                if output.inference_time.is_none() {
                    output.inference_time = Some(attempt.latency.as_secs_f64());
                }
                subunit.state = SubunitState::Succeeded(output);
            }
            Outcome::Rejected => {
                subunit.state = SubunitState::Failed;
                failure.get_or_insert(Error::UpstreamRejected);
            }
            Outcome::RateLimited | Outcome::Transient | Outcome::Invalid => {
                subunit.excluded.insert(attempt.credential);
                let last = attempt.outcome.error().unwrap_or(Error::UpstreamTransient);

                if subunit.attempts >= self.retry.max_attempts {
                    warn!(
                        subunit = attempt.subunit,
                        attempts = subunit.attempts,
                        last = %last,
                        "retry ceiling reached"
                    );
                    subunit.state = SubunitState::Failed;
                    failure.get_or_insert(Error::RetryCeilingExceeded {
                        attempts: subunit.attempts,
                        last: Box::new(last),
                    });
                    return;
                }

                // A dead credential says nothing about the next one
                let delay = match attempt.outcome {
                    Outcome::Invalid => Duration::ZERO,
                    _ => self.retry.backoff(subunit.attempts),
                };
                debug!(
                    subunit = attempt.subunit,
                    credential = %attempt.credential,
                    attempt = subunit.attempts,
                    reason = attempt.outcome.label(),
                    delay_ms = delay.as_millis() as u64,
                    "requeueing subunit"
                );
                metrics::counter!("pool_requeues_total", "reason" => attempt.outcome.label())
                    .increment(1);
                subunit.state = SubunitState::Pending {
                    ready_at: now + delay,
                };
            }
        }
    }

    fn assemble(
        &self,
        subunits: Vec<Subunit>,
        seed: u64,
        attempts: u32,
        started: Instant,
    ) -> Generation {
        let outputs: Vec<UnitOutput> = subunits
            .into_iter()
            .filter_map(|s| match s.state {
                SubunitState::Succeeded(output) => Some(output),
                _ => None,
            })
            .collect();

        let inference_time = if outputs.is_empty() {
            0.0
        } else {
            outputs
                .iter()
                .map(|o| o.inference_time.unwrap_or(0.0))
                .sum::<f64>()
                / outputs.len() as f64
        };
        let images: Vec<ImageRef> = outputs.into_iter().flat_map(|o| o.images).collect();

        info!(
            images = images.len(),
            attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation completed"
        );
        Generation {
            images,
            seed,
            inference_time,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialStatus;
    use crate::pool::PoolConfig;
    use provider::{MockProvider, MockReply};

    const DEADLINE: Duration = Duration::from_secs(180);

    fn engine(keys: usize, mock: Arc<MockProvider>) -> Engine {
        let secrets = (0..keys).map(|i| format!("sk-{i}")).collect();
        let pool = Arc::new(Pool::new(secrets, PoolConfig::default()).unwrap());
        Engine::new(pool, mock, 64, RetryPolicy::default())
    }

    fn batch(n: u8) -> GenerationRequest {
        GenerationRequest::new("a red fox in snow")
            .with_batch_size(n)
            .with_seed(100)
    }

    fn deadline() -> Instant {
        Instant::now() + DEADLINE
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_fans_out_across_distinct_credentials() {
        let mock = Arc::new(MockProvider::new().with_delay(Duration::from_secs(1)));
        let engine = engine(3, mock.clone());

        let generation = engine.generate(batch(3), deadline()).await.unwrap();
        assert_eq!(generation.images.len(), 3);
        assert_eq!(generation.attempts, 3);
        assert_eq!(mock.peak_in_flight(), 3);

        let keys: HashSet<String> = mock.calls().into_iter().map(|c| c.api_key).collect();
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_index_order_and_offset_seeds() {
        // Image 0 is throttled on its first key and finishes last
        let mock = Arc::new(MockProvider::new().with_replies("sk-0", [MockReply::Status(429)]));
        let engine = engine(3, mock.clone());

        let generation = engine.generate(batch(3), deadline()).await.unwrap();
        let urls: Vec<&str> = generation.images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://images.mock/0-100.png",
                "https://images.mock/1-101.png",
                "https://images.mock/2-102.png",
            ]
        );
        assert_eq!(generation.seed, 100);
        assert_eq!(generation.attempts, 4);
        assert_eq!(mock.calls().last().map(|c| c.index), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn small_pool_limits_concurrency_and_waits_for_window() {
        let mock = Arc::new(MockProvider::new().with_delay(Duration::from_secs(1)));
        let engine = engine(2, mock.clone());
        let started = Instant::now();

        let generation = engine.generate(batch(5), deadline()).await.unwrap();
        assert_eq!(generation.images.len(), 5);
        assert!(mock.peak_in_flight() <= 2);
        // Four minute slots, so the fifth image waits for a window to roll
        assert!(started.elapsed() >= Duration::from_secs(60));

        for i in 0..2 {
            let state = engine.pool().state_of(CredentialId(i));
            assert!(state.minute_count <= 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_subunit_moves_to_another_credential() {
        let mock = Arc::new(MockProvider::new().with_replies("sk-0", [MockReply::Status(429)]));
        let engine = engine(2, mock.clone());

        let generation = engine.generate(batch(1), deadline()).await.unwrap();
        assert_eq!(generation.images.len(), 1);
        assert_eq!(generation.attempts, 2);

        let keys: Vec<String> = mock.calls().into_iter().map(|c| c.api_key).collect();
        assert_eq!(keys, vec!["sk-0", "sk-1"]);
        assert!(matches!(
            engine.pool().state_of(CredentialId(0)).status,
            CredentialStatus::Cooling { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_with_no_alternative_is_pool_exhausted() {
        let mock = Arc::new(MockProvider::new().with_replies("sk-0", [MockReply::Status(429)]));
        let engine = engine(1, mock.clone());

        let err = engine.generate(batch(1), deadline()).await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted(_)), "got {err:?}");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_subunit_fails_the_whole_batch() {
        let mock = Arc::new(
            MockProvider::new()
                .with_default(MockReply::Status(503))
                .with_replies("sk-0", [MockReply::Ok])
                .with_replies("sk-1", [MockReply::Ok]),
        );
        let engine = engine(5, mock.clone());

        let err = engine.generate(batch(3), deadline()).await.unwrap_err();
        match err {
            Error::RetryCeilingExceeded { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::UpstreamTransient));
            }
            other => panic!("expected RetryCeilingExceeded, got {other:?}"),
        }
        // Two successes plus three attempts for the failing subunit
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_credential_is_never_selected_again() {
        let mock = Arc::new(MockProvider::new().with_replies("sk-0", [MockReply::Status(401)]));
        let engine = engine(2, mock.clone());

        engine.generate(batch(1), deadline()).await.unwrap();
        engine.generate(batch(1), deadline()).await.unwrap();

        let keys: Vec<String> = mock.calls().into_iter().map(|c| c.api_key).collect();
        assert_eq!(keys, vec!["sk-0", "sk-1", "sk-1"]);
        assert_eq!(
            engine.pool().state_of(CredentialId(0)).status,
            CredentialStatus::Invalid
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_dispatch_and_reports_timeout() {
        let mock = Arc::new(MockProvider::new().with_delay(Duration::from_secs(10)));
        let engine = engine(1, mock.clone());

        let err = engine
            .generate(batch(2), Instant::now() + Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::RequestTimeout { outstanding: 1, total: 2 }),
            "got {err:?}"
        );
        // The in-flight attempt was awaited and charged
        assert_eq!(mock.call_count(), 1);
        assert_eq!(engine.pool().state_of(CredentialId(0)).minute_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_request_fails_without_retry() {
        let mock = Arc::new(MockProvider::new().with_default(MockReply::Status(400)));
        let engine = engine(3, mock.clone());

        let err = engine.generate(batch(1), deadline()).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamRejected));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn batch_size_out_of_range_is_refused() {
        let engine = engine(1, Arc::new(MockProvider::new()));
        for n in [0, 11] {
            let err = engine.generate(batch(n), deadline()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidBatchSize(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn requeues_and_outcomes_are_counted() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let mock = Arc::new(MockProvider::new().with_replies("sk-0", [MockReply::Status(429)]));
        let engine = engine(2, mock);
        engine.generate(batch(1), deadline()).await.unwrap();

        let output = handle.render();
        assert!(output.contains("pool_dispatch_attempts_total{outcome=\"rate_limited\"} 1"));
        assert!(output.contains("pool_dispatch_attempts_total{outcome=\"success\"} 1"));
        assert!(output.contains("pool_requeues_total{reason=\"rate_limited\"} 1"));
        assert!(output.contains("pool_requests_total{result=\"success\"} 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_never_overdraw_a_credential() {
        let mock = Arc::new(MockProvider::new().with_delay(Duration::from_millis(200)));
        let engine = Arc::new(engine(4, mock.clone()));

        let mut set = JoinSet::new();
        for _ in 0..4 {
            let engine = engine.clone();
            set.spawn(async move { engine.generate(batch(2), deadline()).await });
        }
        while let Some(result) = set.join_next().await {
            assert_eq!(result.unwrap().unwrap().images.len(), 2);
        }

        for i in 0..4 {
            assert!(engine.pool().state_of(CredentialId(i)).minute_count <= 2);
        }
        assert_eq!(mock.call_count(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_success_is_retried_on_another_credential() {
        let mock = Arc::new(MockProvider::new().with_replies("sk-0", [MockReply::Empty]));
        let engine = engine(2, mock.clone());

        let generation = engine.generate(batch(2), deadline()).await.unwrap();
        assert_eq!(generation.images.len(), 2);
        assert_eq!(generation.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_that_never_returns_images_fails_the_request() {
        let mock = Arc::new(MockProvider::new().with_default(MockReply::Empty));
        let engine = engine(2, mock);

        let err = engine.generate(batch(2), deadline()).await.unwrap_err();
        assert!(
            matches!(err, Error::RetryCeilingExceeded { .. } | Error::PoolExhausted(_)),
            "got {err:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_waits_for_a_call_permit() {
        let mock = Arc::new(MockProvider::new().with_delay(Duration::from_secs(70)));
        let secrets = vec!["sk-0".to_string(), "sk-1".to_string()];
        let pool = Arc::new(Pool::new(secrets, PoolConfig::default()).unwrap());
        let engine = Engine::new(pool, mock.clone(), 1, RetryPolicy::default());
        let t0 = Instant::now();

        let generation = engine.generate(batch(2), deadline()).await.unwrap();
        assert_eq!(generation.images.len(), 2);
        assert_eq!(mock.peak_in_flight(), 1);

        // The second image was charged when its call could actually start
        let first = engine.pool().state_of(CredentialId(0));
        let second = engine.pool().state_of(CredentialId(1));
        assert_eq!(first.day_window_start, Some(t0));
        assert_eq!(second.day_window_start, Some(t0 + Duration::from_secs(70)));
    }
}
