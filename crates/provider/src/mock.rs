//! Scripted provider for tests
//!
//! Replies are scripted per API key and consumed in order; once a key's
//! script runs out the default reply is used. Every call is recorded along
//! with the peak number of concurrent calls.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::{ImageProvider, ImageRef, ProviderError, Result, UnitOutput, UnitRequest};

/// Outcome a mock call should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Ok,
    /// 2xx with an empty image list.
    Empty,
    Status(u16),
    Connect,
    Timeout,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub api_key: String,
    pub index: usize,
    pub seed: u64,
}

pub struct MockProvider {
    default_reply: MockReply,
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    delay: Duration,
    calls: Mutex<Vec<MockCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockProvider {
    /// Mock that succeeds immediately for every key.
    pub fn new() -> Self {
        Self {
            default_reply: MockReply::Ok,
            scripts: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Queue replies for one key, consumed one per call.
    pub fn with_replies(self, api_key: &str, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(api_key.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Hold each call open for `delay` (observable under paused tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Highest number of calls that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, api_key: &str) -> MockReply {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(api_key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProvider for MockProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        unit: &'a UnitRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UnitOutput>> + Send + 'a>> {
        Box::pin(async move {
            let now_running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now_running, Ordering::SeqCst);

            self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(MockCall {
                api_key: api_key.to_string(),
                index: unit.index,
                seed: unit.seed,
            });
            let reply = self.next_reply(api_key);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match reply {
                MockReply::Ok => Ok(UnitOutput {
                    images: vec![ImageRef {
                        url: format!("https://images.mock/{}-{}.png", unit.index, unit.seed),
                        width: Some(1024),
                        height: Some(1024),
                    }],
                    seed: Some(unit.seed),
                    inference_time: Some(0.5),
                }),
                MockReply::Empty => Ok(UnitOutput {
                    images: Vec::new(),
                    seed: Some(unit.seed),
                    inference_time: Some(0.5),
                }),
                MockReply::Status(status) => Err(ProviderError::Status {
                    status,
                    body: format!("mock status {status}"),
                }),
                MockReply::Connect => Err(ProviderError::Connect("mock connection refused".into())),
                MockReply::Timeout => Err(ProviderError::Timeout("mock timeout".into())),
            }
        })
    }
}
