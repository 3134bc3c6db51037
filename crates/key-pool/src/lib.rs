//! Credential pool and dispatch engine for rate-limited image API keys
//!
//! Each provider key allows 2 requests per minute and 400 per day. The pool
//! spreads load over hundreds of keys, reserves quota atomically per key, and
//! fans multi-image requests out across distinct keys with bounded retries.
//!
//! Request lifecycle:
//! 1. `Engine::generate` splits the request into one subunit per image
//! 2. The selector reserves the least-recently-used eligible key per subunit
//! 3. The dispatcher calls the provider outside any lock and classifies the result
//! 4. 429 → key `Cooling` until its minute window ends, subunit requeued elsewhere
//! 5. 401/403 → key `Invalid` permanently, subunit requeued elsewhere
//! 6. 400/422 → whole request fails, key untouched
//! 7. Every subunit succeeded → images returned in index order

pub mod credential;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod pool;
pub mod selector;

pub use credential::{CredentialId, CredentialState, CredentialStatus};
pub use dispatch::{DispatchAttempt, Dispatcher, Outcome, classify, classify_status};
pub use engine::{Engine, Generation, MAX_BATCH_SIZE, RetryPolicy};
pub use error::{Error, Result};
pub use limiter::{Quota, RateLimiter, Reservation};
pub use pool::{CredentialSnapshot, Pool, PoolConfig, PoolSnapshot};
pub use selector::select_eligible;
