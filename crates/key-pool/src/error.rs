//! Error types for pool operations
//!
//! Display strings are safe to show callers: they never contain provider
//! response bodies or credential secrets.

/// Errors from pool setup and generation requests.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("credential rejected by provider")]
    CredentialInvalid,

    #[error("provider rate limit reached")]
    UpstreamRateLimited,

    #[error("provider temporarily unavailable")]
    UpstreamTransient,

    #[error("provider rejected the request parameters")]
    UpstreamRejected,

    /// Carries a JSON summary of pool status counts.
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("gave up after {attempts} attempts (last: {last})")]
    RetryCeilingExceeded { attempts: u32, last: Box<Error> },

    #[error("deadline elapsed with {outstanding} of {total} images outstanding")]
    RequestTimeout { outstanding: usize, total: usize },

    #[error("batch size {0} outside 1..={max}", max = crate::engine::MAX_BATCH_SIZE)]
    InvalidBatchSize(usize),

    #[error("no credentials loaded")]
    NoCredentials,
}

impl Error {
    /// Stable snake_case label for metrics and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::CredentialInvalid => "credential_invalid",
            Error::UpstreamRateLimited => "upstream_rate_limited",
            Error::UpstreamTransient => "upstream_transient",
            Error::UpstreamRejected => "upstream_rejected",
            Error::PoolExhausted(_) => "pool_exhausted",
            Error::RetryCeilingExceeded { .. } => "retry_ceiling_exceeded",
            Error::RequestTimeout { .. } => "request_timeout",
            Error::InvalidBatchSize(_) => "invalid_batch_size",
            Error::NoCredentials => "no_credentials",
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
