//! Per-credential record
//!
//! Plain data guarded by one mutex per credential. All mutation goes through
//! `Pool` and the rate limiter while that mutex is held; nothing in here
//! decides anything.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use common::Secret;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

/// Positional identifier assigned at load time. Safe to log; the secret is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialId(pub(crate) usize);

impl CredentialId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key-{}", self.0)
    }
}

impl Serialize for CredentialId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Health of a credential.
///
/// Transitions:
/// - Active → Cooling (provider 429, or failure streak reached the threshold)
/// - Active → Exhausted (reservation filled the daily quota)
/// - Active/Cooling/Exhausted → Invalid (provider 401/403, permanent)
/// - Cooling → Active (cooldown elapsed)
/// - Exhausted → Active (day window rolled, or a reservation was released)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Active,
    Cooling { until: Instant },
    Exhausted,
    Invalid,
}

impl CredentialStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Cooling { .. } => "cooling",
            CredentialStatus::Exhausted => "exhausted",
            CredentialStatus::Invalid => "invalid",
        }
    }
}

/// Quota counters and health for one credential.
///
/// Window starts are `None` until the first reservation in that window, so
/// both windows are anchored to first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialState {
    pub status: CredentialStatus,
    pub minute_count: u32,
    pub minute_window_start: Option<Instant>,
    pub day_count: u32,
    pub day_window_start: Option<Instant>,
    pub consecutive_failures: u32,
    pub last_used_at: Option<Instant>,
}

impl Default for CredentialState {
    fn default() -> Self {
        Self {
            status: CredentialStatus::Active,
            minute_count: 0,
            minute_window_start: None,
            day_count: 0,
            day_window_start: None,
            consecutive_failures: 0,
            last_used_at: None,
        }
    }
}

pub(crate) struct Credential {
    id: CredentialId,
    secret: Secret<String>,
    state: Mutex<CredentialState>,
}

impl Credential {
    pub(crate) fn new(id: CredentialId, secret: Secret<String>) -> Self {
        Self {
            id,
            secret,
            state: Mutex::new(CredentialState::default()),
        }
    }

    pub(crate) fn id(&self) -> CredentialId {
        self.id
    }

    pub(crate) fn secret(&self) -> &Secret<String> {
        &self.secret
    }

    /// Lock the state. The guard must never be held across an `.await`.
    ///
    /// Critical sections only touch plain counters, so a poisoned lock still
    /// holds consistent data and is recovered rather than propagated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, CredentialState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
