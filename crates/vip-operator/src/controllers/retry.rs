//! Retry policy with exponential backoff for controller errors
//!
//! Store failures are transient and retried with backoff; malformed
//! services are permanent and wait for the next change.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use kube::runtime::controller::Action;
use tracing::{debug, warn};

use crate::reconciler::VipError;

/// Maximum number of retries before waiting for a change
const MAX_RETRIES: u32 = 10;

/// Base delay for exponential backoff (seconds)
const BASE_DELAY_SECS: u64 = 5;

/// Maximum delay between retries (1 hour)
const MAX_DELAY_SECS: u64 = 3600;

/// Tracks retry attempts per resource UID
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment retry count for a resource and return the new count
    pub fn increment(&self, uid: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = attempts.entry(uid.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Reset retry count after a successful reconciliation
    pub fn reset(&self, uid: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uid);
    }

    /// Forget resources that are no longer live; returns how many were dropped
    pub fn retain_live(&self, live_uids: &HashSet<String>) -> usize {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let before = attempts.len();
        attempts.retain(|uid, _| live_uids.contains(uid));
        before - attempts.len()
    }

    pub fn get(&self, uid: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .copied()
            .unwrap_or(0)
    }
}

/// Error classification for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store or network failures; retried with backoff
    Transient,
    /// The service itself is malformed; retrying will not help
    Permanent,
}

pub fn classify_error(error: &VipError) -> ErrorKind {
    match error {
        VipError::Store(_) => ErrorKind::Transient,
        VipError::MissingField(_) => ErrorKind::Permanent,
        VipError::InvalidVipMode(_) => ErrorKind::Permanent,
    }
}

/// Determine the retry action for an error kind and attempt count
pub fn compute_backoff(attempt: u32, kind: ErrorKind) -> Action {
    match kind {
        ErrorKind::Transient => {
            if attempt >= MAX_RETRIES {
                warn!(
                    attempt,
                    max_retries = MAX_RETRIES,
                    "Max retries exceeded, waiting for resource change"
                );
                Action::await_change()
            } else {
                // 5s, 10s, 20s, 40s, ... up to 1 hour
                let delay_secs =
                    BASE_DELAY_SECS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
                let capped_delay = delay_secs.min(MAX_DELAY_SECS);
                debug!(
                    attempt,
                    delay_secs = capped_delay,
                    "Scheduling retry with exponential backoff"
                );
                Action::requeue(Duration::from_secs(capped_delay))
            }
        }
        ErrorKind::Permanent => {
            warn!("Permanent error, waiting for resource change");
            Action::await_change()
        }
    }
}
