//! One active replica per provider
//!
//! Competing providers coordinate through Service annotations, but two
//! replicas of the *same* provider would both see themselves as the active
//! provider and race on every write. Replicas therefore share a Lease named
//! after the provider (see [`ProviderConfig::controller_name`]); only the
//! holder runs the controllers.

use std::time::Duration;

use k8s_openapi::api::coordination::v1::Lease;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::{LeaseSettings, ProviderConfig};

/// Consecutive failed renewals before the lease is considered lost
const MAX_RENEWAL_FAILURES: u32 = 3;

/// Why this replica stopped leading its provider
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LeadershipLost {
    #[error("lease {lease} taken over by {holder}")]
    TakenOver { lease: String, holder: String },
    #[error("lease {lease} not renewed after {failures} attempts")]
    RenewalFailed { lease: String, failures: u32 },
}

fn holder_of(lease: Option<&Lease>) -> &str {
    lease
        .and_then(|l| l.spec.as_ref())
        .and_then(|s| s.holder_identity.as_deref())
        .unwrap_or("unknown")
}

/// Result of one renewal attempt
#[derive(Debug, PartialEq, Eq)]
enum Renewal {
    Held,
    Retrying(u32),
    Lost(LeadershipLost),
}

/// Failure count of a lease this replica holds
#[derive(Debug)]
struct RenewalState {
    lease: String,
    failures: u32,
}

impl RenewalState {
    fn new(lease: &str) -> Self {
        Self {
            lease: lease.to_string(),
            failures: 0,
        }
    }

    fn renewed(&mut self, result: &LeaseLockResult) -> Renewal {
        if !result.acquired_lease {
            return Renewal::Lost(LeadershipLost::TakenOver {
                lease: self.lease.clone(),
                holder: holder_of(result.lease.as_ref()).to_string(),
            });
        }
        if self.failures > 0 {
            info!(previous_failures = self.failures, "Lease renewed after failures");
        }
        self.failures = 0;
        Renewal::Held
    }

    fn failed(&mut self) -> Renewal {
        self.failures += 1;
        if self.failures >= MAX_RENEWAL_FAILURES {
            return Renewal::Lost(LeadershipLost::RenewalFailed {
                lease: self.lease.clone(),
                failures: self.failures,
            });
        }
        Renewal::Retrying(self.failures)
    }
}

/// The lease shared by the replicas of one provider
pub struct ProviderLease {
    lock: LeaseLock,
    name: String,
    renew_every: Duration,
}

impl ProviderLease {
    pub fn new(client: Client, config: &ProviderConfig, settings: &LeaseSettings) -> Self {
        let name = config.controller_name();
        let lock = LeaseLock::new(
            client,
            &settings.namespace,
            LeaseLockParams {
                holder_id: settings.holder_id.clone(),
                lease_name: name.clone(),
                lease_ttl: settings.ttl,
            },
        );

        Self {
            lock,
            name,
            renew_every: settings.renew_every,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until this replica leads its provider.
    pub async fn acquire(&self) {
        info!(lease = %self.name, "Waiting for provider leadership");

        loop {
            match self.lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {
                    info!(lease = %self.name, "Provider leadership acquired");
                    return;
                }
                Ok(result) => {
                    debug!(holder = %holder_of(result.lease.as_ref()), "Standing by");
                }
                Err(e) => warn!(lease = %self.name, error = %e, "Failed to check lease"),
            }

            tokio::time::sleep(self.renew_every).await;
        }
    }

    /// Keep renewing the lease; returns once it is lost.
    pub async fn hold(&self) -> LeadershipLost {
        let mut interval = tokio::time::interval(self.renew_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick fires immediately, right after acquire renewed it
        interval.tick().await;

        let mut state = RenewalState::new(&self.name);
        loop {
            interval.tick().await;

            let renewal = match self.lock.try_acquire_or_renew().await {
                Ok(result) => state.renewed(&result),
                Err(e) => {
                    warn!(lease = %self.name, error = %e, "Lease renewal failed");
                    state.failed()
                }
            };

            match renewal {
                Renewal::Held => trace!("Lease renewed"),
                Renewal::Retrying(attempt) => debug!(
                    attempt,
                    max_attempts = MAX_RENEWAL_FAILURES,
                    "Retrying lease renewal"
                ),
                Renewal::Lost(reason) => return reason,
            }
        }
    }

    /// Release the lease so a standby takes over without waiting for expiry
    pub async fn step_down(&self) {
        match self.lock.step_down().await {
            Ok(()) => info!(lease = %self.name, "Released provider lease"),
            Err(e) => warn!(lease = %self.name, error = %e, "Failed to release provider lease"),
        }
    }
}
