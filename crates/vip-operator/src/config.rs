//! Provider configuration from the environment

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use tracing::{info, warn};

use crate::annotations::providers;
use crate::health::DEFAULT_HEALTH_PORT;
use crate::reconciler::VipPolicy;

/// Default periodic resync of every Service (5 minutes)
const DEFAULT_RESYNC_SECS: u64 = 300;

const DEFAULT_LEASE_SECS: u64 = 15;
const DEFAULT_RENEW_SECS: u64 = 5;

/// How replicas of one provider share its lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSettings {
    /// Namespace the lease lives in, normally the operator's own
    pub namespace: String,
    /// This replica's identity on the lease
    pub holder_id: String,
    pub ttl: Duration,
    pub renew_every: Duration,
}

impl LeaseSettings {
    /// # Errors
    ///
    /// Returns an error if a name is blank or the lease would expire before renewal.
    pub fn new(
        namespace: String,
        holder_id: String,
        ttl: Duration,
        renew_every: Duration,
    ) -> Result<Self> {
        ensure!(!namespace.trim().is_empty(), "lease namespace cannot be empty");
        ensure!(!holder_id.trim().is_empty(), "lease holder_id cannot be empty");
        ensure!(
            renew_every < ttl,
            "lease renewal ({:?}) must happen before expiry ({:?})",
            renew_every,
            ttl
        );

        Ok(Self {
            namespace,
            holder_id,
            ttl,
            renew_every,
        })
    }

    /// `None` unless `LEADER_ELECTION_ENABLED` is "true".
    ///
    /// The holder is `POD_NAME`, falling back to `HOSTNAME`, which kubelet
    /// sets to the pod name.
    fn from_env() -> Result<Option<Self>> {
        let enabled = std::env::var("LEADER_ELECTION_ENABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        if !enabled {
            return Ok(None);
        }

        let namespace = std::env::var("POD_NAMESPACE")
            .context("POD_NAMESPACE required when leader election is enabled")?;
        let holder_id = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .context("POD_NAME or HOSTNAME required when leader election is enabled")?;

        let ttl = Duration::from_secs(parse_env(
            "LEADER_ELECTION_LEASE_DURATION",
            DEFAULT_LEASE_SECS,
        ));
        let renew_every = Duration::from_secs(parse_env(
            "LEADER_ELECTION_RENEW_INTERVAL",
            DEFAULT_RENEW_SECS,
        ));

        Self::new(namespace, holder_id, ttl, renew_every).map(Some)
    }
}

/// Settings for one VIP provider process
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    provider_id: String,
    require_opt_in: bool,
    resync_interval: Duration,
    health_port: u16,
    lease: Option<LeaseSettings>,
}

impl ProviderConfig {
    /// # Errors
    ///
    /// Returns an error if `provider_id` is empty or the resync interval is zero.
    pub fn new(
        provider_id: String,
        require_opt_in: bool,
        resync_interval: Duration,
        health_port: u16,
    ) -> Result<Self> {
        ensure!(!provider_id.trim().is_empty(), "provider_id cannot be empty");
        ensure!(
            !resync_interval.is_zero(),
            "resync_interval must be greater than zero"
        );

        Ok(Self {
            provider_id,
            require_opt_in,
            resync_interval,
            health_port,
            lease: None,
        })
    }

    /// Run as one of several replicas sharing this provider's lease
    pub fn with_lease(mut self, lease: LeaseSettings) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VIP_PROVIDER_ID`: provider id written to `vip-active-provider` (required)
    /// - `REQUIRE_TAG`: "true" to only handle services with `req-vip` (default: false)
    /// - `RESYNC_INTERVAL`: periodic resync in seconds (default: 300)
    /// - `HEALTH_PORT`: port of the probe server (default: 8081)
    /// - `LEADER_ELECTION_ENABLED`: "true" to share a lease between replicas (default: false)
    /// - `POD_NAMESPACE`, `POD_NAME`: lease namespace and holder when enabled
    /// - `LEADER_ELECTION_LEASE_DURATION`: lease TTL in seconds (default: 15)
    /// - `LEADER_ELECTION_RENEW_INTERVAL`: renewal interval in seconds (default: 5)
    pub fn from_env() -> Result<Self> {
        let provider_id =
            std::env::var("VIP_PROVIDER_ID").context("VIP_PROVIDER_ID must be set")?;
        if !providers::is_well_known(&provider_id) {
            info!(provider = %provider_id, "Using a custom provider id");
        }

        let require_opt_in = std::env::var("REQUIRE_TAG")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        let resync_interval = Duration::from_secs(parse_env(
            "RESYNC_INTERVAL",
            DEFAULT_RESYNC_SECS,
        ));

        let health_port = parse_env("HEALTH_PORT", DEFAULT_HEALTH_PORT);

        let config = Self::new(provider_id, require_opt_in, resync_interval, health_port)?;
        Ok(match LeaseSettings::from_env()? {
            Some(lease) => config.with_lease(lease),
            None => config,
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn require_opt_in(&self) -> bool {
        self.require_opt_in
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    pub fn health_port(&self) -> u16 {
        self.health_port
    }

    pub fn lease(&self) -> Option<&LeaseSettings> {
        self.lease.as_ref()
    }

    /// Name reported on Events and given to the provider's lease
    pub fn controller_name(&self) -> String {
        format!("{}-vip-operator", self.provider_id)
    }

    /// Reconciliation policy for this provider
    pub fn policy(&self) -> VipPolicy {
        VipPolicy::new(self.provider_id.clone(), self.require_opt_in)
    }
}

/// Parse a numeric environment variable, falling back to the default with a warning
pub(crate) fn parse_env<T>(var_name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
    T::Err: std::fmt::Display,
{
    match std::env::var(var_name) {
        Ok(v) => match v.parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    env_var = var_name,
                    value = %v,
                    error = %e,
                    default = %default,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}
