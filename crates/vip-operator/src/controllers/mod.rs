//! Kubernetes controllers driving the VIP reconciler

pub mod addresses;
pub mod retry;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use crate::events::Notifier;
use crate::reconciler::VipPolicy;
use crate::store::{AddressStore, ServiceStore};

use self::retry::RetryTracker;

/// Shared state for all controllers
pub struct ControllerContext {
    /// Service reads and writes
    pub services: Arc<dyn ServiceStore>,
    /// IpAddress reads and requests
    pub addresses: Arc<dyn AddressStore>,
    /// Audit events
    pub notifier: Arc<dyn Notifier>,
    /// Provider identity and opt-in rule
    pub policy: VipPolicy,
    /// Periodic resync of every Service
    pub resync_interval: Duration,
    /// Per-service retry counts for backoff
    pub retry_tracker: Arc<RetryTracker>,
}
