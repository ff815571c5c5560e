//! Kubernetes Events for VIP assignment audit trail
//!
//! Notifications are best effort: a failed publish is logged and never
//! changes a reconciliation decision.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

/// Event reasons shown in `kubectl get events`
pub mod reasons {
    /// A VIP was written to the service
    pub const VIP_ASSIGNED: &str = "VipAssigned";
    /// The address backing the service's VIP disappeared
    pub const VIP_LOST: &str = "VipLost";
}

/// Action reported on every event
pub const ACTION_RECONCILE: &str = "Reconcile";

/// Emits audit notifications about a Service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, service: &Service, message: &str, warning: bool);
}

/// Notifier publishing Kubernetes Events
pub struct KubeNotifier {
    recorder: Recorder,
}

impl KubeNotifier {
    /// The controller name appears as the reporting component on Events
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl Notifier for KubeNotifier {
    async fn notify(&self, service: &Service, message: &str, warning: bool) {
        let (type_, reason) = if warning {
            (EventType::Warning, reasons::VIP_LOST)
        } else {
            (EventType::Normal, reasons::VIP_ASSIGNED)
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: ACTION_RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self
            .recorder
            .publish(&event, &service.object_ref(&()))
            .await
        {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Notifier that drops everything
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _service: &Service, _message: &str, _warning: bool) {}
}
