//! VIP reconciliation state machine
//!
//! [`ensure_vip`] decides, from the current Service and its IpAddress, what
//! single step (if any) moves the service closer to carrying a confirmed
//! VIP. All state lives in the two resources; nothing is remembered between
//! calls, so the function can be re-run any number of times with stale or
//! duplicate inputs.
//!
//! ## Steps
//!
//! Evaluated in order, first match wins:
//!
//! 1. not a `NodePort` service: skip
//! 2. opt-in required and no `req-vip`: skip
//! 3. another provider was requested via `vip-provider`: skip
//! 4. another provider already claimed the service: skip
//! 5. unclaimed: claim it and stop, so the claim is persisted before any
//!    address work starts
//! 6. look up the IpAddress
//! 7. no VIP yet: request an address, wait for IPAM, or store the resolved one
//! 8. VIP set: clear it if the address vanished, replace it if it changed,
//!    otherwise continue unchanged

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::annotations;
use crate::events::Notifier;
use crate::request::request_address;
use crate::store::{AddressStore, StoreError};

#[derive(Debug, Error)]
pub enum VipError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid VIP mode: {0}")]
    InvalidVipMode(String),
}

/// Who is reconciling and under which rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VipPolicy {
    /// This provider's id, compared against `vip-provider` and `vip-active-provider`
    pub provider_id: String,
    /// Only act on services carrying `req-vip`
    pub require_opt_in: bool,
}

impl VipPolicy {
    pub fn new(provider_id: impl Into<String>, require_opt_in: bool) -> Self {
        Self {
            provider_id: provider_id.into(),
            require_opt_in,
        }
    }
}

/// Outcome of one reconciliation pass
///
/// When `changed` is set, `service` holds the copy the caller must persist.
/// `proceed` is only true when the returned service carries a confirmed VIP
/// that the provider may use.
#[derive(Debug, Clone, PartialEq)]
pub struct VipDecision {
    pub proceed: bool,
    pub changed: bool,
    pub service: Option<Service>,
}

impl VipDecision {
    /// Nothing to do now; wait for the next trigger
    pub fn stop() -> Self {
        Self {
            proceed: false,
            changed: false,
            service: None,
        }
    }

    fn stop_with(service: Service) -> Self {
        Self {
            proceed: false,
            changed: true,
            service: Some(service),
        }
    }

    fn proceed_with(service: Service, changed: bool) -> Self {
        Self {
            proceed: true,
            changed,
            service: Some(service),
        }
    }

    /// The VIP the caller may use, if the decision allows proceeding
    pub fn vip(&self) -> Option<&str> {
        if !self.proceed {
            return None;
        }
        self.service
            .as_ref()
            .map(|s| annotations::get(s, annotations::ASSIGNED_VIP))
            .filter(|v| !v.is_empty())
    }
}

/// Check that the service carries a valid VIP and work towards it if not.
///
/// The input service is never modified; use the service in the returned
/// decision for anything that follows.
#[instrument(skip_all, fields(
    namespace = %service.metadata.namespace.as_deref().unwrap_or("default"),
    name = %service.metadata.name.as_deref().unwrap_or("unknown"),
    provider = %policy.provider_id,
))]
pub async fn ensure_vip<A, N>(
    service: &Service,
    addresses: &A,
    notifier: &N,
    policy: &VipPolicy,
) -> Result<VipDecision, VipError>
where
    A: AddressStore + ?Sized,
    N: Notifier + ?Sized,
{
    if !annotations::is_load_balanced(service) {
        debug!("Skipping: not a {} service", annotations::LOAD_BALANCED_TYPE);
        return Ok(VipDecision::stop());
    }

    if policy.require_opt_in && annotations::get(service, annotations::REQ_VIP).is_empty() {
        debug!("Skipping: opt-in required and service does not request a VIP");
        return Ok(VipDecision::stop());
    }

    let requested = annotations::get(service, annotations::VIP_PROVIDER);
    if !requested.is_empty() && requested != policy.provider_id {
        debug!(requested = %requested, "Skipping: service requests another provider");
        return Ok(VipDecision::stop());
    }

    let active = annotations::get(service, annotations::VIP_ACTIVE_PROVIDER);
    if !active.is_empty() && active != policy.provider_id {
        debug!(active = %active, "Skipping: service is managed by another provider");
        return Ok(VipDecision::stop());
    }

    if active.is_empty() {
        info!("Claiming service");
        let claimed = annotations::with(
            service,
            annotations::VIP_ACTIVE_PROVIDER,
            &policy.provider_id,
        );
        return Ok(VipDecision::stop_with(claimed));
    }

    let namespace = service
        .namespace()
        .ok_or_else(|| VipError::MissingField("metadata.namespace".to_string()))?;
    let name = service
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| VipError::MissingField("metadata.name".to_string()))?;

    let address = addresses.get_address(&namespace, name).await?;
    let assigned = annotations::get(service, annotations::ASSIGNED_VIP);

    if assigned.is_empty() {
        let Some(address) = address else {
            debug!("No ip address request exists, creating one");
            return match request_address(addresses, service).await {
                Ok(_) => Ok(VipDecision::stop()),
                Err(VipError::Store(StoreError::AlreadyExists)) => {
                    debug!("Ip address request already exists");
                    Ok(VipDecision::stop())
                }
                Err(e) => Err(e),
            };
        };

        let resolved = address.resolved_address();
        if resolved.is_empty() {
            debug!("Ip address request has no address yet");
            return Ok(VipDecision::stop());
        }

        let stored = store_vip(service, resolved, notifier).await;
        return Ok(VipDecision::proceed_with(stored, true));
    }

    let Some(address) = address else {
        info!(vip = %assigned, "Assigned ip address has disappeared");
        let cleared = annotations::with(service, annotations::ASSIGNED_VIP, "");
        notifier
            .notify(
                service,
                &format!("assigned VIP {assigned} has disappeared"),
                true,
            )
            .await;
        return Ok(VipDecision::stop_with(cleared));
    };

    let resolved = address.resolved_address();
    if resolved != assigned {
        if resolved.is_empty() {
            warn!(vip = %assigned, "Ip address request lost its address");
            let cleared = annotations::with(service, annotations::ASSIGNED_VIP, "");
            notifier
                .notify(
                    service,
                    &format!("assigned VIP {assigned} was released by IPAM"),
                    true,
                )
                .await;
            return Ok(VipDecision::stop_with(cleared));
        }

        info!(from = %assigned, to = %resolved, "Assigned ip address has changed");
        let stored = store_vip(service, resolved, notifier).await;
        return Ok(VipDecision::proceed_with(stored, true));
    }

    Ok(VipDecision::proceed_with(service.clone(), false))
}

/// Copy the service with its VIP set and record the assignment
async fn store_vip<N: Notifier + ?Sized>(service: &Service, vip: &str, notifier: &N) -> Service {
    let stored = annotations::with(service, annotations::ASSIGNED_VIP, vip);
    info!(vip = %vip, "Assigned VIP");
    notifier
        .notify(service, &format!("assigned VIP {vip}"), false)
        .await;
    stored
}
