//! Routes IpAddress changes back to the owning Services
//!
//! A resolved or changed address only needs its owner re-reconciled. A
//! deleted address also invalidates the owner's VIP right away, since the
//! resource the reconciler would read is already gone.

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::annotations;
use crate::ipaddress::IpAddress;
use crate::reconciler::VipError;
use crate::request::{SERVICE_API_VERSION, SERVICE_KIND};
use crate::store::ServiceStore;

/// Whether an owner reference points at a core/v1 Service
fn is_service_owner(owner: &OwnerReference) -> bool {
    owner.kind == SERVICE_KIND && owner.api_version == SERVICE_API_VERSION
}

/// Names of the Services owning an address
fn service_owners(address: &IpAddress) -> impl Iterator<Item = &str> {
    address
        .owner_references()
        .iter()
        .filter(|o| is_service_owner(o))
        .map(|o| o.name.as_str())
}

/// Services to re-reconcile after an address was created or updated.
///
/// Nothing is returned until IPAM has resolved the address.
pub fn on_address_upserted(address: &IpAddress) -> Vec<ObjectRef<Service>> {
    if address.resolved_address().is_empty() {
        return Vec::new();
    }
    let Some(namespace) = address.namespace() else {
        return Vec::new();
    };

    let refs: Vec<ObjectRef<Service>> = service_owners(address)
        .map(|name| ObjectRef::new(name).within(&namespace))
        .collect();

    debug!(
        address = %address.name_any(),
        namespace = %namespace,
        services = refs.len(),
        "Address resolved, triggering owning services"
    );

    refs
}

/// Clear the VIP of every Service owning a deleted address.
///
/// Services that are gone, unassigned, or claimed by another provider are
/// left alone. Returns the number of services reset.
#[instrument(skip_all, fields(
    namespace = %address.metadata.namespace.as_deref().unwrap_or("default"),
    address = %address.name_any(),
))]
pub async fn on_address_deleted<S: ServiceStore + ?Sized>(
    address: &IpAddress,
    services: &S,
    provider_id: &str,
) -> Result<usize, VipError> {
    let Some(namespace) = address.namespace() else {
        return Ok(0);
    };

    let mut reset = 0;
    for name in service_owners(address) {
        let Some(service) = services.get_service(&namespace, name).await? else {
            debug!(service = %name, "Owning service is gone too");
            continue;
        };

        let active = annotations::get(&service, annotations::VIP_ACTIVE_PROVIDER);
        if !active.is_empty() && active != provider_id {
            debug!(service = %name, active = %active, "Service is managed by another provider");
            continue;
        }

        let assigned = annotations::get(&service, annotations::ASSIGNED_VIP);
        if assigned.is_empty() {
            continue;
        }

        info!(service = %name, vip = %assigned, "Address deleted, resetting assigned VIP");
        let cleared = annotations::with(&service, annotations::ASSIGNED_VIP, "");
        services.update_service(&cleared).await?;
        reset += 1;
    }

    Ok(reset)
}
