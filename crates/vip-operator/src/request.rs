//! IpAddress requests for Services

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use tracing::info;

use crate::ipaddress::{IpAddress, IpAddressSpec};
use crate::reconciler::VipError;
use crate::store::AddressStore;

/// Kind recorded in owner references pointing at Services
pub const SERVICE_KIND: &str = "Service";

/// API version recorded in owner references pointing at Services
pub const SERVICE_API_VERSION: &str = "v1";

/// Build the IpAddress request for a service.
///
/// The request shares the service's namespace and name and carries an owner
/// reference back to it, which is how address changes are routed back.
pub fn build_address_request(service: &Service) -> Result<IpAddress, VipError> {
    let name = service
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| VipError::MissingField("metadata.name".to_string()))?;
    let namespace = service
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| VipError::MissingField("metadata.namespace".to_string()))?;
    let uid = service
        .metadata
        .uid
        .as_deref()
        .ok_or_else(|| VipError::MissingField("metadata.uid".to_string()))?;

    Ok(IpAddress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: SERVICE_API_VERSION.to_string(),
                kind: SERVICE_KIND.to_string(),
                name: name.to_string(),
                uid: uid.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: IpAddressSpec {
            description: format!("created for service {name}"),
        },
        status: None,
    })
}

/// Create a new IpAddress request for a service
pub async fn request_address<A: AddressStore + ?Sized>(
    addresses: &A,
    service: &Service,
) -> Result<IpAddress, VipError> {
    let request = build_address_request(service)?;
    let created = addresses.create_address(&request).await?;

    info!(
        namespace = %created.metadata.namespace.as_deref().unwrap_or_default(),
        name = %created.metadata.name.as_deref().unwrap_or_default(),
        "Created ip address request"
    );

    Ok(created)
}
