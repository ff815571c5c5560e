//! Resource store collaborators
//!
//! The reconciler only talks to Services and IpAddresses through these
//! traits so it can be driven by mocks in tests and by the Kubernetes API in
//! production.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::ipaddress::IpAddress;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource already exists")]
    AlreadyExists,
    #[error("resource was modified concurrently")]
    Conflict,
    #[error("resource is missing {0}")]
    MissingMetadata(&'static str),
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.reason == "AlreadyExists" => StoreError::AlreadyExists,
            kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict,
            _ => StoreError::Kube(err),
        }
    }
}

/// Read and write access to Services
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Fetch a Service, `Ok(None)` if it does not exist
    async fn get_service(&self, namespace: &str, name: &str)
        -> Result<Option<Service>, StoreError>;

    /// Replace a Service.
    ///
    /// Must fail with [`StoreError::Conflict`] when the service's
    /// resourceVersion is stale.
    async fn update_service(&self, service: &Service) -> Result<Service, StoreError>;
}

/// Read and create access to IpAddress requests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Fetch an IpAddress, `Ok(None)` if it does not exist
    async fn get_address(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<IpAddress>, StoreError>;

    /// Create an IpAddress, failing with [`StoreError::AlreadyExists`] on a duplicate
    async fn create_address(&self, address: &IpAddress) -> Result<IpAddress, StoreError>;
}

/// Store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceStore for KubeStore {
    #[instrument(skip(self))]
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, StoreError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    #[instrument(skip(self, service), fields(name = %service.name_any()))]
    async fn update_service(&self, service: &Service) -> Result<Service, StoreError> {
        let namespace = service
            .namespace()
            .ok_or(StoreError::MissingMetadata("metadata.namespace"))?;
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);

        // replace carries metadata.resourceVersion, so a stale copy is rejected
        let updated = api
            .replace(&service.name_any(), &PostParams::default(), service)
            .await?;

        debug!(namespace = %namespace, "Updated service");
        Ok(updated)
    }
}

#[async_trait]
impl AddressStore for KubeStore {
    #[instrument(skip(self))]
    async fn get_address(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<IpAddress>, StoreError> {
        let api: Api<IpAddress> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    #[instrument(skip(self, address), fields(name = %address.name_any()))]
    async fn create_address(&self, address: &IpAddress) -> Result<IpAddress, StoreError> {
        let namespace = address
            .namespace()
            .ok_or(StoreError::MissingMetadata("metadata.namespace"))?;
        let api: Api<IpAddress> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.create(&PostParams::default(), address).await?)
    }
}

/// Implement traits for Arc-wrapped stores to support shared ownership
#[async_trait]
impl<T: ServiceStore + ?Sized> ServiceStore for Arc<T> {
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, StoreError> {
        (**self).get_service(namespace, name).await
    }

    async fn update_service(&self, service: &Service) -> Result<Service, StoreError> {
        (**self).update_service(service).await
    }
}

#[async_trait]
impl<T: AddressStore + ?Sized> AddressStore for Arc<T> {
    async fn get_address(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<IpAddress>, StoreError> {
        (**self).get_address(namespace, name).await
    }

    async fn create_address(&self, address: &IpAddress) -> Result<IpAddress, StoreError> {
        (**self).create_address(address).await
    }
}
