//! Multi-pass VIP convergence against an in-memory store

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use vip_operator::annotations::{self, ASSIGNED_VIP, VIP_ACTIVE_PROVIDER};
use vip_operator::events::NoopNotifier;
use vip_operator::ipaddress::{IpAddress, IpAddressStatus};
use vip_operator::propagation::{on_address_deleted, on_address_upserted};
use vip_operator::store::{AddressStore, ServiceStore, StoreError};
use vip_operator::{ensure_vip, VipDecision, VipPolicy};

type Key = (String, String);

/// Store with resourceVersion checks on update and duplicate checks on create
#[derive(Default)]
struct MemoryStore {
    services: Mutex<HashMap<Key, Service>>,
    addresses: Mutex<HashMap<Key, IpAddress>>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(meta: &ObjectMeta) -> Key {
    key(
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

impl MemoryStore {
    fn insert_service(&self, service: Service) {
        self.services
            .lock()
            .unwrap()
            .insert(meta_key(&service.metadata), service);
    }

    fn service(&self, namespace: &str, name: &str) -> Service {
        self.services.lock().unwrap()[&key(namespace, name)].clone()
    }

    /// What IPAM does once it picked an address
    fn resolve(&self, namespace: &str, name: &str, address: &str) -> IpAddress {
        let mut addresses = self.addresses.lock().unwrap();
        let entry = addresses
            .get_mut(&key(namespace, name))
            .expect("address requested");
        entry.status = Some(IpAddressStatus {
            address: address.to_string(),
        });
        entry.clone()
    }

    fn delete_address(&self, namespace: &str, name: &str) -> IpAddress {
        self.addresses
            .lock()
            .unwrap()
            .remove(&key(namespace, name))
            .expect("address exists")
    }

    fn address_count(&self) -> usize {
        self.addresses.lock().unwrap().len()
    }

    /// Persist a decision the way the Service controller does
    async fn apply(&self, decision: &VipDecision) -> Result<(), StoreError> {
        if decision.changed {
            if let Some(service) = &decision.service {
                self.update_service(service).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, StoreError> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned())
    }

    async fn update_service(&self, service: &Service) -> Result<Service, StoreError> {
        let mut services = self.services.lock().unwrap();
        let current = services
            .get_mut(&meta_key(&service.metadata))
            .ok_or(StoreError::MissingMetadata("metadata.name"))?;
        if current.metadata.resource_version != service.metadata.resource_version {
            return Err(StoreError::Conflict);
        }

        let version: u64 = current
            .metadata
            .resource_version
            .as_deref()
            .unwrap_or("0")
            .parse()
            .unwrap();
        let mut updated = service.clone();
        updated.metadata.resource_version = Some((version + 1).to_string());
        *current = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl AddressStore for MemoryStore {
    async fn get_address(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<IpAddress>, StoreError> {
        Ok(self
            .addresses
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned())
    }

    async fn create_address(&self, address: &IpAddress) -> Result<IpAddress, StoreError> {
        let mut addresses = self.addresses.lock().unwrap();
        let k = meta_key(&address.metadata);
        if addresses.contains_key(&k) {
            return Err(StoreError::AlreadyExists);
        }
        addresses.insert(k, address.clone());
        Ok(address.clone())
    }
}

fn nodeport_service() -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some("svc1".to_string()),
            namespace: Some("ns1".to_string()),
            uid: Some("uid-svc1".to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

async fn pass(store: &MemoryStore, policy: &VipPolicy) -> VipDecision {
    let service = store.service("ns1", "svc1");
    let decision = ensure_vip(&service, store, &NoopNotifier, policy)
        .await
        .unwrap();
    store.apply(&decision).await.unwrap();
    decision
}

#[tokio::test]
async fn converges_from_fresh_service() {
    let store = MemoryStore::default();
    store.insert_service(nodeport_service());
    let policy = VipPolicy::new("p1", false);

    // claim
    let first = pass(&store, &policy).await;
    assert!(!first.proceed);
    assert!(first.changed);
    assert_eq!(
        annotations::get(first.service.as_ref().unwrap(), VIP_ACTIVE_PROVIDER),
        "p1"
    );
    assert_eq!(store.address_count(), 0);

    // request
    let second = pass(&store, &policy).await;
    assert_eq!(second, VipDecision::stop());
    assert_eq!(store.address_count(), 1);
    let request = store.get_address("ns1", "svc1").await.unwrap().unwrap();
    assert_eq!(request.spec.description, "created for service svc1");
    assert_eq!(request.owner_references()[0].name, "svc1");

    // pending allocation
    assert_eq!(pass(&store, &policy).await, VipDecision::stop());

    // IPAM resolves; the change is routed back to the owner
    let resolved = store.resolve("ns1", "svc1", "10.0.0.7");
    let triggered = on_address_upserted(&resolved);
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].name, "svc1");

    // store
    let third = pass(&store, &policy).await;
    assert!(third.proceed);
    assert!(third.changed);
    assert_eq!(third.vip(), Some("10.0.0.7"));
    assert_eq!(
        annotations::get(&store.service("ns1", "svc1"), ASSIGNED_VIP),
        "10.0.0.7"
    );

    // converged
    let fourth = pass(&store, &policy).await;
    assert!(fourth.proceed);
    assert!(!fourth.changed);
}

#[tokio::test]
async fn address_deletion_restarts_allocation() {
    let store = MemoryStore::default();
    store.insert_service(nodeport_service());
    let policy = VipPolicy::new("p1", false);

    pass(&store, &policy).await;
    pass(&store, &policy).await;
    store.resolve("ns1", "svc1", "10.0.0.7");
    assert!(pass(&store, &policy).await.proceed);

    let deleted = store.delete_address("ns1", "svc1");
    let reset = on_address_deleted(&deleted, &store, "p1").await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(
        annotations::get(&store.service("ns1", "svc1"), ASSIGNED_VIP),
        ""
    );

    // a second delete notification finds nothing to reset
    assert_eq!(
        on_address_deleted(&deleted, &store, "p1").await.unwrap(),
        0
    );

    // next pass requests a new address
    assert_eq!(pass(&store, &policy).await, VipDecision::stop());
    assert_eq!(store.address_count(), 1);
}

#[tokio::test]
async fn competing_providers_claim_exactly_once() {
    let store = MemoryStore::default();
    store.insert_service(nodeport_service());
    let p1 = VipPolicy::new("p1", false);
    let p2 = VipPolicy::new("p2", false);

    // both read the same unclaimed version
    let cached = store.service("ns1", "svc1");
    let claim1 = ensure_vip(&cached, &store, &NoopNotifier, &p1).await.unwrap();
    let claim2 = ensure_vip(&cached, &store, &NoopNotifier, &p2).await.unwrap();
    assert!(claim1.changed && claim2.changed);

    store.apply(&claim1).await.unwrap();
    assert!(matches!(
        store.apply(&claim2).await,
        Err(StoreError::Conflict)
    ));

    // p2 retries from a fresh read and backs off
    let retry = pass(&store, &p2).await;
    assert!(!retry.proceed);
    assert!(!retry.changed);
    assert_eq!(
        annotations::get(&store.service("ns1", "svc1"), VIP_ACTIVE_PROVIDER),
        "p1"
    );
}
