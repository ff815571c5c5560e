//! Service annotations shared by every VIP provider
//!
//! The keys in this module are the whole protocol between competing
//! providers and the IPAM-backed address requests. They must stay
//! bit-exact so that other implementations interoperate.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;

use crate::reconciler::VipError;

/// If set to any non-empty value, a VIP is requested (only checked when opt-in is required)
pub const REQ_VIP: &str = "nexinto.com/req-vip";

/// The confirmed VIP for the service; empty until an address is resolved
pub const ASSIGNED_VIP: &str = "nexinto.com/vip";

/// Explicit provider selection
pub const VIP_PROVIDER: &str = "nexinto.com/vip-provider";

/// The provider that claimed this service
pub const VIP_ACTIVE_PROVIDER: &str = "nexinto.com/vip-active-provider";

/// SSL profiles for the virtual server (comma-separated)
pub const VIP_SSL_PROFILES: &str = "nexinto.com/vip-ssl-profiles";

/// VIP mode, `http` (default) or `tcp`
pub const VIP_MODE: &str = "nexinto.com/req-vip-mode";

/// Well-known provider ids
///
/// Any non-blank id works; these are the ones the other providers know by name.
pub mod providers {
    pub const BIGIP: &str = "bigip";
    pub const FORTIGATE: &str = "fortigate";

    pub fn is_well_known(id: &str) -> bool {
        id == BIGIP || id == FORTIGATE
    }
}

/// Service type a VIP can be attached to
pub const LOAD_BALANCED_TYPE: &str = "NodePort";

/// How the virtual server balances traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VipMode {
    #[default]
    Http,
    Tcp,
}

impl VipMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VipMode::Http => "http",
            VipMode::Tcp => "tcp",
        }
    }
}

/// Read an annotation, treating a missing key or missing map as empty
pub fn get<'a>(service: &'a Service, key: &str) -> &'a str {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
        .unwrap_or("")
}

/// Return a copy of the service with one annotation set.
///
/// The original is never touched; it usually comes from a watch cache
/// shared with other reconcilers.
pub fn with(service: &Service, key: &str, value: &str) -> Service {
    let mut copy = service.clone();
    copy.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    copy
}

/// Whether the service is of the type VIPs are provided for
pub fn is_load_balanced(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .unwrap_or("ClusterIP")
        == LOAD_BALANCED_TYPE
}

/// Parse the requested VIP mode
pub fn vip_mode(service: &Service) -> Result<VipMode, VipError> {
    match get(service, VIP_MODE).trim() {
        "" | "http" => Ok(VipMode::Http),
        "tcp" => Ok(VipMode::Tcp),
        other => Err(VipError::InvalidVipMode(other.to_string())),
    }
}

/// Parse the requested SSL profiles
pub fn ssl_profiles(service: &Service) -> Vec<String> {
    get(service, VIP_SSL_PROFILES)
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
