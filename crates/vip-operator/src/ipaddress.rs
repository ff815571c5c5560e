//! IpAddress CRD served by the IPAM subsystem
//!
//! Only the fields this operator reads or writes are modelled; IPAM may
//! store more.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// IpAddress spec - a request for one address
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ipam.nexinto.com",
    version = "v1",
    kind = "IpAddress",
    plural = "ipaddresses",
    namespaced = true,
    status = "IpAddressStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Address", "type":"string", "jsonPath":".status.address"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressSpec {
    /// Free-form note on who requested the address
    #[serde(default)]
    pub description: String,
}

/// IpAddress status, filled in by IPAM
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressStatus {
    /// The allocated address; empty while allocation is pending
    #[serde(default)]
    pub address: String,
}

impl IpAddress {
    /// The resolved address, or "" when IPAM has not answered yet
    pub fn resolved_address(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.address.as_str())
            .unwrap_or("")
    }
}
