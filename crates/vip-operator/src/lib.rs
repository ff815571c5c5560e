//! vip-operator: VIP coordination between competing load balancer providers

pub mod annotations;
pub mod config;
pub mod controllers;
pub mod events;
pub mod health;
pub mod ipaddress;
pub mod leader;
pub mod propagation;
pub mod reconciler;
pub mod request;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::ProviderConfig;
pub use ipaddress::IpAddress;
pub use reconciler::{ensure_vip, VipDecision, VipError, VipPolicy};
