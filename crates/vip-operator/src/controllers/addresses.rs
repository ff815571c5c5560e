//! IpAddress deletion watcher
//!
//! Resets the VIP of a Service as soon as its IpAddress is deleted. Failed
//! resets are only logged: the deleted address also triggers its owner in the
//! Service controller, whose next pass reaches the same result.

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::ipaddress::IpAddress;
use crate::propagation::on_address_deleted;

use super::ControllerContext;

/// Handle one watch event
pub(crate) async fn handle_event(event: Event<IpAddress>, ctx: &ControllerContext) {
    let Event::Delete(address) = event else {
        return;
    };

    match on_address_deleted(&address, ctx.services.as_ref(), &ctx.policy.provider_id).await {
        Ok(0) => debug!(address = %address.name_any(), "Deleted address had no assigned owner"),
        Ok(reset) => info!(address = %address.name_any(), reset, "Reset services of deleted address"),
        Err(e) => warn!(
            address = %address.name_any(),
            error = %e,
            "Failed to reset services of deleted address"
        ),
    }
}

/// Run the IpAddress deletion watcher
pub async fn run(client: Client, ctx: Arc<ControllerContext>) {
    let addresses: Api<IpAddress> = Api::all(client);

    info!("Starting IpAddress deletion watcher");

    watcher::watcher(addresses, WatcherConfig::default())
        .default_backoff()
        .for_each(|event| {
            let ctx = ctx.clone();
            async move {
                match event {
                    Ok(event) => handle_event(event, &ctx).await,
                    Err(e) => warn!(error = %e, "IpAddress watch error"),
                }
            }
        })
        .await;
}
