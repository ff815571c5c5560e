//! Service controller
//!
//! Watches v1/Service resources and runs the VIP reconciler for each of
//! them. IpAddress changes are mapped back to their owning Service through
//! owner references, so a freshly resolved address triggers the owner
//! without waiting for the periodic resync.
//!
//! Each pass applies at most the single mutation the reconciler returns and
//! then waits; the watch event caused by its own write starts the next pass.
//! Optimistic concurrency on the write keeps two providers from both
//! believing they claimed the same service.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::runtime::reflector::Store;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, error, info, instrument, warn};

use crate::annotations;
use crate::ipaddress::IpAddress;
use crate::propagation::on_address_upserted;
use crate::reconciler::{ensure_vip, VipError};

use super::retry::{classify_error, compute_backoff, RetryTracker};
use super::ControllerContext;

/// Reconcile a single Service resource
#[instrument(skip(ctx, service), fields(
    namespace = %service.metadata.namespace.as_deref().unwrap_or("default"),
    name = %service.metadata.name.as_deref().unwrap_or("unknown"),
))]
pub(crate) async fn reconcile(
    service: Arc<Service>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, VipError> {
    let decision = ensure_vip(
        &service,
        ctx.addresses.as_ref(),
        ctx.notifier.as_ref(),
        &ctx.policy,
    )
    .await?;

    if decision.changed {
        if let Some(updated) = decision.service.as_ref() {
            ctx.services.update_service(updated).await?;
            debug!("Persisted VIP annotations");
        }
    }

    if let (Some(vip), Some(ready)) = (decision.vip(), decision.service.as_ref()) {
        let mode = match annotations::vip_mode(ready) {
            Ok(mode) => mode,
            Err(e) => {
                ctx.notifier.notify(ready, &e.to_string(), true).await;
                return Err(e);
            }
        };
        info!(
            vip = %vip,
            mode = mode.as_str(),
            ssl_profiles = ?annotations::ssl_profiles(ready),
            "VIP ready"
        );
    }

    if let Some(uid) = service.metadata.uid.as_deref() {
        ctx.retry_tracker.reset(uid);
    }

    Ok(Action::requeue(ctx.resync_interval))
}

/// Error policy for the controller with exponential backoff
fn error_policy(service: Arc<Service>, error: &VipError, ctx: Arc<ControllerContext>) -> Action {
    let uid = service.metadata.uid.as_deref().unwrap_or("unknown");
    let kind = classify_error(error);

    let attempt = ctx.retry_tracker.increment(uid);

    warn!(
        error = %error,
        attempt = attempt,
        error_kind = ?kind,
        "Reconciliation error"
    );

    compute_backoff(attempt, kind)
}

/// UIDs of the Services currently in the controller's cache
fn live_uids(services: &[Arc<Service>]) -> HashSet<String> {
    services
        .iter()
        .filter_map(|s| s.metadata.uid.clone())
        .collect()
}

/// Drop retry counts of deleted Services on every resync
async fn prune_retries(cache: Store<Service>, tracker: Arc<RetryTracker>, every: Duration) {
    if cache.wait_until_ready().await.is_err() {
        return;
    }

    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let dropped = tracker.retain_live(&live_uids(&cache.state()));
        if dropped > 0 {
            debug!(dropped, "Pruned retry counts of deleted services");
        }
    }
}

/// Run the Service controller
///
/// Returns once the controller has drained after a termination signal.
pub async fn run(client: Client, ctx: Arc<ControllerContext>) {
    let services: Api<Service> = Api::all(client.clone());
    let addresses: Api<IpAddress> = Api::all(client);

    info!(provider = %ctx.policy.provider_id, "Starting Service controller");

    let controller = Controller::new(services, WatcherConfig::default()).watches(
        addresses,
        WatcherConfig::default(),
        |address| on_address_upserted(&address),
    );
    let pruner = tokio::spawn(prune_retries(
        controller.store(),
        ctx.retry_tracker.clone(),
        ctx.resync_interval,
    ));

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!(error = ?e, "Service controller stream error");
            }
        })
        .await;

    pruner.abort();
    info!("Service controller drained");
}
