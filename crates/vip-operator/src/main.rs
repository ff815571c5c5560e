use std::sync::Arc;

use anyhow::{bail, Context, Result};
use kube::Client;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vip_operator::controllers::retry::RetryTracker;
use vip_operator::controllers::ControllerContext;
use vip_operator::events::KubeNotifier;
use vip_operator::health::{run_health_server, HealthState};
use vip_operator::leader::ProviderLease;
use vip_operator::store::KubeStore;
use vip_operator::ProviderConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ProviderConfig::from_env().context("Failed to load provider configuration")?;

    info!(
        provider = %config.provider_id(),
        require_opt_in = config.require_opt_in(),
        resync_secs = config.resync_interval().as_secs(),
        "vip-operator starting"
    );

    let kube_client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!("Connected to Kubernetes cluster");

    let health = Arc::new(HealthState::new(Arc::new(kube_client.clone())));
    let health_port = config.health_port();
    tokio::spawn({
        let health = health.clone();
        async move {
            if let Err(e) = run_health_server(health, health_port).await {
                error!(error = %e, "Health check server failed");
            }
        }
    });

    let lease = config
        .lease()
        .map(|settings| ProviderLease::new(kube_client.clone(), &config, settings));
    match &lease {
        Some(lease) => lease.acquire().await,
        None => info!("Leader election disabled"),
    }

    let store = Arc::new(KubeStore::new(kube_client.clone()));
    let ctx = Arc::new(ControllerContext {
        services: store.clone(),
        addresses: store,
        notifier: Arc::new(KubeNotifier::new(
            kube_client.clone(),
            &config.controller_name(),
        )),
        policy: config.policy(),
        resync_interval: config.resync_interval(),
        retry_tracker: Arc::new(RetryTracker::new()),
    });

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    info!("Starting controllers");

    let mut services = tokio::spawn(vip_operator::controllers::service::run(
        kube_client.clone(),
        ctx.clone(),
    ));
    let addresses = tokio::spawn(vip_operator::controllers::addresses::run(
        kube_client,
        ctx,
    ));
    let leadership = async {
        match &lease {
            Some(lease) => lease.hold().await,
            None => std::future::pending().await,
        }
    };

    // signals first: the Service controller also stops on them
    select! {
        biased;
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
        lost = leadership => {
            error!(reason = %lost, "Lost provider leadership");
            bail!("{}", lost);
        }
        result = &mut services => {
            return handle_controller_exit("Service", result);
        }
        result = addresses => {
            return handle_controller_exit("IpAddress", result);
        }
    }

    // in-flight reconciles finish before the lease is released
    if let Err(e) = services.await {
        warn!(error = %e, "Service controller did not drain cleanly");
    }
    if let Some(lease) = &lease {
        lease.step_down().await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Handle a controller task exit, returning an error to trigger pod restart
fn handle_controller_exit(
    name: &str,
    result: std::result::Result<(), tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(()) => {
            warn!(controller = name, "Controller exited");
            bail!("{} controller exited unexpectedly", name)
        }
        Err(e) if e.is_panic() => {
            error!(controller = name, "Controller panicked");
            bail!("{} controller panicked: {:?}", name, e.into_panic())
        }
        Err(e) => {
            error!(controller = name, error = ?e, "Controller task failed");
            bail!("{} controller task failed: {}", name, e)
        }
    }
}
