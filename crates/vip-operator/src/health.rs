//! Health check HTTP server for Kubernetes probes.
//!
//! Provides `/healthz` (liveness) and `/readyz` (readiness) endpoints.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Default port for health check server.
pub const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Dependency the operator cannot work without
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// `Ok(())` if the dependency answers, otherwise a description of the failure
    async fn check_readiness(&self) -> Result<(), String>;
}

#[async_trait]
impl ReadinessCheck for kube::Client {
    async fn check_readiness(&self) -> Result<(), String> {
        self.apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Shared state for health check endpoints.
pub struct HealthState<C: ReadinessCheck> {
    /// Whether the operator has completed startup.
    started: AtomicBool,
    /// Probe for API server connectivity.
    check: Arc<C>,
}

impl<C: ReadinessCheck> HealthState<C> {
    pub fn new(check: Arc<C>) -> Self {
        Self {
            started: AtomicBool::new(false),
            check,
        }
    }

    /// Mark the operator as started and ready.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
        info!("Health check: operator marked as started");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

/// Run the health check HTTP server.
///
/// Runs until the server hits a fatal error. The operator is marked as
/// started only after the listener is bound.
pub async fn run_health_server<C: ReadinessCheck + 'static>(
    state: Arc<HealthState<C>>,
    port: u16,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<C>))
        .with_state(state.clone());

    // kubelet probes from inside the pod network namespace
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = port, "Health check server listening");

    state.mark_started();

    axum::serve(listener, app).await
}

/// Liveness probe endpoint.
async fn healthz() -> StatusCode {
    debug!("Liveness probe: OK");
    StatusCode::OK
}

/// Readiness probe endpoint.
///
/// Returns 503 until startup completed and while the API server is unreachable.
async fn readyz<C: ReadinessCheck + 'static>(State(state): State<Arc<HealthState<C>>>) -> StatusCode {
    if !state.is_started() {
        debug!("Readiness probe: NOT READY (startup incomplete)");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match state.check.check_readiness().await {
        Ok(()) => {
            debug!("Readiness probe: OK");
            StatusCode::OK
        }
        Err(e) => {
            warn!(error = %e, "Readiness probe: NOT READY (API server unreachable)");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
