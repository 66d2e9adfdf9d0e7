//! Liveness and readiness endpoints (/healthz, /readyz).
//!
//! The operator is ready while both the `Cluster` and `Node` controllers are
//! running. `/readyz` reports each controller and the last reconcile time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerKind {
    Cluster,
    Node,
}

#[derive(Default)]
struct Inner {
    cluster_running: AtomicBool,
    node_running: AtomicBool,
    /// Unix seconds of the last finished reconcile, 0 before the first.
    last_reconcile: AtomicI64,
}

/// Controller liveness shared between the controllers and the health server.
#[derive(Clone, Default)]
pub struct HealthState {
    inner: Arc<Inner>,
}

/// Body of `/readyz`.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,
    pub cluster_controller: bool,
    pub node_controller: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile: Option<String>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, kind: ControllerKind) -> &AtomicBool {
        match kind {
            ControllerKind::Cluster => &self.inner.cluster_running,
            ControllerKind::Node => &self.inner.node_running,
        }
    }

    pub fn set_running(&self, kind: ControllerKind, running: bool) {
        self.flag(kind).store(running, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.flag(ControllerKind::Cluster).load(Ordering::SeqCst)
            && self.flag(ControllerKind::Node).load(Ordering::SeqCst)
    }

    pub fn record_reconcile(&self, at: DateTime<Utc>) {
        self.inner
            .last_reconcile
            .store(at.timestamp(), Ordering::SeqCst);
    }

    pub fn readiness(&self) -> Readiness {
        let last = self.inner.last_reconcile.load(Ordering::SeqCst);
        Readiness {
            ready: self.is_ready(),
            cluster_controller: self.flag(ControllerKind::Cluster).load(Ordering::SeqCst),
            node_controller: self.flag(ControllerKind::Node).load(Ordering::SeqCst),
            last_reconcile: (last > 0)
                .then(|| DateTime::from_timestamp(last, 0))
                .flatten()
                .map(|t| t.to_rfc3339()),
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<HealthState>) -> (StatusCode, Json<Readiness>) {
    let readiness = state.readiness();
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness))
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Start the health server on the given port.
pub async fn serve(port: u16, state: HealthState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "Health server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_needs_both_controllers() {
        let state = HealthState::new();
        let clone = state.clone();
        assert!(!clone.is_ready());

        state.set_running(ControllerKind::Cluster, true);
        assert!(!clone.is_ready());

        state.set_running(ControllerKind::Node, true);
        assert!(clone.is_ready());

        state.set_running(ControllerKind::Node, false);
        assert!(!clone.is_ready());
    }

    #[test]
    fn test_readiness_reports_last_reconcile() {
        let state = HealthState::new();
        assert_eq!(state.readiness().last_reconcile, None);

        let at = DateTime::from_timestamp(1_767_225_600, 0).unwrap();
        state.record_reconcile(at);
        assert_eq!(
            state.readiness().last_reconcile.as_deref(),
            Some("2026-01-01T00:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn test_readyz_status_code() {
        let state = HealthState::new();
        let (code, Json(body)) = readyz(State(state.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.ready);

        state.set_running(ControllerKind::Cluster, true);
        state.set_running(ControllerKind::Node, true);
        let (code, Json(body)) = readyz(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.cluster_controller && body.node_controller);
        assert_eq!(healthz().await, "ok");
    }
}
