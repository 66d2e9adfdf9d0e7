//! Prometheus metrics for the nuo operator.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::coordinator::CycleReport;
use crate::error::NuoError;

/// Labels for upgrade cycle outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CycleLabels {
    pub cluster: String,
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub cluster: String,
}

/// Labels for worker node bucket sizes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NodeStateLabels {
    pub cluster: String,
    pub state: String,
}

/// Labels for node mutations.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NodeActionLabels {
    pub cluster: String,
    pub action: String,
}

/// All Prometheus metrics for the operator.
pub struct Metrics {
    pub upgrade_cycles_total: Family<CycleLabels, Counter>,
    pub upgrade_cycle_duration_seconds: Family<ClusterLabels, Histogram>,
    pub worker_nodes: Family<NodeStateLabels, Gauge>,
    pub node_actions_total: Family<NodeActionLabels, Counter>,
}

const NODE_STATES: [&str; 5] = ["eligible", "done", "upgrading", "not_ready", "unavailable"];
const NODE_ACTIONS: [&str; 5] = ["prepare", "process", "activate", "reconcile", "skip"];

const CYCLE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

impl Metrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let upgrade_cycles_total = Family::<CycleLabels, Counter>::default();
        registry.register(
            "nuo_upgrade_cycles",
            "Total number of worker upgrade cycles by result",
            upgrade_cycles_total.clone(),
        );

        let upgrade_cycle_duration_seconds =
            Family::<ClusterLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(CYCLE_BUCKETS.iter().copied())
            });
        registry.register(
            "nuo_upgrade_cycle_duration_seconds",
            "Duration of worker upgrade cycles in seconds",
            upgrade_cycle_duration_seconds.clone(),
        );

        let worker_nodes = Family::<NodeStateLabels, Gauge>::default();
        registry.register(
            "nuo_worker_nodes",
            "Worker nodes per upgrade state, as of the last cycle",
            worker_nodes.clone(),
        );

        let node_actions_total = Family::<NodeActionLabels, Counter>::default();
        registry.register(
            "nuo_node_actions",
            "Total number of node mutations by action",
            node_actions_total.clone(),
        );

        Self {
            upgrade_cycles_total,
            upgrade_cycle_duration_seconds,
            worker_nodes,
            node_actions_total,
        }
    }

    /// Record a completed cycle.
    pub fn record_cycle(&self, report: &CycleReport, duration_secs: f64) {
        self.observe(&report.cluster, "success", duration_secs);

        let counts = [
            report.filtered,
            report.done,
            report.upgrading,
            report.not_ready,
            report.unavailable,
        ];
        for (state, count) in NODE_STATES.into_iter().zip(counts) {
            self.worker_nodes
                .get_or_create(&NodeStateLabels {
                    cluster: report.cluster.clone(),
                    state: state.to_string(),
                })
                .set(i64::try_from(count).unwrap_or(i64::MAX));
        }

        let counts = [
            report.prepared.len(),
            report.processed.len(),
            report.activated.len(),
            report.reconciled.len(),
            report.skipped.len(),
        ];
        for (action, count) in NODE_ACTIONS.into_iter().zip(counts).filter(|(_, c)| *c > 0) {
            self.node_actions_total
                .get_or_create(&NodeActionLabels {
                    cluster: report.cluster.clone(),
                    action: action.to_string(),
                })
                .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
        }
    }

    /// Record a failed cycle.
    pub fn record_cycle_error(&self, cluster: &str, err: &NuoError, duration_secs: f64) {
        self.observe(cluster, err.kind(), duration_secs);
    }

    /// Drop the per-cluster node gauges and action counters of a cluster
    /// that is going away.
    pub fn forget_cluster(&self, cluster: &str) {
        for state in NODE_STATES {
            self.worker_nodes.remove(&NodeStateLabels {
                cluster: cluster.to_string(),
                state: state.to_string(),
            });
        }
        for action in NODE_ACTIONS {
            self.node_actions_total.remove(&NodeActionLabels {
                cluster: cluster.to_string(),
                action: action.to_string(),
            });
        }
        self.upgrade_cycle_duration_seconds.remove(&ClusterLabels {
            cluster: cluster.to_string(),
        });
    }

    fn observe(&self, cluster: &str, result: &str, duration_secs: f64) {
        self.upgrade_cycles_total
            .get_or_create(&CycleLabels {
                cluster: cluster.to_string(),
                result: result.to_string(),
            })
            .inc();
        self.upgrade_cycle_duration_seconds
            .get_or_create(&ClusterLabels {
                cluster: cluster.to_string(),
            })
            .observe(duration_secs);
    }
}

/// Axum handler that encodes the registry as OpenMetrics text.
async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buf = String::new();
    if encode(&mut buf, &registry).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        );
    }
    (StatusCode::OK, buf)
}

/// Start the metrics server on the given port.
pub async fn serve(port: u16, registry: Arc<Registry>) -> anyhow::Result<()> {
    use axum::Router;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tracing::info;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "Metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
