//! Controller wiring: reconcile dispatch and error policy for `Cluster` and
//! `Node` resources.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::coordinator::{CycleReport, UpgradeCoordinator};
use crate::crd::{Cluster, Node};
use crate::error::NuoError;
use crate::handler::UpgradeHandler;
use crate::planner::{PlanBuilder, TemplatePlanBuilder};
use crate::store::{KubeStore, ResourceStore};
use crate::telemetry::health::{ControllerKind, HealthState};
use crate::telemetry::metrics::Metrics;

/// Shared context for both controllers.
pub struct Context {
    pub handler: UpgradeHandler,
    pub metrics: Arc<Metrics>,
    pub health: HealthState,
    /// Periodic cluster resync; drives in-flight upgrades forward.
    pub resync: Duration,
    pub error_requeue: Duration,
}

impl Context {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        planner: Arc<dyn PlanBuilder>,
        metrics: Arc<Metrics>,
        health: HealthState,
        resync: Duration,
        error_requeue: Duration,
    ) -> Self {
        let coordinator = Arc::new(UpgradeCoordinator::new(store.clone(), planner.clone()));
        Self {
            handler: UpgradeHandler::new(store, planner, coordinator),
            metrics,
            health,
            resync,
            error_requeue,
        }
    }

    fn record(&self, cluster: &str, result: &Result<Option<CycleReport>, NuoError>, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        self.health.record_reconcile(chrono::Utc::now());
        match result {
            Ok(Some(report)) => self.metrics.record_cycle(report, elapsed),
            Ok(None) => {}
            Err(e) => self.metrics.record_cycle_error(cluster, e, elapsed),
        }
    }
}

/// Reconcile a `Node` event.
pub async fn reconcile_node(node: Arc<Node>, ctx: Arc<Context>) -> Result<Action, NuoError> {
    let started = Instant::now();
    let result = ctx.handler.sync_node(Some(node.as_ref())).await;
    ctx.record(&node.namespace().unwrap_or_default(), &result, started);

    if let Some(report) = result? {
        debug!(node = %node.name_any(), cluster = %report.cluster, "Node event ran an upgrade cycle");
    }
    Ok(Action::await_change())
}

/// Reconcile a `Cluster` event. Requeues after the resync interval until the
/// cluster is being deleted.
pub async fn reconcile_cluster(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, NuoError> {
    if cluster.is_deleting() {
        ctx.metrics.forget_cluster(&cluster.name_any());
        return Ok(Action::await_change());
    }

    let started = Instant::now();
    let result = ctx.handler.sync_cluster(Some(cluster.as_ref())).await;
    ctx.record(&cluster.name_any(), &result, started);

    if let Some(report) = result? {
        debug!(
            cluster = %report.cluster,
            condition = %report.condition,
            done = report.done,
            filtered = report.filtered,
            "Cluster upgrade cycle finished"
        );
    }
    Ok(Action::requeue(ctx.resync))
}

/// Requeue retryable failures; wait for the next change otherwise.
pub fn error_policy<K: ResourceExt>(obj: Arc<K>, err: &NuoError, ctx: Arc<Context>) -> Action {
    if err.is_retryable() {
        warn!(object = %obj.name_any(), error = %err, "Reconcile failed, requeueing");
        Action::requeue(ctx.error_requeue)
    } else {
        error!(object = %obj.name_any(), error = %err, "Reconcile failed");
        Action::await_change()
    }
}

/// Run the `Cluster` and `Node` controllers until shutdown.
pub async fn run(
    client: Client,
    metrics: Arc<Metrics>,
    health: HealthState,
    resync: Duration,
    error_requeue: Duration,
) {
    let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(client.clone()));
    let ctx = Arc::new(Context::new(
        store,
        Arc::new(TemplatePlanBuilder),
        metrics,
        health.clone(),
        resync,
        error_requeue,
    ));

    let clusters: Api<Cluster> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client);

    let cluster_controller = Controller::new(clusters, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_cluster, error_policy, ctx.clone())
        .for_each(|res| async move { log_result("Cluster", res) });

    let node_controller = Controller::new(nodes, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_node, error_policy, ctx)
        .for_each(|res| async move { log_result("Node", res) });

    health.set_running(ControllerKind::Cluster, true);
    health.set_running(ControllerKind::Node, true);
    info!("Starting Cluster and Node controllers");
    tokio::join!(
        async {
            cluster_controller.await;
            health.set_running(ControllerKind::Cluster, false);
        },
        async {
            node_controller.await;
            health.set_running(ControllerKind::Node, false);
        },
    );
}

fn log_result<T: Debug, E: std::fmt::Display>(kind: &str, res: Result<T, E>) {
    match res {
        Ok(o) => debug!(kind, "Reconciled: {:?}", o),
        Err(e) => warn!(kind, "Reconcile failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterSpec, ConditionType, Conditioned, NodeSpec};
    use crate::store::MemoryStore;
    use prometheus_client::registry::Registry;

    fn context(store: Arc<MemoryStore>) -> Arc<Context> {
        let mut registry = Registry::default();
        Arc::new(Context::new(
            store,
            Arc::new(TemplatePlanBuilder),
            Arc::new(Metrics::new(&mut registry)),
            HealthState::new(),
            Duration::from_secs(30),
            Duration::from_secs(10),
        ))
    }

    #[test]
    fn test_error_policy_requeues_retryable() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let node = Arc::new(Node::new("n1", NodeSpec::default()));

        let action = error_policy(
            node.clone(),
            &NuoError::Conflict("node n1".to_string()),
            ctx.clone(),
        );
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let action = error_policy(node, &NuoError::InvalidBudget("x".to_string()), ctx);
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_cluster_requeues_after_resync() {
        let store = Arc::new(MemoryStore::new());
        let mut cluster = Cluster::new("c1", ClusterSpec::default());
        cluster.mark_true(ConditionType::Upgraded, "");
        let cluster = store.put_cluster(cluster).await;

        let action = reconcile_cluster(Arc::new(cluster), context(store))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_deleting_cluster_forgets_metrics() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let mut cluster = Cluster::new("c1", ClusterSpec::default());
        cluster.mark_true(ConditionType::Upgraded, "");
        let cluster = store.put_cluster(cluster).await;

        reconcile_cluster(Arc::new(cluster.clone()), ctx.clone())
            .await
            .unwrap();
        assert!(ctx.health.readiness().last_reconcile.is_some());

        let mut deleting = cluster;
        deleting.metadata.deletion_timestamp =
            serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
        let action = reconcile_cluster(Arc::new(deleting), ctx.clone())
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_node_awaits_change() {
        let store = Arc::new(MemoryStore::new());
        let node = Arc::new(Node::new("n1", NodeSpec::default()));

        let action = reconcile_node(node, context(store)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }
}
