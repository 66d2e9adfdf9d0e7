//! Event handlers for `Node` and `Cluster` changes.
//!
//! Handlers decide whether an event needs a plan update, a restore, or an
//! upgrade cycle, and delegate the actual work to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::coordinator::{CycleReport, UpgradeCoordinator};
use crate::crd::{Cluster, ConditionType, Conditioned, DesiredScheduling, Node, RESTORE_ANNOTATION};
use crate::differ::{cosmetic_change, disruptive_change};
use crate::error::NuoError;
use crate::planner::PlanBuilder;
use crate::store::ResourceStore;

/// Nodes updated in parallel during a restore.
const RESTORE_CONCURRENCY: usize = 5;
/// Conflict retries when clearing the restore annotation.
const RESTORE_RETRIES: usize = 7;
const RESTORE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

pub struct UpgradeHandler {
    store: Arc<dyn ResourceStore>,
    planner: Arc<dyn PlanBuilder>,
    coordinator: Arc<UpgradeCoordinator>,
}

impl UpgradeHandler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        planner: Arc<dyn PlanBuilder>,
        coordinator: Arc<UpgradeCoordinator>,
    ) -> Self {
        Self {
            store,
            planner,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &UpgradeCoordinator {
        &self.coordinator
    }

    /// Handle a node event. `None` means the node is gone.
    ///
    /// Returns the cycle report when the event ran an upgrade cycle.
    pub async fn sync_node(&self, node: Option<&Node>) -> Result<Option<CycleReport>, NuoError> {
        let Some(node) = node else {
            return Ok(None);
        };
        if node.is_deleting() || !node.is_true(ConditionType::Provisioned) {
            return Ok(None);
        }

        let node_name = node.name_any();
        let Some(cluster_name) = node.cluster_name() else {
            warn!(node = %node_name, "Node has no owning cluster, dropping event");
            return Ok(None);
        };
        let cluster = match self.store.get_cluster(&cluster_name).await {
            Ok(cluster) => cluster,
            Err(NuoError::ClusterNotFound(_)) => {
                warn!(node = %node_name, cluster = %cluster_name, "Owning cluster not found, dropping event");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if cluster.is_deleting() || cluster.restore_requested() {
            return Ok(None);
        }

        let Some(plan) = node.node_plan() else {
            self.create_node_plan(node, &cluster).await?;
            return Ok(None);
        };
        let version = cluster.node_version();

        if cluster.is_upgrading() {
            if node.desired_scheduling() != DesiredScheduling::None {
                debug!(
                    cluster = %cluster_name,
                    node = %node_name,
                    desired = %node.desired_scheduling(),
                    "Node has a pending scheduling request"
                );
                return Ok(None);
            }
            if node.is_unknown(ConditionType::Upgraded)
                && node.applied_node_version() != version
                && plan.version == version
            {
                debug!(cluster = %cluster_name, node = %node_name, version, "Node plan already pushed");
                return Ok(None);
            }

            info!(cluster = %cluster_name, node = %node_name, "Reconciling upgrade for node event");
            return self
                .coordinator
                .run_upgrade_cycle(&cluster_name, false)
                .await
                .map(Some);
        }

        if plan.version != version {
            let fresh = self.planner.build_node_plan(&cluster, node)?;
            // a node that never applied a plan can take any change quietly
            let quiet = if node.applied_node_version() == 0 {
                disruptive_change(&fresh, &plan.plan) || cosmetic_change(&fresh, &plan.plan)
            } else {
                cosmetic_change(&fresh, &plan.plan)
            };
            if quiet {
                info!(cluster = %cluster_name, node = %node_name, version, "Plan changed for update");
                self.coordinator
                    .mutator()
                    .update_node_plan(node, &cluster)
                    .await?;
                return Ok(None);
            }
        }

        self.trigger(&cluster).await
    }

    /// Handle a cluster event. `None` means the cluster is gone.
    pub async fn sync_cluster(
        &self,
        cluster: Option<&Cluster>,
    ) -> Result<Option<CycleReport>, NuoError> {
        let Some(cluster) = cluster else {
            return Ok(None);
        };
        if cluster.is_deleting() {
            return Ok(None);
        }

        if cluster.restore_requested() {
            self.restore(cluster).await?;
            return Ok(None);
        }

        self.trigger(cluster).await
    }

    /// Re-push the current plan to every worker node after an etcd snapshot
    /// restore, then clear the restore annotation.
    pub async fn restore(&self, cluster: &Cluster) -> Result<(), NuoError> {
        let name = cluster.name_any();
        let _guard = self.coordinator.locks().lock(&name).await;

        let version = cluster.node_version();
        let mut nodes = self.store.list_nodes(&name).await?;
        nodes.retain(|n| n.is_worker_only() && n.plan_version() != Some(version));
        let shared = Arc::new(cluster.clone());

        let results: Vec<Result<bool, NuoError>> = stream::iter(nodes)
            .map(|node: Node| {
                let mutator = self.coordinator.mutator().clone();
                let cluster = shared.clone();
                let cluster_name = name.clone();
                async move {
                    let result = mutator.update_node_plan(&node, &cluster).await;
                    if result.is_ok() {
                        info!(cluster = %cluster_name, node = %node.name_any(), version, "Updated node for restore");
                    }
                    result
                }
            })
            .buffer_unordered(RESTORE_CONCURRENCY)
            .collect()
            .await;

        let mut first_error = None;
        for err in results.into_iter().filter_map(Result::err) {
            warn!(cluster = %name, error = %err, "Failed to restore node plan");
            first_error.get_or_insert(err);
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let mut current = cluster.clone();
        let mut attempt = 0;
        loop {
            match self.store.update_cluster(&restored(current)).await {
                Ok(_) => {
                    info!(cluster = %name, "Restored worker nodes");
                    return Ok(());
                }
                Err(e) if e.is_conflict() && attempt < RESTORE_RETRIES => {
                    attempt += 1;
                    debug!(cluster = %name, attempt, "Conflict clearing restore annotation, retrying");
                    tokio::time::sleep(RESTORE_RETRY_INTERVAL).await;
                    current = self.store.get_cluster(&name).await?;
                    if !current.restore_requested() {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn create_node_plan(&self, node: &Node, cluster: &Cluster) -> Result<(), NuoError> {
        if node.node_config().is_none() {
            debug!(node = %node.name_any(), "Waiting for node config before creating plan");
            return Ok(());
        }
        self.coordinator
            .mutator()
            .update_node_plan(node, cluster)
            .await?;
        debug!(node = %node.name_any(), cluster = %cluster.name_any(), "Created node plan");
        Ok(())
    }

    async fn trigger(&self, cluster: &Cluster) -> Result<Option<CycleReport>, NuoError> {
        let trigger = self.coordinator.should_trigger_cycle(cluster).await?;
        if !trigger.should_run() {
            return Ok(None);
        }
        self.coordinator
            .run_upgrade_cycle(&cluster.name_any(), trigger.plan_changed())
            .await
            .map(Some)
    }
}

/// Clear the restore annotation and settle an in-flight upgrade.
fn restored(mut cluster: Cluster) -> Cluster {
    cluster
        .annotations_mut()
        .insert(RESTORE_ANNOTATION.to_string(), "false".to_string());
    if cluster.is_upgrading() {
        cluster.mark_true(ConditionType::Upgraded, "restored worker nodes");
    }
    cluster
}
