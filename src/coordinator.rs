//! Per-cluster worker upgrade coordinator.
//!
//! One cycle re-reads the cluster and its nodes, classifies the nodes against
//! `status.nodeVersion`, and moves as many nodes forward as the availability
//! budget allows:
//!
//! ```text
//! Idle -> Preparing -> ReadyToProcess -> Upgrading -> Activating -> Idle
//! ```
//!
//! The cluster's `Upgraded` condition is Unknown while a cycle has work in
//! flight and True once every eligible node is at the target version.

use std::collections::BTreeSet;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::admission::{max_unavailable, required_for_start};
use crate::classifier::{WorkerNodeStatus, classify, is_eligible};
use crate::crd::{
    Cluster, ClusterStatus, ConditionStatus, ConditionType, Conditioned, DesiredScheduling, Node,
};
use crate::differ::disruptive_change;
use crate::error::NuoError;
use crate::lock::KeyedLock;
use crate::mutator::NodeMutator;
use crate::planner::PlanBuilder;
use crate::readiness::{MachineHealth, ReadyCondition};
use crate::store::ResourceStore;

/// Whether a cluster needs an upgrade cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Converged, nothing to do.
    Idle,
    /// A cycle is in flight; keep driving it.
    Continue,
    /// A node's freshly built plan differs disruptively from its stored one.
    PlanChanged,
}

impl Trigger {
    pub const fn should_run(self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub const fn plan_changed(self) -> bool {
        matches!(self, Self::PlanChanged)
    }
}

/// Outcome of one upgrade cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cluster: String,
    pub node_version: i64,
    pub filtered: usize,
    pub done: usize,
    pub upgrading: usize,
    pub not_ready: usize,
    pub max_unavailable: usize,
    /// Nodes out of service after this cycle's preparations.
    pub unavailable: usize,

    /// Nodes asked to cordon or drain.
    pub prepared: Vec<String>,
    /// Nodes that received the target plan for upgrade.
    pub processed: Vec<String>,
    /// Nodes returned to service.
    pub activated: Vec<String>,
    /// Not-ready nodes that received a quiet plan update.
    pub reconciled: Vec<String>,
    /// Nodes skipped because their plan could not be built.
    pub skipped: Vec<String>,

    pub condition: ConditionStatus,
}

impl CycleReport {
    pub fn mutations(&self) -> usize {
        self.prepared.len() + self.processed.len() + self.activated.len() + self.reconciled.len()
    }
}

pub struct UpgradeCoordinator {
    store: Arc<dyn ResourceStore>,
    planner: Arc<dyn PlanBuilder>,
    health: Arc<dyn MachineHealth>,
    mutator: NodeMutator,
    locks: KeyedLock,
}

impl UpgradeCoordinator {
    pub fn new(store: Arc<dyn ResourceStore>, planner: Arc<dyn PlanBuilder>) -> Self {
        Self {
            mutator: NodeMutator::new(store.clone(), planner.clone()),
            store,
            planner,
            health: Arc::new(ReadyCondition),
            locks: KeyedLock::new(),
        }
    }

    #[must_use]
    pub fn with_health(mut self, health: Arc<dyn MachineHealth>) -> Self {
        self.health = health;
        self
    }

    pub const fn mutator(&self) -> &NodeMutator {
        &self.mutator
    }

    pub const fn locks(&self) -> &KeyedLock {
        &self.locks
    }

    /// Decide whether `cluster` needs a cycle, and whether its plan changed.
    pub async fn should_trigger_cycle(&self, cluster: &Cluster) -> Result<Trigger, NuoError> {
        let nodes = self.store.list_nodes(&cluster.name_any()).await?;
        if self.plan_drifted(cluster, &nodes) {
            return Ok(Trigger::PlanChanged);
        }

        Ok(if cluster.is_upgrading() {
            Trigger::Continue
        } else {
            Trigger::Idle
        })
    }

    /// True if any eligible node's freshly built plan differs disruptively
    /// from its stored one.
    fn plan_drifted(&self, cluster: &Cluster, nodes: &[Node]) -> bool {
        let name = cluster.name_any();
        let in_flight = cluster.is_upgrading();
        let version = cluster.node_version();

        for node in nodes.iter().filter(|n| is_eligible(n)) {
            let Some(stored) = node.node_plan() else {
                continue;
            };
            // nodes still catching up always differ
            if in_flight && node.applied_node_version() != version {
                continue;
            }

            let fresh = match self.planner.build_node_plan(cluster, node) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(cluster = %name, node = %node.name_any(), error = %e, "Skipping node in plan check");
                    continue;
                }
            };
            if disruptive_change(&fresh, &stored.plan) {
                info!(cluster = %name, node = %node.name_any(), "Worker plan changed");
                return true;
            }
        }
        false
    }

    /// Run one upgrade cycle for the named cluster.
    ///
    /// Budget violations return a retryable error before any node is touched.
    /// `plan_changed` is re-checked against the state read under the lock, so
    /// a trigger computed from a stale snapshot never bumps the version twice.
    pub async fn run_upgrade_cycle(
        &self,
        cluster_name: &str,
        plan_changed: bool,
    ) -> Result<CycleReport, NuoError> {
        let _guard = self.locks.lock(cluster_name).await;

        let mut cluster = self.store.get_cluster(cluster_name).await?;
        let mut report = CycleReport {
            cluster: cluster_name.to_string(),
            ..Default::default()
        };
        if cluster.is_deleting() {
            debug!(cluster = %cluster_name, "Cluster is being deleted, skipping cycle");
            return Ok(report);
        }

        let strategy = cluster.upgrade_strategy();
        let budget = strategy.max_unavailable_worker.as_str();
        let nodes = self.store.list_nodes(cluster_name).await?;
        let mut status = self.classify(&nodes, &cluster, strategy.drain);

        let plan_changed = plan_changed && self.plan_drifted(&cluster, &nodes);

        let in_flight = cluster.is_upgrading();
        if plan_changed || (!in_flight && !status.all_done()) {
            if !in_flight {
                let required = required_for_start(budget, status.filtered)?;
                let ready = status.filtered - status.not_ready.len();
                if ready < required {
                    return Err(NuoError::NotEnoughReady {
                        cluster: cluster_name.to_string(),
                        ready,
                        required,
                    });
                }
            }

            let mut updated = cluster.clone();
            updated.mark_unknown(ConditionType::Upgraded, "updating worker nodes");
            if plan_changed {
                updated
                    .status
                    .get_or_insert_with(ClusterStatus::default)
                    .node_version += 1;
            }
            cluster = self.store.update_cluster(&updated).await?;
            info!(
                cluster = %cluster_name,
                node_version = cluster.node_version(),
                plan_changed,
                "Started worker upgrade"
            );

            if plan_changed {
                status = self.classify(&nodes, &cluster, strategy.drain);
            }
        }

        let target = cluster.node_version();
        let max = max_unavailable(budget, status.filtered)?;
        report.node_version = target;
        report.filtered = status.filtered;
        report.done = status.done;
        report.upgrading = status.upgrading;
        report.not_ready = status.not_ready.len();
        report.max_unavailable = max;

        if status.not_ready.len() > max {
            return Err(NuoError::TooManyNotReady {
                cluster: cluster_name.to_string(),
                nodes: status.filtered,
                not_ready: names(&status.not_ready),
                max_unavailable: max,
            });
        }

        for node in &status.not_ready {
            if node.plan_version() == Some(target) {
                continue;
            }
            let result = self.mutator.update_node_plan(node, &cluster).await;
            if skip_on_plan_error(result, &mut report)? {
                info!(cluster = %cluster_name, node = %node.name_any(), version = target, "Updated unavailable node plan");
                report.reconciled.push(node.name_any());
            }
        }

        let mut unavailable = status.unavailable();
        if unavailable > max {
            return Err(NuoError::BudgetExceeded {
                cluster: cluster_name.to_string(),
                unavailable,
                max_unavailable: max,
            });
        }

        for node in &status.upgraded {
            if node.is_true(ConditionType::Upgraded) && !awaits_uncordon(node) {
                continue;
            }
            if self.mutator.activate_node(node).await? {
                report.activated.push(node.name_any());
            }
        }

        // not-ready nodes pushed above are stale in `status`
        let reconciled: BTreeSet<String> = report.reconciled.iter().cloned().collect();
        for node in &status.to_process {
            let name = node.name_any();
            // a quiet push may have left the target plan without marking it
            if reconciled.contains(&name)
                || (node.plan_version() == Some(target) && node.is_unknown(ConditionType::Upgraded))
            {
                continue;
            }
            let result = self.mutator.process_node(node, &cluster).await;
            if skip_on_plan_error(result, &mut report)? {
                report.processed.push(name);
            }
        }

        for node in &status.to_prepare {
            if unavailable >= max {
                break;
            }
            unavailable += 1;
            if self.mutator.prepare_node(node, &strategy).await? {
                report.prepared.push(node.name_any());
            }
        }
        report.unavailable = unavailable;

        if status.all_done() && !cluster.is_true(ConditionType::Upgraded) {
            let mut updated = cluster.clone();
            updated.mark_true(ConditionType::Upgraded, "");
            cluster = self.store.update_cluster(&updated).await?;
            info!(cluster = %cluster_name, node_version = target, "Finished worker upgrade");
        }
        report.condition = cluster.condition_status(ConditionType::Upgraded);

        debug!(
            cluster = %cluster_name,
            filtered = report.filtered,
            done = report.done,
            unavailable = report.unavailable,
            max_unavailable = report.max_unavailable,
            mutations = report.mutations(),
            "Finished upgrade cycle"
        );
        Ok(report)
    }

    fn classify<'a>(
        &self,
        nodes: &'a [Node],
        cluster: &Cluster,
        drain: bool,
    ) -> WorkerNodeStatus<'a> {
        classify(nodes, cluster.node_version(), drain, self.health.as_ref())
    }
}

/// A plan builder failure skips the node for this cycle; other errors abort.
fn skip_on_plan_error(
    result: Result<bool, NuoError>,
    report: &mut CycleReport,
) -> Result<bool, NuoError> {
    match result {
        Err(NuoError::PlanBuild { node, reason }) => {
            warn!(cluster = %report.cluster, node = %node, reason = %reason, "Skipping node, plan build failed");
            report.skipped.push(node);
            Ok(false)
        }
        other => other,
    }
}

/// Still cordoned at the target version with no uncordon requested.
fn awaits_uncordon(node: &Node) -> bool {
    node.is_unschedulable() && node.desired_scheduling() != DesiredScheduling::Uncordon
}

fn names(nodes: &[&Node]) -> Vec<String> {
    nodes.iter().map(|n| n.name_any()).collect()
}
