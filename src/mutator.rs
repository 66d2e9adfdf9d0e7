//! Node mutations requested by the upgrade coordinator.
//!
//! Every method is idempotent: when the node already carries the requested
//! state nothing is written and `Ok(false)` is returned.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info};

use crate::crd::{
    Cluster, ConditionType, Conditioned, DesiredScheduling, Node, NodePlanStatus,
    NodeUpgradeStrategy,
};
use crate::error::NuoError;
use crate::planner::PlanBuilder;
use crate::store::ResourceStore;

/// Agent poll interval for plans pushed outside an upgrade.
pub const DEFAULT_AGENT_CHECK_INTERVAL: u64 = 120;

/// Agent poll interval while the node is upgrading.
pub const UPGRADE_AGENT_CHECK_INTERVAL: u64 = 35;

#[derive(Clone)]
pub struct NodeMutator {
    store: Arc<dyn ResourceStore>,
    planner: Arc<dyn PlanBuilder>,
}

impl NodeMutator {
    pub fn new(store: Arc<dyn ResourceStore>, planner: Arc<dyn PlanBuilder>) -> Self {
        Self { store, planner }
    }

    /// Ask the agent to cordon the node, or drain it when the strategy drains.
    pub async fn prepare_node(
        &self,
        node: &Node,
        strategy: &NodeUpgradeStrategy,
    ) -> Result<bool, NuoError> {
        let desired = if strategy.drain {
            DesiredScheduling::Drain
        } else {
            DesiredScheduling::Cordon
        };
        let drain_input = strategy.effective_drain_input();

        if node.desired_scheduling() == desired && node.spec.node_drain_input == drain_input {
            return Ok(false);
        }

        let mut updated = node.clone();
        updated.spec.desired_node_unschedulable = desired;
        updated.spec.node_drain_input = drain_input;
        self.store.update_node(&updated).await?;

        info!(node = %node.name_any(), action = %desired, "Prepared node for upgrade");
        Ok(true)
    }

    /// Push the cluster's current plan and mark the node as upgrading.
    pub async fn process_node(&self, node: &Node, cluster: &Cluster) -> Result<bool, NuoError> {
        self.set_node_plan(node, cluster, true).await
    }

    /// Push the cluster's current plan without touching the upgrade state.
    pub async fn update_node_plan(&self, node: &Node, cluster: &Cluster) -> Result<bool, NuoError> {
        self.set_node_plan(node, cluster, false).await
    }

    /// Mark the node upgraded and return it to service.
    pub async fn activate_node(&self, node: &Node) -> Result<bool, NuoError> {
        if node.is_true(ConditionType::Upgraded)
            && node.desired_scheduling() == DesiredScheduling::Uncordon
            && node.spec.node_drain_input.is_none()
            && !node.is_true(ConditionType::Drained)
        {
            return Ok(false);
        }

        let mut updated = node.clone();
        updated.mark_true(ConditionType::Upgraded, "");
        if updated.is_true(ConditionType::Drained) {
            updated.mark_false(ConditionType::Drained, "");
        }
        updated.spec.desired_node_unschedulable = DesiredScheduling::Uncordon;
        updated.spec.node_drain_input = None;
        self.store.update_node(&updated).await?;

        info!(node = %node.name_any(), "Activated upgraded node");
        Ok(true)
    }

    async fn set_node_plan(
        &self,
        node: &Node,
        cluster: &Cluster,
        upgrade: bool,
    ) -> Result<bool, NuoError> {
        let plan = self.planner.build_node_plan(cluster, node)?;
        let version = cluster.node_version();

        let agent_check_interval = if upgrade {
            UPGRADE_AGENT_CHECK_INTERVAL
        } else {
            node.node_plan()
                .map(|p| p.agent_check_interval)
                .filter(|interval| *interval > 0)
                .unwrap_or(DEFAULT_AGENT_CHECK_INTERVAL)
        };
        let node_plan = NodePlanStatus {
            plan,
            version,
            agent_check_interval,
        };

        let unchanged = node.node_plan() == Some(&node_plan)
            && (!upgrade || node.is_unknown(ConditionType::Upgraded));
        if unchanged {
            return Ok(false);
        }

        let mut updated = node.clone();
        updated.status_mut().node_plan = Some(node_plan);
        if upgrade {
            updated.mark_unknown(
                ConditionType::Upgraded,
                format!("updating to version {version}"),
            );
        }
        self.store.update_node(&updated).await?;

        if upgrade {
            info!(node = %node.name_any(), version, "Pushed upgrade plan to node");
        } else {
            debug!(node = %node.name_any(), version, "Updated node plan");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterSpec, ClusterStatus, NodeConfig, NodeRole, NodeSpec, ProcessSpec};
    use crate::planner::TemplatePlanBuilder;
    use crate::store::MemoryStore;

    fn cluster(version: i64) -> Cluster {
        let mut spec = ClusterSpec::default();
        spec.worker_plan.processes.insert(
            "kubelet".to_string(),
            ProcessSpec {
                name: "kubelet".to_string(),
                image: "rancher/hyperkube:v1.31.2".to_string(),
                ..Default::default()
            },
        );
        let mut cluster = Cluster::new("c1", spec);
        cluster.status = Some(ClusterStatus {
            node_version: version,
            ..Default::default()
        });
        cluster
    }

    fn worker(name: &str) -> Node {
        let mut node = Node::new(name, NodeSpec::default());
        node.metadata.namespace = Some("c1".to_string());
        node.status_mut().node_config = Some(NodeConfig {
            address: "10.0.0.1".to_string(),
            role: vec![NodeRole::Worker],
        });
        node
    }

    async fn setup(node: Node) -> (Arc<MemoryStore>, NodeMutator, Node) {
        let store = Arc::new(MemoryStore::new());
        let node = store.put_node(node).await;
        let mutator = NodeMutator::new(store.clone(), Arc::new(TemplatePlanBuilder));
        (store, mutator, node)
    }

    #[tokio::test]
    async fn test_prepare_cordon() {
        let (store, mutator, node) = setup(worker("n1")).await;
        let strategy = NodeUpgradeStrategy::default();

        assert!(mutator.prepare_node(&node, &strategy).await.unwrap());
        let stored = store.node("c1", "n1").await.unwrap();
        assert_eq!(stored.desired_scheduling(), DesiredScheduling::Cordon);
        assert!(stored.spec.node_drain_input.is_none());

        assert!(!mutator.prepare_node(&stored, &strategy).await.unwrap());
        assert_eq!(store.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_prepare_drain_sets_input() {
        let (store, mutator, node) = setup(worker("n1")).await;
        let strategy = NodeUpgradeStrategy {
            drain: true,
            ..Default::default()
        };

        mutator.prepare_node(&node, &strategy).await.unwrap();
        let stored = store.node("c1", "n1").await.unwrap();
        assert_eq!(stored.desired_scheduling(), DesiredScheduling::Drain);
        assert_eq!(stored.spec.node_drain_input, strategy.effective_drain_input());
    }

    #[tokio::test]
    async fn test_process_node_marks_upgrading() {
        let (store, mutator, node) = setup(worker("n1")).await;

        assert!(mutator.process_node(&node, &cluster(3)).await.unwrap());
        let stored = store.node("c1", "n1").await.unwrap();
        let plan = stored.node_plan().unwrap();
        assert_eq!(plan.version, 3);
        assert_eq!(plan.agent_check_interval, UPGRADE_AGENT_CHECK_INTERVAL);
        assert!(stored.is_unknown(ConditionType::Upgraded));

        assert!(!mutator.process_node(&stored, &cluster(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_quiet_update_keeps_interval() {
        let mut node = worker("n1");
        node.status_mut().node_plan = Some(NodePlanStatus {
            version: 1,
            agent_check_interval: 300,
            ..Default::default()
        });
        let (store, mutator, node) = setup(node).await;

        mutator.update_node_plan(&node, &cluster(2)).await.unwrap();
        let stored = store.node("c1", "n1").await.unwrap();
        assert_eq!(stored.plan_version(), Some(2));
        assert_eq!(stored.node_plan().unwrap().agent_check_interval, 300);
        assert!(!stored.is_unknown(ConditionType::Upgraded));
    }

    #[tokio::test]
    async fn test_quiet_update_defaults_interval() {
        let (store, mutator, node) = setup(worker("n1")).await;

        mutator.update_node_plan(&node, &cluster(1)).await.unwrap();
        let stored = store.node("c1", "n1").await.unwrap();
        assert_eq!(
            stored.node_plan().unwrap().agent_check_interval,
            DEFAULT_AGENT_CHECK_INTERVAL
        );
    }

    #[tokio::test]
    async fn test_activate_node() {
        let mut node = worker("n1");
        node.spec.desired_node_unschedulable = DesiredScheduling::Drain;
        node.spec.node_drain_input = Some(Default::default());
        node.mark_unknown(ConditionType::Upgraded, "updating to version 2");
        node.mark_true(ConditionType::Drained, "");
        let (store, mutator, node) = setup(node).await;

        assert!(mutator.activate_node(&node).await.unwrap());
        let stored = store.node("c1", "n1").await.unwrap();
        assert!(stored.is_true(ConditionType::Upgraded));
        assert!(!stored.is_true(ConditionType::Drained));
        assert_eq!(stored.desired_scheduling(), DesiredScheduling::Uncordon);
        assert!(stored.spec.node_drain_input.is_none());

        assert!(!mutator.activate_node(&stored).await.unwrap());
    }

    #[tokio::test]
    async fn test_plan_build_failure_writes_nothing() {
        let mut node = worker("n1");
        node.status_mut().node_config = None;
        let (store, mutator, node) = setup(node).await;

        let err = mutator.process_node(&node, &cluster(2)).await.unwrap_err();
        assert!(matches!(err, NuoError::PlanBuild { .. }));
        assert_eq!(store.write_count().await, 0);
    }
}
