//! Worker node classification.
//!
//! Buckets every node of a cluster by where it stands relative to the target
//! node version. Buckets borrow from the listed nodes; nothing is mutated.

use tracing::debug;

use crate::crd::{ConditionType, Conditioned, DesiredScheduling, Node};
use crate::readiness::MachineHealth;

/// Classification of a cluster's worker nodes against a target version.
#[derive(Debug, Default)]
pub struct WorkerNodeStatus<'a> {
    /// Eligible nodes whose machine is not ready.
    pub not_ready: Vec<&'a Node>,
    /// Prepared nodes that should receive the target plan.
    pub to_process: Vec<&'a Node>,
    /// Nodes at the target version that still need activating.
    pub upgraded: Vec<&'a Node>,
    /// Nodes that need cordoning or draining.
    pub to_prepare: Vec<&'a Node>,

    /// Eligible worker nodes.
    pub filtered: usize,
    /// Nodes out of service because of the upgrade.
    pub upgrading: usize,
    /// Nodes at the target version and back in service.
    pub done: usize,
}

impl WorkerNodeStatus<'_> {
    /// Nodes currently counted against the budget.
    pub fn unavailable(&self) -> usize {
        self.upgrading + self.not_ready.len()
    }

    pub fn all_done(&self) -> bool {
        self.done == self.filtered
    }
}

/// True if a node is managed by the worker upgrader at all.
pub fn is_eligible(node: &Node) -> bool {
    !node.is_deleting()
        && node.node_config().is_some()
        && node.is_worker_only()
        && node.is_true(ConditionType::Provisioned)
        && node.is_true(ConditionType::Registered)
}

/// Classify `nodes` against `target_version`.
///
/// `drain` selects what "prepared" means: `Drained=True` when draining,
/// observed unschedulable when only cordoning.
pub fn classify<'a>(
    nodes: &'a [Node],
    target_version: i64,
    drain: bool,
    health: &dyn MachineHealth,
) -> WorkerNodeStatus<'a> {
    let mut status = WorkerNodeStatus::default();

    for node in nodes {
        if !is_eligible(node) {
            continue;
        }
        status.filtered += 1;

        let upgrading_condition = node.is_unknown(ConditionType::Upgraded);

        if !health.is_machine_ready(node) {
            status.not_ready.push(node);
            if upgrading_condition {
                status.to_process.push(node);
            }
            continue;
        }

        if node.applied_node_version() == target_version {
            if upgrading_condition || node.is_unschedulable() {
                if node.is_unschedulable() {
                    status.upgrading += 1;
                }
                status.upgraded.push(node);
            } else {
                status.done += 1;
            }
            continue;
        }

        if is_prepared(node, drain) {
            status.to_process.push(node);
            status.upgrading += 1;
            continue;
        }

        if is_preparing(node, drain) {
            status.upgrading += 1;
            continue;
        }

        status.to_prepare.push(node);
    }

    debug!(
        target_version,
        filtered = status.filtered,
        done = status.done,
        upgrading = status.upgrading,
        not_ready = status.not_ready.len(),
        to_prepare = status.to_prepare.len(),
        to_process = status.to_process.len(),
        upgraded = status.upgraded.len(),
        "Classified worker nodes"
    );

    status
}

fn is_prepared(node: &Node, drain: bool) -> bool {
    if drain {
        node.is_true(ConditionType::Drained)
    } else {
        node.is_unschedulable()
    }
}

fn is_preparing(node: &Node, drain: bool) -> bool {
    let expected = if drain {
        DesiredScheduling::Drain
    } else {
        DesiredScheduling::Cordon
    };
    node.desired_scheduling() == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{NodeConfig, NodeRole, NodeSpec};
    use crate::readiness::ReadyCondition;

    fn worker(name: &str, applied: i64) -> Node {
        let mut node = Node::new(name, NodeSpec::default());
        node.metadata.namespace = Some("c1".to_string());
        let status = node.status_mut();
        status.node_config = Some(NodeConfig {
            address: "10.0.0.1".to_string(),
            role: vec![NodeRole::Worker],
        });
        status.applied_node_version = applied;
        node.mark_true(ConditionType::Provisioned, "");
        node.mark_true(ConditionType::Registered, "");
        node.mark_true(ConditionType::Ready, "");
        node
    }

    #[test]
    fn test_ineligible_nodes_are_skipped() {
        let mut control = worker("cp", 0);
        control.status_mut().node_config = Some(NodeConfig {
            address: "10.0.0.2".to_string(),
            role: vec![NodeRole::Controlplane, NodeRole::Worker],
        });

        let mut unregistered = worker("new", 0);
        unregistered.mark_false(ConditionType::Registered, "");

        let mut no_config = worker("bare", 0);
        no_config.status_mut().node_config = None;

        let nodes = vec![control, unregistered, no_config];
        let status = classify(&nodes, 1, false, &ReadyCondition);
        assert_eq!(status.filtered, 0);
        assert!(status.to_prepare.is_empty());
    }

    #[test]
    fn test_done_and_to_prepare() {
        let nodes = vec![worker("n1", 2), worker("n2", 1)];
        let status = classify(&nodes, 2, false, &ReadyCondition);

        assert_eq!(status.filtered, 2);
        assert_eq!(status.done, 1);
        assert_eq!(status.upgrading, 0);
        assert_eq!(status.to_prepare.len(), 1);
        assert_eq!(status.to_prepare[0].metadata.name.as_deref(), Some("n2"));
        assert!(!status.all_done());
    }

    #[test]
    fn test_not_ready_with_outstanding_push_is_also_processed() {
        let mut n1 = worker("n1", 1);
        n1.mark_false(ConditionType::Ready, "");
        n1.mark_unknown(ConditionType::Upgraded, "updating to version 2");
        let mut n2 = worker("n2", 1);
        n2.mark_false(ConditionType::Ready, "");

        let nodes = vec![n1, n2];
        let status = classify(&nodes, 2, false, &ReadyCondition);

        assert_eq!(status.not_ready.len(), 2);
        assert_eq!(status.to_process.len(), 1);
        assert_eq!(status.unavailable(), 2);
    }

    #[test]
    fn test_upgraded_nodes_need_activation() {
        let mut pushed = worker("pushed", 2);
        pushed.mark_unknown(ConditionType::Upgraded, "updating to version 2");
        let mut cordoned = worker("cordoned", 2);
        cordoned.status_mut().unschedulable = true;

        let nodes = vec![pushed, cordoned];
        let status = classify(&nodes, 2, false, &ReadyCondition);

        assert_eq!(status.upgraded.len(), 2);
        assert_eq!(status.upgrading, 1);
        assert_eq!(status.done, 0);
    }

    #[test]
    fn test_cordon_strategy_prepared_and_preparing() {
        let mut prepared = worker("prepared", 1);
        prepared.status_mut().unschedulable = true;
        let mut preparing = worker("preparing", 1);
        preparing.spec.desired_node_unschedulable = DesiredScheduling::Cordon;

        let nodes = vec![prepared, preparing];
        let status = classify(&nodes, 2, false, &ReadyCondition);

        assert_eq!(status.to_process.len(), 1);
        assert_eq!(status.upgrading, 2);
        assert!(status.to_prepare.is_empty());
    }

    #[test]
    fn test_drain_strategy_uses_drained_condition() {
        let mut cordoned_only = worker("cordoned", 1);
        cordoned_only.status_mut().unschedulable = true;
        let mut drained = worker("drained", 1);
        drained.mark_true(ConditionType::Drained, "");
        let mut draining = worker("draining", 1);
        draining.spec.desired_node_unschedulable = DesiredScheduling::Drain;

        let nodes = vec![cordoned_only, drained, draining];
        let status = classify(&nodes, 2, true, &ReadyCondition);

        assert_eq!(status.to_process.len(), 1);
        assert_eq!(status.to_process[0].metadata.name.as_deref(), Some("drained"));
        assert_eq!(status.upgrading, 2);
        assert_eq!(status.to_prepare.len(), 1);
    }
}
