//! Machine health as reported by the node agent.

use crate::crd::{ConditionType, Conditioned, Node};

/// Decides whether a node's machine is healthy enough to upgrade.
pub trait MachineHealth: Send + Sync {
    fn is_machine_ready(&self, node: &Node) -> bool;
}

/// Reads the agent-maintained `Ready` condition.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadyCondition;

impl MachineHealth for ReadyCondition {
    fn is_machine_ready(&self, node: &Node) -> bool {
        node.is_true(ConditionType::Ready)
    }
}
