//! `Node` custom resource: one machine of a managed cluster.
//!
//! Nodes live in the namespace named after their owning cluster.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::cluster::NodeDrainInput;
use super::condition::{Condition, Conditioned};
use super::plan::NodePlan;

/// `Node` spec: the scheduling state the orchestrator requests from the agent.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "nuo.io",
    version = "v1alpha1",
    kind = "Node",
    namespaced,
    status = "NodeStatus",
    printcolumn = r#"{"name":"DESIRED","type":"string","jsonPath":".spec.desiredNodeUnschedulable"}"#,
    printcolumn = r#"{"name":"PLAN","type":"integer","jsonPath":".status.nodePlan.version"}"#,
    printcolumn = r#"{"name":"APPLIED","type":"integer","jsonPath":".status.appliedNodeVersion"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(default)]
    pub desired_node_unschedulable: DesiredScheduling,

    /// Drain parameters, only set when draining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_drain_input: Option<NodeDrainInput>,
}

/// Scheduling change requested from the node agent.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum DesiredScheduling {
    /// Nothing requested.
    #[default]
    #[serde(rename = "")]
    None,
    /// Cordon: stop scheduling new work.
    #[serde(rename = "true")]
    Cordon,
    /// Cordon and evict workloads.
    #[serde(rename = "drain")]
    Drain,
    /// Return the node to service.
    #[serde(rename = "false")]
    Uncordon,
}

impl std::fmt::Display for DesiredScheduling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, ""),
            Self::Cordon => write!(f, "cordon"),
            Self::Drain => write!(f, "drain"),
            Self::Uncordon => write!(f, "uncordon"),
        }
    }
}

/// Role a node plays in its cluster.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Etcd,
    Controlplane,
    Worker,
}

/// Machine details reported by the node agent.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub role: Vec<NodeRole>,
}

/// Plan pushed to the node agent.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePlanStatus {
    pub plan: NodePlan,

    /// Cluster node version this plan was built for.
    pub version: i64,

    /// Seconds between agent polls.
    #[serde(default)]
    pub agent_check_interval: u64,
}

/// Observed node state.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_config: Option<NodeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_plan: Option<NodePlanStatus>,

    /// Last plan version the agent confirmed. Owned by the agent.
    #[serde(default)]
    pub applied_node_version: i64,

    /// Scheduling state observed by the agent.
    #[serde(default)]
    pub unschedulable: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Node {
    /// Name of the owning cluster.
    pub fn cluster_name(&self) -> Option<String> {
        self.namespace().filter(|ns| !ns.is_empty())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn node_config(&self) -> Option<&NodeConfig> {
        self.status.as_ref().and_then(|s| s.node_config.as_ref())
    }

    /// True when the node's role set is exactly `{worker}`.
    pub fn is_worker_only(&self) -> bool {
        self.node_config().is_some_and(|config| {
            !config.role.is_empty() && config.role.iter().all(|r| *r == NodeRole::Worker)
        })
    }

    pub fn node_plan(&self) -> Option<&NodePlanStatus> {
        self.status.as_ref().and_then(|s| s.node_plan.as_ref())
    }

    pub fn plan_version(&self) -> Option<i64> {
        self.node_plan().map(|p| p.version)
    }

    pub fn applied_node_version(&self) -> i64 {
        self.status.as_ref().map_or(0, |s| s.applied_node_version)
    }

    pub fn is_unschedulable(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.unschedulable)
    }

    pub const fn desired_scheduling(&self) -> DesiredScheduling {
        self.spec.desired_node_unschedulable
    }

    pub fn status_mut(&mut self) -> &mut NodeStatus {
        self.status.get_or_insert_with(NodeStatus::default)
    }
}

impl Conditioned for Node {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status_mut().conditions
    }
}
