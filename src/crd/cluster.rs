//! `Cluster` custom resource.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::{Condition, ConditionType, Conditioned};
use super::plan::NodePlan;

/// Annotation set by the provisioner after an etcd snapshot restore.
pub const RESTORE_ANNOTATION: &str = "nuo.io/restore";

/// Worker budget used when a cluster has no upgrade strategy.
pub const DEFAULT_MAX_UNAVAILABLE_WORKER: &str = "10%";

/// `Cluster` spec: the desired worker configuration and how to roll it out.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "nuo.io",
    version = "v1alpha1",
    kind = "Cluster",
    status = "ClusterStatus",
    printcolumn = r#"{"name":"NODE VERSION","type":"integer","jsonPath":".status.nodeVersion"}"#,
    printcolumn = r#"{"name":"UPGRADED","type":"string","jsonPath":".status.conditions[?(@.type==\"Upgraded\")].status"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Rolling upgrade strategy for worker nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_strategy: Option<NodeUpgradeStrategy>,

    /// Worker plan template rendered per node.
    #[serde(default)]
    pub worker_plan: NodePlan,
}

/// How worker nodes are taken out of service during an upgrade.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpgradeStrategy {
    /// Absolute count (`"2"`) or percentage (`"20%"`) of worker nodes.
    #[serde(default = "default_max_unavailable_worker")]
    pub max_unavailable_worker: String,

    /// Drain nodes instead of only cordoning them.
    #[serde(default)]
    pub drain: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_input: Option<NodeDrainInput>,
}

impl Default for NodeUpgradeStrategy {
    fn default() -> Self {
        Self {
            max_unavailable_worker: default_max_unavailable_worker(),
            drain: false,
            drain_input: None,
        }
    }
}

impl NodeUpgradeStrategy {
    /// Drain input to hand to nodes, defaulted when drain is on but unset.
    pub fn effective_drain_input(&self) -> Option<NodeDrainInput> {
        if !self.drain {
            return None;
        }
        Some(self.drain_input.clone().unwrap_or_default())
    }
}

fn default_max_unavailable_worker() -> String {
    DEFAULT_MAX_UNAVAILABLE_WORKER.to_string()
}

/// Parameters for draining a node.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrainInput {
    /// Delete pods not managed by a controller.
    #[serde(default = "default_true")]
    pub force: bool,

    #[serde(default = "default_true")]
    pub ignore_daemon_sets: bool,

    /// Delete pods using emptyDir volumes.
    #[serde(default = "default_true")]
    pub delete_local_data: bool,

    /// Seconds each pod gets to terminate; -1 uses the pod's own value.
    #[serde(default = "default_grace_period")]
    pub grace_period: i64,

    /// Seconds before giving up on the drain.
    #[serde(default = "default_drain_timeout")]
    pub timeout: i64,
}

impl Default for NodeDrainInput {
    fn default() -> Self {
        Self {
            force: true,
            ignore_daemon_sets: true,
            delete_local_data: true,
            grace_period: default_grace_period(),
            timeout: default_drain_timeout(),
        }
    }
}

const fn default_true() -> bool {
    true
}
const fn default_grace_period() -> i64 {
    -1
}
const fn default_drain_timeout() -> i64 {
    60
}

/// Observed cluster state.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Version every worker node should converge to. Only ever increases.
    #[serde(default)]
    pub node_version: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Cluster {
    pub fn node_version(&self) -> i64 {
        self.status.as_ref().map_or(0, |s| s.node_version)
    }

    pub fn upgrade_strategy(&self) -> NodeUpgradeStrategy {
        self.spec.upgrade_strategy.clone().unwrap_or_default()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True while an upgrade cycle is in flight.
    pub fn is_upgrading(&self) -> bool {
        self.is_unknown(ConditionType::Upgraded)
    }

    pub fn restore_requested(&self) -> bool {
        self.annotations()
            .get(RESTORE_ANNOTATION)
            .is_some_and(|v| v == "true")
    }
}

impl Conditioned for Cluster {
    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map_or(&[], |s| s.conditions.as_slice())
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(ClusterStatus::default).conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_defaults() {
        let strategy: NodeUpgradeStrategy = serde_json::from_str("{}").unwrap();
        assert_eq!(strategy.max_unavailable_worker, "10%");
        assert!(!strategy.drain);
        assert!(strategy.effective_drain_input().is_none());
    }

    #[test]
    fn test_drain_input_defaults_when_drain_enabled() {
        let strategy = NodeUpgradeStrategy {
            drain: true,
            ..Default::default()
        };
        let input = strategy.effective_drain_input().unwrap();
        assert!(input.force);
        assert!(input.ignore_daemon_sets);
        assert!(input.delete_local_data);
        assert_eq!(input.grace_period, -1);
        assert_eq!(input.timeout, 60);
    }

    #[test]
    fn test_cluster_without_status() {
        let cluster = Cluster::new("c1", ClusterSpec::default());
        assert_eq!(cluster.node_version(), 0);
        assert!(!cluster.is_upgrading());
        assert!(!cluster.restore_requested());
        assert_eq!(cluster.upgrade_strategy(), NodeUpgradeStrategy::default());
    }

    #[test]
    fn test_mark_condition_creates_status() {
        let mut cluster = Cluster::new("c1", ClusterSpec::default());
        cluster.mark_unknown(ConditionType::Upgraded, "updating worker nodes");
        assert!(cluster.status.is_some());
        assert!(cluster.is_upgrading());
    }

    #[test]
    fn test_restore_annotation() {
        let mut cluster = Cluster::new("c1", ClusterSpec::default());
        cluster
            .annotations_mut()
            .insert(RESTORE_ANNOTATION.to_string(), "true".to_string());
        assert!(cluster.restore_requested());

        cluster
            .annotations_mut()
            .insert(RESTORE_ANNOTATION.to_string(), "false".to_string());
        assert!(!cluster.restore_requested());
    }
}
