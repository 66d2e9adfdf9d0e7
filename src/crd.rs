//! `Cluster` and `Node` CRD type definitions.

pub mod cluster;
pub mod condition;
pub mod node;
pub mod plan;

pub use cluster::{
    Cluster, ClusterSpec, ClusterStatus, DEFAULT_MAX_UNAVAILABLE_WORKER, NodeDrainInput,
    NodeUpgradeStrategy, RESTORE_ANNOTATION,
};
pub use condition::{Condition, ConditionStatus, ConditionType, Conditioned};
pub use node::{
    DesiredScheduling, Node, NodeConfig, NodePlanStatus, NodeRole, NodeSpec, NodeStatus,
};
pub use plan::{FileSpec, HealthCheck, NodePlan, ProcessSpec};
