//! Node plan builders.

use kube::ResourceExt;

use crate::crd::{Cluster, Node, NodePlan};
use crate::error::NuoError;

/// Label added to every rendered process.
pub const NODE_NAME_LABEL: &str = "nuo.io/node-name";

/// Builds the plan a node should run for a cluster's current configuration.
///
/// Must be deterministic: the same cluster and node always yield the same plan.
pub trait PlanBuilder: Send + Sync {
    fn build_node_plan(&self, cluster: &Cluster, node: &Node) -> Result<NodePlan, NuoError>;
}

/// Renders `spec.workerPlan` with per-node placeholders.
///
/// Supported placeholders: `${NODE_NAME}`, `${NODE_ADDRESS}`, `${CLUSTER_NAME}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplatePlanBuilder;

impl PlanBuilder for TemplatePlanBuilder {
    fn build_node_plan(&self, cluster: &Cluster, node: &Node) -> Result<NodePlan, NuoError> {
        let node_name = node.name_any();
        let config = node.node_config().ok_or_else(|| NuoError::PlanBuild {
            node: node_name.clone(),
            reason: "node config not reported".to_string(),
        })?;

        let vars = [
            ("${NODE_NAME}", node_name.as_str()),
            ("${NODE_ADDRESS}", config.address.as_str()),
            ("${CLUSTER_NAME}", cluster.metadata.name.as_deref().unwrap_or_default()),
        ];
        let render = |s: &String| -> String {
            vars.iter()
                .fold(s.clone(), |acc, (key, value)| acc.replace(key, value))
        };
        let render_all = |v: &[String]| -> Vec<String> { v.iter().map(render).collect() };

        let mut plan = cluster.spec.worker_plan.clone();
        for process in plan.processes.values_mut() {
            process.command = render_all(&process.command);
            process.args = render_all(&process.args);
            process.env = render_all(&process.env);
            process.binds = process.binds.as_deref().map(render_all);
            process
                .labels
                .insert(NODE_NAME_LABEL.to_string(), node_name.clone());
        }
        for file in &mut plan.files {
            file.contents = render(&file.contents);
        }

        Ok(plan)
    }
}
