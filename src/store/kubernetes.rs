//! `ResourceStore` backed by the Kubernetes API.

use async_trait::async_trait;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use super::ResourceStore;
use crate::crd::{Cluster, Node};
use crate::error::NuoError;

const FIELD_MANAGER: &str = "nuo";

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self, namespace: &str) -> Api<Node> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn clusters(&self) -> Api<Cluster> {
        Api::all(self.client.clone())
    }
}

/// Status merge patch pinned to the resource version returned by the replace.
fn status_patch<S: serde::Serialize>(
    resource_version: Option<String>,
    status: &S,
) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_cluster(&self, name: &str) -> Result<Cluster, NuoError> {
        self.clusters()
            .get_opt(name)
            .await
            .map_err(|e| NuoError::kube(&format!("cluster {name}"), e))?
            .ok_or_else(|| NuoError::ClusterNotFound(name.to_string()))
    }

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>, NuoError> {
        let list = self
            .nodes(cluster)
            .list(&ListParams::default())
            .await
            .map_err(|e| NuoError::kube(&format!("nodes of cluster {cluster}"), e))?;
        Ok(list.items)
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, NuoError> {
        let name = cluster.name_any();
        let resource = format!("cluster {name}");
        let api = self.clusters();

        let updated = api
            .replace(&name, &PostParams::default(), cluster)
            .await
            .map_err(|e| NuoError::kube(&resource, e))?;

        let Some(status) = cluster.status.as_ref() else {
            return Ok(updated);
        };
        debug!(cluster = %name, node_version = status.node_version, "Patching cluster status");

        let patch = status_patch(updated.resource_version(), status);
        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| NuoError::kube(&resource, e))
    }

    async fn update_node(&self, node: &Node) -> Result<Node, NuoError> {
        let name = node.name_any();
        let namespace = node
            .cluster_name()
            .ok_or_else(|| NuoError::NotFound(format!("namespace of node {name}")))?;
        let resource = format!("node {namespace}/{name}");
        let api = self.nodes(&namespace);

        let updated = api
            .replace(&name, &PostParams::default(), node)
            .await
            .map_err(|e| NuoError::kube(&resource, e))?;

        let Some(status) = node.status.as_ref() else {
            return Ok(updated);
        };
        debug!(node = %resource, "Patching node status");

        // Not atomic with the replace. A failed patch leaves the spec half
        // committed; the next cycle reclassifies and rewrites the status.
        let patch = status_patch(updated.resource_version(), status);
        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| NuoError::kube(&resource, e))
    }
}
