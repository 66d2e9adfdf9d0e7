//! In-memory `ResourceStore`.
//!
//! Mirrors the API server's optimistic concurrency: every stored object gets
//! a fresh `resourceVersion`, and updates carrying a stale one are rejected.
//! Used by tests and by simulated node agents.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::ResourceExt;
use tokio::sync::RwLock;

use super::ResourceStore;
use crate::crd::{Cluster, Node};
use crate::error::NuoError;

#[derive(Default)]
struct Inner {
    clusters: BTreeMap<String, Cluster>,
    /// Keyed by (namespace, name).
    nodes: BTreeMap<(String, String), Node>,
    revision: u64,
    writes: usize,
    pending_conflicts: usize,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cluster unconditionally, as an external writer would.
    pub async fn put_cluster(&self, mut cluster: Cluster) -> Cluster {
        let mut inner = self.inner.write().await;
        cluster.metadata.resource_version = Some(inner.next_revision());
        inner
            .clusters
            .insert(cluster.name_any(), cluster.clone());
        cluster
    }

    /// Store a node unconditionally, as the node agent would.
    pub async fn put_node(&self, mut node: Node) -> Node {
        let mut inner = self.inner.write().await;
        node.metadata.resource_version = Some(inner.next_revision());
        let key = (node.namespace().unwrap_or_default(), node.name_any());
        inner.nodes.insert(key, node.clone());
        node
    }

    pub async fn cluster(&self, name: &str) -> Option<Cluster> {
        self.inner.read().await.clusters.get(name).cloned()
    }

    pub async fn node(&self, namespace: &str, name: &str) -> Option<Node> {
        self.inner
            .read()
            .await
            .nodes
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of successful `update_*` calls.
    pub async fn write_count(&self) -> usize {
        self.inner.read().await.writes
    }

    /// Reject the next `count` updates with a conflict.
    pub async fn inject_conflicts(&self, count: usize) {
        self.inner.write().await.pending_conflicts = count;
    }
}

fn check_version(
    resource: &str,
    stored: Option<&String>,
    incoming: Option<&String>,
) -> Result<(), NuoError> {
    if stored == incoming {
        Ok(())
    } else {
        Err(NuoError::Conflict(resource.to_string()))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_cluster(&self, name: &str) -> Result<Cluster, NuoError> {
        self.cluster(name)
            .await
            .ok_or_else(|| NuoError::ClusterNotFound(name.to_string()))
    }

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>, NuoError> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .iter()
            .filter(|((namespace, _), _)| namespace == cluster)
            .map(|(_, node)| node.clone())
            .collect())
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, NuoError> {
        let name = cluster.name_any();
        let resource = format!("cluster {name}");
        let mut inner = self.inner.write().await;

        if inner.pending_conflicts > 0 {
            inner.pending_conflicts -= 1;
            return Err(NuoError::Conflict(resource));
        }

        let stored = inner
            .clusters
            .get(&name)
            .ok_or_else(|| NuoError::NotFound(resource.clone()))?;
        check_version(
            &resource,
            stored.metadata.resource_version.as_ref(),
            cluster.metadata.resource_version.as_ref(),
        )?;

        let mut updated = cluster.clone();
        updated.metadata.resource_version = Some(inner.next_revision());
        inner.clusters.insert(name, updated.clone());
        inner.writes += 1;
        Ok(updated)
    }

    async fn update_node(&self, node: &Node) -> Result<Node, NuoError> {
        let key = (node.namespace().unwrap_or_default(), node.name_any());
        let resource = format!("node {}/{}", key.0, key.1);
        let mut inner = self.inner.write().await;

        if inner.pending_conflicts > 0 {
            inner.pending_conflicts -= 1;
            return Err(NuoError::Conflict(resource));
        }

        let stored = inner
            .nodes
            .get(&key)
            .ok_or_else(|| NuoError::NotFound(resource.clone()))?;
        check_version(
            &resource,
            stored.metadata.resource_version.as_ref(),
            node.metadata.resource_version.as_ref(),
        )?;

        let mut updated = node.clone();
        updated.metadata.resource_version = Some(inner.next_revision());
        inner.nodes.insert(key, updated.clone());
        inner.writes += 1;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterSpec, NodeSpec};

    fn node(namespace: &str, name: &str) -> Node {
        let mut node = Node::new(name, NodeSpec::default());
        node.metadata.namespace = Some(namespace.to_string());
        node
    }

    #[tokio::test]
    async fn test_update_bumps_resource_version() {
        let store = MemoryStore::new();
        let cluster = store.put_cluster(Cluster::new("c1", ClusterSpec::default())).await;

        let updated = store.update_cluster(&cluster).await.unwrap();
        assert_ne!(
            updated.metadata.resource_version,
            cluster.metadata.resource_version
        );
        assert_eq!(store.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let stale = store.put_node(node("c1", "n1")).await;
        store.update_node(&stale).await.unwrap();

        let err = store.update_node(&stale).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_list_nodes_by_namespace() {
        let store = MemoryStore::new();
        store.put_node(node("c1", "n1")).await;
        store.put_node(node("c1", "n2")).await;
        store.put_node(node("c2", "n1")).await;

        assert_eq!(store.list_nodes("c1").await.unwrap().len(), 2);
        assert_eq!(store.list_nodes("c2").await.unwrap().len(), 1);
        assert!(store.list_nodes("c3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster() {
        let store = MemoryStore::new();
        let err = store.get_cluster("nope").await.unwrap_err();
        assert!(matches!(err, NuoError::ClusterNotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let store = MemoryStore::new();
        let cluster = store.put_cluster(Cluster::new("c1", ClusterSpec::default())).await;
        store.inject_conflicts(2).await;

        assert!(store.update_cluster(&cluster).await.unwrap_err().is_conflict());
        assert!(store.update_cluster(&cluster).await.unwrap_err().is_conflict());
        assert!(store.update_cluster(&cluster).await.is_ok());
    }
}
