//! Resource store abstraction over `Cluster` and `Node` objects.
//!
//! Every update is an optimistic-concurrency write: the object's
//! `resourceVersion` must match the stored one, otherwise the store returns
//! [`NuoError::Conflict`].

pub mod kubernetes;
pub mod memory;

use async_trait::async_trait;

use crate::crd::{Cluster, Node};
use crate::error::NuoError;

pub use kubernetes::KubeStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a cluster by name. Missing clusters yield `ClusterNotFound`.
    async fn get_cluster(&self, name: &str) -> Result<Cluster, NuoError>;

    /// List every node in the cluster's namespace.
    async fn list_nodes(&self, cluster: &str) -> Result<Vec<Node>, NuoError>;

    /// Write spec, metadata and status. Returns the stored object.
    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, NuoError>;

    /// Write spec, metadata and status. Returns the stored object.
    async fn update_node(&self, node: &Node) -> Result<Node, NuoError>;
}
