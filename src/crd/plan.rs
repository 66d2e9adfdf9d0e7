//! Node plan types: the processes and files a node agent must run.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Everything a node should be running for a given plan version.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePlan {
    /// Managed processes keyed by process name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub processes: BTreeMap<String, ProcessSpec>,

    /// Files to materialize on the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileSpec>,
}

/// A single managed container process.
///
/// `binds`, `volumes_from` and `publish` are optional sequences: `None` and an
/// empty list mean the same thing.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Container name.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub image: String,

    /// Auth config for pulling `image` from a private registry.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_registry_auth_config: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment as `KEY=value` entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binds: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes_from: Option<Vec<String>>,

    /// Host port publications, e.g. `10250:10250/tcp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_mode: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pid_mode: String,

    #[serde(default)]
    pub privileged: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart_policy: String,

    #[serde(default)]
    pub health_check: HealthCheck,

    /// User the container runs as.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
}

/// Process health check.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// A file the agent writes on the node.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    /// Absolute path on the node.
    pub name: String,
    #[serde(default)]
    pub contents: String,
}
