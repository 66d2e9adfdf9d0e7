//! Custom error types for nuo.

use thiserror::Error;

/// Errors that can occur while orchestrating worker node upgrades.
#[derive(Error, Debug)]
pub enum NuoError {
    #[error("cluster [{cluster}] worker-upgrade: not enough nodes to upgrade: nodes {nodes} notReady {not_ready:?} maxUnavailable {max_unavailable}")]
    TooManyNotReady {
        cluster: String,
        nodes: usize,
        not_ready: Vec<String>,
        max_unavailable: usize,
    },

    #[error("cluster [{cluster}] worker-upgrade: more than allowed nodes upgrading: unavailable {unavailable} maxUnavailable {max_unavailable}")]
    BudgetExceeded {
        cluster: String,
        unavailable: usize,
        max_unavailable: usize,
    },

    #[error("cluster [{cluster}] worker-upgrade: {ready} ready nodes, {required} required before starting")]
    NotEnoughReady {
        cluster: String,
        ready: usize,
        required: usize,
    },

    #[error("Invalid maxUnavailableWorker value: {0}")]
    InvalidBudget(String),

    #[error("Failed to build plan for node [{node}]: {reason}")]
    PlanBuild { node: String, reason: String },

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict updating {0}: object has been modified")]
    Conflict(String),

    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NuoError {
    /// Map a kube client error, distinguishing optimistic-concurrency
    /// conflicts and missing objects from other API failures.
    pub fn kube(resource: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 => Self::Conflict(resource.to_string()),
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound(resource.to_string()),
            _ => Self::KubernetesApi(format!("{resource}: {err}")),
        }
    }

    /// Returns true if the framework should requeue the key with backoff.
    ///
    /// Budget violations, store failures and plan builder failures all clear
    /// up on their own as nodes report progress.
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidBudget(_) | Self::ClusterNotFound(_) | Self::Serialization(_)
        )
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Short label for metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TooManyNotReady { .. } => "too_many_not_ready",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::NotEnoughReady { .. } => "not_enough_ready",
            Self::InvalidBudget(_) => "invalid_budget",
            Self::PlanBuild { .. } => "plan_build",
            Self::ClusterNotFound(_) => "cluster_not_found",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::KubernetesApi(_) => "kubernetes_api",
            Self::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_too_many_not_ready() {
        let err = NuoError::TooManyNotReady {
            cluster: "c1".to_string(),
            nodes: 3,
            not_ready: vec!["n1".to_string(), "n2".to_string()],
            max_unavailable: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("cluster [c1]"));
        assert!(msg.contains("not enough nodes to upgrade"));
        assert!(msg.contains("n1"));
    }

    #[test]
    fn test_error_display_budget_exceeded() {
        let err = NuoError::BudgetExceeded {
            cluster: "c1".to_string(),
            unavailable: 3,
            max_unavailable: 2,
        };
        assert_eq!(
            err.to_string(),
            "cluster [c1] worker-upgrade: more than allowed nodes upgrading: unavailable 3 maxUnavailable 2"
        );
    }

    #[test]
    fn test_error_display_plan_build() {
        let err = NuoError::PlanBuild {
            node: "n1".to_string(),
            reason: "node config not reported".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to build plan for node [n1]: node config not reported"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(
            NuoError::BudgetExceeded {
                cluster: "c".into(),
                unavailable: 2,
                max_unavailable: 1
            }
            .is_retryable()
        );
        assert!(NuoError::Conflict("node n1".into()).is_retryable());
        assert!(NuoError::KubernetesApi("timeout".into()).is_retryable());
        assert!(
            NuoError::PlanBuild {
                node: "n1".into(),
                reason: "x".into()
            }
            .is_retryable()
        );
        assert!(!NuoError::ClusterNotFound("c".into()).is_retryable());
        assert!(!NuoError::InvalidBudget("abc".into()).is_retryable());
    }

    #[test]
    fn test_is_conflict() {
        assert!(NuoError::Conflict("cluster c1".into()).is_conflict());
        assert!(!NuoError::NotFound("cluster c1".into()).is_conflict());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(NuoError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(
            NuoError::NotEnoughReady {
                cluster: "c".into(),
                ready: 0,
                required: 1
            }
            .kind(),
            "not_enough_ready"
        );
    }
}
