//! Tri-state conditions shared by `Cluster` and `Node`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a condition.
///
/// An absent condition reads as `False`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    #[default]
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Condition types understood by the orchestrator.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
pub enum ConditionType {
    /// Machine has been provisioned.
    Provisioned,
    /// Node agent has registered the machine.
    Registered,
    /// Node agent heartbeat reports the machine healthy.
    Ready,
    /// Workloads have been evicted after a drain request.
    Drained,
    /// Node or cluster upgrade state. Unknown while an upgrade is in flight.
    Upgraded,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioned => write!(f, "Provisioned"),
            Self::Registered => write!(f, "Registered"),
            Self::Ready => write!(f, "Ready"),
            Self::Drained => write!(f, "Drained"),
            Self::Upgraded => write!(f, "Upgraded"),
        }
    }
}

/// A single condition entry.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Read and transition conditions on a resource.
///
/// Implementors expose their condition list; reads and the named transitions
/// (`mark_true`, `mark_unknown`, `mark_false`) are provided.
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions()
            .iter()
            .find(|c| c.r#type == condition_type)
    }

    fn condition_status(&self, condition_type: ConditionType) -> ConditionStatus {
        self.condition(condition_type)
            .map(|c| c.status)
            .unwrap_or_default()
    }

    fn is_true(&self, condition_type: ConditionType) -> bool {
        self.condition_status(condition_type) == ConditionStatus::True
    }

    fn is_unknown(&self, condition_type: ConditionType) -> bool {
        self.condition_status(condition_type) == ConditionStatus::Unknown
    }

    fn mark_true(&mut self, condition_type: ConditionType, message: impl Into<String>) {
        set_condition(
            self.conditions_mut(),
            condition_type,
            ConditionStatus::True,
            message.into(),
        );
    }

    fn mark_unknown(&mut self, condition_type: ConditionType, message: impl Into<String>) {
        set_condition(
            self.conditions_mut(),
            condition_type,
            ConditionStatus::Unknown,
            message.into(),
        );
    }

    fn mark_false(&mut self, condition_type: ConditionType, message: impl Into<String>) {
        set_condition(
            self.conditions_mut(),
            condition_type,
            ConditionStatus::False,
            message.into(),
        );
    }
}

/// Upsert a condition. The transition time only moves when the status changes.
fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: ConditionType,
    status: ConditionStatus,
    message: String,
) {
    let message = (!message.is_empty()).then_some(message);

    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        if existing.status != status {
            existing.last_transition_time = Some(Utc::now());
        }
        existing.status = status;
        existing.message = message;
        return;
    }

    conditions.push(Condition {
        r#type: condition_type,
        status,
        reason: None,
        message,
        last_transition_time: Some(Utc::now()),
    });
}
