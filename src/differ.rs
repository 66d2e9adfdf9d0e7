//! Node plan differ.
//!
//! Classifies the difference between a freshly built plan and the stored one:
//! - **disruptive**: the node must be taken out of service to roll it out
//! - **cosmetic**: the stored plan can be replaced without touching scheduling
//!
//! Both checks are evaluated independently; callers give disruptive priority.

use std::collections::BTreeSet;

use crate::crd::{NodePlan, ProcessSpec};

/// Substring marking the bind-mount helper process. Changes to it never
/// require a disruptive rollout.
pub const HELPER_MARKER: &str = "share-mnt";

fn is_helper(key: &str) -> bool {
    key.contains(HELPER_MARKER)
}

/// True if rolling out `new` over `old` needs the node cordoned or drained.
///
/// Symmetric in its arguments.
pub fn disruptive_change(new: &NodePlan, old: &NodePlan) -> bool {
    if new.processes.len() != old.processes.len() {
        return true;
    }

    let new_keys: BTreeSet<&str> = non_helper_keys(new).collect();
    let old_keys: BTreeSet<&str> = non_helper_keys(old).collect();
    if new_keys != old_keys {
        return true;
    }

    new_keys.iter().any(|key| {
        match (new.processes.get(*key), old.processes.get(*key)) {
            (Some(a), Some(b)) => runtime_differs(a, b),
            _ => true,
        }
    })
}

/// True if the stored plan should be replaced without a disruptive rollout.
pub fn cosmetic_change(new: &NodePlan, old: &NodePlan) -> bool {
    if new.files != old.files {
        return true;
    }

    new.processes.iter().any(|(key, a)| {
        let Some(b) = old.processes.get(key) else {
            return false;
        };
        metadata_differs(a, b) || (is_helper(key) && runtime_differs(a, b))
    })
}

fn non_helper_keys(plan: &NodePlan) -> impl Iterator<Item = &str> {
    plan.processes
        .keys()
        .map(String::as_str)
        .filter(|k| !is_helper(k))
}

/// Fields whose change restarts the container.
fn runtime_differs(a: &ProcessSpec, b: &ProcessSpec) -> bool {
    a.image != b.image
        || !same_set(&a.command, &b.command)
        || !same_set(&a.env, &b.env)
        || !same_set(&a.args, &b.args)
        || !same_sequence(a.binds.as_deref(), b.binds.as_deref())
        || !same_sequence(a.volumes_from.as_deref(), b.volumes_from.as_deref())
        || !same_sequence(a.publish.as_deref(), b.publish.as_deref())
        || a.labels != b.labels
        || a.network_mode != b.network_mode
        || a.pid_mode != b.pid_mode
        || a.privileged != b.privileged
}

fn metadata_differs(a: &ProcessSpec, b: &ProcessSpec) -> bool {
    a.name != b.name
        || a.health_check.url != b.health_check.url
        || a.restart_policy != b.restart_policy
        || a.image_registry_auth_config != b.image_registry_auth_config
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

// None and empty compare equal
fn same_sequence(a: Option<&[String]>, b: Option<&[String]>) -> bool {
    a.unwrap_or_default() == b.unwrap_or_default()
}
