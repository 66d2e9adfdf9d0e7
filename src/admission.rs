//! Admission control: how many worker nodes may be out of service at once.
//!
//! Budgets are `IntOrString` values as in Kubernetes rolling updates:
//! `"2"` is an absolute count, `"20%"` a percentage of eligible nodes.
//! Percentages round down.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::error::NuoError;

/// Parse a `maxUnavailableWorker` string into an `IntOrString`.
pub fn parse_budget(value: &str) -> Result<IntOrString, NuoError> {
    let value = value.trim();
    let invalid = || NuoError::InvalidBudget(value.to_string());

    if let Some(percent) = value.strip_suffix('%') {
        let parsed: i32 = percent.trim().parse().map_err(|_| invalid())?;
        if parsed < 0 {
            return Err(invalid());
        }
        return Ok(IntOrString::String(value.to_string()));
    }

    let parsed: i32 = value.parse().map_err(|_| invalid())?;
    if parsed < 0 {
        return Err(invalid());
    }
    Ok(IntOrString::Int(parsed))
}

/// Resolve a budget against the eligible node count.
pub fn resolve(budget: &IntOrString, total: usize) -> Result<usize, NuoError> {
    match budget {
        IntOrString::Int(n) => usize::try_from(*n).map_err(|_| NuoError::InvalidBudget(n.to_string())),
        IntOrString::String(s) => {
            let percent: usize = s
                .strip_suffix('%')
                .map(str::trim)
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| NuoError::InvalidBudget(s.clone()))?;
            Ok(total.saturating_mul(percent) / 100)
        }
    }
}

/// Upper bound on simultaneously unavailable nodes. Never below one, so an
/// upgrade can always make progress.
pub fn max_unavailable(budget: &str, total: usize) -> Result<usize, NuoError> {
    let resolved = resolve(&parse_budget(budget)?, total)?;
    Ok(resolved.max(1))
}

/// Ready nodes an idle cluster needs before it starts a new cycle.
pub fn required_for_start(budget: &str, total: usize) -> Result<usize, NuoError> {
    let resolved = resolve(&parse_budget(budget)?, total)?;
    Ok(total.saturating_sub(resolved))
}
