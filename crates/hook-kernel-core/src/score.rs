use serde::{Deserialize, Serialize};

use crate::hook::Hook;
use crate::policy::Policy;
use crate::KernelError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }

    fn target(self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Failure => 0.0,
        }
    }
}

/// Record one use of `hook`, moving its score toward the observed outcome by
/// `policy.scoring.alpha`. Failures also count as corrections.
#[must_use]
pub fn update_stats(hook: &Hook, outcome: Outcome, policy: &Policy) -> Hook {
    let mut next = hook.clone();
    let score = next.stats.success_score;
    next.stats.success_score =
        (score + policy.scoring.alpha * (outcome.target() - score)).clamp(0.0, 1.0);
    next.stats.uses = next.stats.uses.saturating_add(1);
    if outcome == Outcome::Failure {
        next.stats.corrections = next.stats.corrections.saturating_add(1);
    }

    tracing::debug!(
        hook_id = %next.metadata.id,
        outcome = outcome.as_str(),
        success_score = next.stats.success_score,
        "updated hook stats"
    );
    next
}

/// Penalise `hook` for an observed correction without a full outcome.
///
/// # Errors
/// Returns [`KernelError::Validation`] when `penalty` is negative or not finite.
pub fn negative_rl_update(hook: &Hook, penalty: f64) -> Result<Hook, KernelError> {
    if !penalty.is_finite() || penalty < 0.0 {
        return Err(KernelError::Validation(format!(
            "penalty MUST be finite and >= 0 (got {penalty})"
        )));
    }

    let mut next = hook.clone();
    next.stats.success_score = (next.stats.success_score - penalty).clamp(0.0, 1.0);
    next.stats.corrections = next.stats.corrections.saturating_add(1);
    tracing::debug!(
        hook_id = %next.metadata.id,
        penalty,
        success_score = next.stats.success_score,
        "applied correction penalty"
    );
    Ok(next)
}
