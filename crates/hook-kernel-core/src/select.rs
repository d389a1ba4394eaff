use std::cmp::Ordering;

use crate::context::Context;
use crate::hook::Hook;
use crate::policy::Policy;

/// Hooks whose condition holds in `context`, in input order.
#[must_use]
pub fn activate<'a>(hooks: &'a [Hook], context: &Context) -> Vec<&'a Hook> {
    let activated: Vec<&Hook> = hooks.iter().filter(|hook| hook.condition.evaluate(context)).collect();
    tracing::debug!(candidates = hooks.len(), activated = activated.len(), "activation complete");
    activated
}

/// Deterministic winner among `candidates`, or `None` when nothing qualifies.
///
/// Candidates below `policy.selection.min_success_score` are dropped first;
/// the rest are ordered by [`selection_order`].
#[must_use]
pub fn prioritize<'a>(candidates: &[&'a Hook], policy: &Policy) -> Option<&'a Hook> {
    let floor = policy.selection.min_success_score;
    let chosen = candidates
        .iter()
        .copied()
        .filter(|hook| hook.stats.success_score >= floor)
        .min_by(|lhs, rhs| selection_order(lhs, rhs));

    match chosen {
        Some(hook) => tracing::debug!(hook_id = %hook.metadata.id, "selected hook"),
        None => tracing::debug!(candidates = candidates.len(), "no hook selected"),
    }
    chosen
}

/// Total order used by [`prioritize`]; the minimum wins.
#[must_use]
pub fn selection_order(lhs: &Hook, rhs: &Hook) -> Ordering {
    lhs.stats
        .estimated_cost
        .total_cmp(&rhs.stats.estimated_cost)
        .then_with(|| rhs.stats.success_score.total_cmp(&lhs.stats.success_score))
        .then_with(|| rhs.metadata.specificity.cmp(&lhs.metadata.specificity))
        .then_with(|| lhs.metadata.id.cmp(&rhs.metadata.id))
}

/// [`selection_order`] spelled out for reports, most significant first.
#[must_use]
pub fn default_tie_breakers() -> Vec<String> {
    vec![
        "estimated_cost asc".to_string(),
        "success_score desc".to_string(),
        "specificity desc".to_string(),
        "hook_id asc".to_string(),
    ]
}
