use std::collections::BTreeMap;

use crate::condition::{Condition, Predicate};
use crate::context::{Context, Value};
use crate::hook::{Hook, HookSource, Stats};
use crate::operation::{kinds, Operation, OperationRegistry};
use crate::policy::{CombineWeighting, Policy};
use crate::KernelError;

/// What symbolic execution of an action knows about one key afterwards.
#[derive(Debug, Clone, PartialEq)]
enum Symbolic {
    Known(Value),
    Absent,
    Unknown,
}

/// Hook that runs `first` and then `second`.
///
/// When `first`'s action determines every key of `second`'s condition that it
/// writes, those leaves are folded to constants so the composite condition is
/// checked against the context *before* either action runs. Otherwise, and
/// whenever `first` uses a kind outside [`kinds::STANDARD`] whose writes are
/// opaque, the condition is the plain conjunction of both.
#[must_use]
pub fn compose_nested(first: &Hook, second: &Hook, registry: &OperationRegistry) -> Hook {
    let post_condition = symbolic_effects(&first.action, registry)
        .and_then(|effects| post_condition(&second.condition, &effects))
        .unwrap_or_else(|| second.condition.clone());
    let condition = Condition::and([first.condition.clone(), post_condition]).normalize();

    let mut action = first.action.clone();
    action.extend(second.action.iter().cloned());

    let stats = Stats::new(
        first.stats.success_score * second.stats.success_score,
        first.stats.estimated_cost + second.stats.estimated_cost,
    );
    let id = format!("{}+{}", first.metadata.id, second.metadata.id);
    tracing::debug!(hook_id = %id, specificity = condition.specificity(), "composed hooks");

    Hook::new(id, HookSource::Composed, condition, action, stats)
        .with_tags(merged_tags([first, second]))
}

/// Same hook with every `sequence` marker expanded in place.
#[must_use]
pub fn compose_flat(hook: &Hook) -> Hook {
    let mut flat = Vec::with_capacity(hook.action.len());
    for operation in &hook.action {
        flatten_into(operation, &mut flat);
    }
    let mut next = hook.clone();
    next.action = flat;
    next
}

fn flatten_into(operation: &Operation, flat: &mut Vec<Operation>) {
    if operation.is_sequence() {
        for step in &operation.steps {
            flatten_into(step, flat);
        }
    } else {
        flat.push(operation.clone());
    }
}

/// Merge `hooks` into one hook that fires when any of them would.
///
/// Stats are a weighted mean chosen by `policy.combine.weighting`; use and
/// correction counts are summed.
///
/// # Errors
/// Returns [`KernelError::Validation`] when `hooks` is empty.
pub fn combine_hooks(hooks: &[Hook], policy: &Policy) -> Result<Hook, KernelError> {
    if hooks.is_empty() {
        return Err(KernelError::Validation("combine_hooks requires at least one hook".to_string()));
    }

    let weights = combine_weights(hooks, policy.combine.weighting);
    let total_weight: f64 = weights.iter().sum();
    let weighted = |field: fn(&Stats) -> f64| -> f64 {
        hooks.iter().zip(&weights).map(|(hook, weight)| field(&hook.stats) * weight).sum::<f64>()
            / total_weight
    };

    let stats = Stats {
        success_score: weighted(|stats| stats.success_score).clamp(0.0, 1.0),
        estimated_cost: weighted(|stats| stats.estimated_cost),
        uses: hooks.iter().map(|hook| hook.stats.uses).sum(),
        corrections: hooks.iter().map(|hook| hook.stats.corrections).sum(),
    };
    let condition = Condition::or(hooks.iter().map(|hook| hook.condition.clone())).normalize();
    let action = hooks.iter().flat_map(|hook| hook.action.iter().cloned()).collect();
    let id = hooks.iter().map(|hook| hook.metadata.id.as_str()).collect::<Vec<_>>().join("|");

    tracing::debug!(
        hook_id = %id,
        inputs = hooks.len(),
        weighting = policy.combine.weighting.as_str(),
        "combined hooks"
    );

    Ok(Hook::new(id, HookSource::Combined, condition, action, stats)
        .with_tags(merged_tags(hooks.iter())))
}

#[allow(clippy::cast_precision_loss)]
fn combine_weights(hooks: &[Hook], weighting: CombineWeighting) -> Vec<f64> {
    let uniform = || vec![1.0; hooks.len()];
    match weighting {
        CombineWeighting::Uniform => uniform(),
        CombineWeighting::Uses => {
            if hooks.iter().all(|hook| hook.stats.uses == 0) {
                uniform()
            } else {
                hooks.iter().map(|hook| hook.stats.uses as f64).collect()
            }
        }
    }
}

/// Narrow `hook` to situations where `extra` also holds.
///
/// # Errors
/// Returns [`KernelError::InvalidCondition`] if `extra` is malformed or the
/// refined condition can never hold.
pub fn refine(hook: &Hook, extra: &Condition) -> Result<Hook, KernelError> {
    extra.validate()?;
    let condition = Condition::and([hook.condition.clone(), extra.clone()]).normalize();
    if condition.is_never() {
        return Err(KernelError::InvalidCondition(format!(
            "refining `{}` with `{extra}` is unsatisfiable",
            hook.metadata.id
        )));
    }

    let mut refined = hook.with_condition(condition);
    refined.metadata.id = format!("{}/refined", hook.metadata.id).into();
    refined.metadata.source = HookSource::Refined;
    Ok(refined)
}

fn merged_tags<'a>(hooks: impl IntoIterator<Item = &'a Hook>) -> Vec<String> {
    let mut tags: Vec<String> =
        hooks.into_iter().flat_map(|hook| hook.metadata.tags.iter().cloned()).collect();
    tags.sort();
    tags.dedup();
    tags
}

/// Post-state of each key `action` writes, or `None` if some operation is of
/// a host-registered kind that may write keys other than its target.
fn symbolic_effects(
    action: &[Operation],
    registry: &OperationRegistry,
) -> Option<BTreeMap<String, Symbolic>> {
    let mut effects = BTreeMap::new();
    for operation in action {
        track(operation, registry, &mut effects)?;
    }
    Some(effects)
}

fn track(
    operation: &Operation,
    registry: &OperationRegistry,
    effects: &mut BTreeMap<String, Symbolic>,
) -> Option<()> {
    if !kinds::is_standard(&operation.kind) {
        return None;
    }
    if operation.is_sequence() {
        for step in &operation.steps {
            track(step, registry, effects)?;
        }
        return Some(());
    }
    if operation.target.is_empty() {
        return Some(());
    }

    let target = operation.target.as_str();
    let start = match effects.get(target) {
        Some(Symbolic::Known(value)) => Some(Context::new().with(target, value.clone())),
        Some(Symbolic::Absent) => Some(Context::new()),
        Some(Symbolic::Unknown) | None => {
            let overwrites = operation.kind == kinds::ASSIGN || operation.kind == kinds::UNSET;
            overwrites.then(Context::new)
        }
    };

    let next = start
        .and_then(|context| registry.apply(operation, &context).ok())
        .map_or(Symbolic::Unknown, |context| match context.get(target) {
            Some(value) => Symbolic::Known(value.clone()),
            None => Symbolic::Absent,
        });
    effects.insert(target.to_string(), next);
    Some(())
}

/// `condition` with leaves over written keys folded to constants, or `None`
/// if any written key it reads ends up unknown.
fn post_condition(condition: &Condition, effects: &BTreeMap<String, Symbolic>) -> Option<Condition> {
    if condition
        .keys()
        .into_iter()
        .any(|key| matches!(effects.get(key), Some(Symbolic::Unknown)))
    {
        return None;
    }

    Some(condition.map_leaves(&|predicate: &Predicate| match effects.get(&predicate.key) {
        Some(Symbolic::Known(value)) if predicate.op.apply(value, &predicate.value) => {
            Condition::always()
        }
        Some(Symbolic::Known(_) | Symbolic::Absent) => Condition::never(),
        Some(Symbolic::Unknown) | None => Condition::Leaf(predicate.clone()),
    }))
}
