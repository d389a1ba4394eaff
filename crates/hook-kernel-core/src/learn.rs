use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::condition::Condition;
use crate::context::Context;
use crate::hook::{Hook, HookSource, Stats};
use crate::operation::{Operation, OperationRegistry};
use crate::policy::Policy;
use crate::KernelError;

pub const DELTA_TAG: &str = "delta";

/// Derive a hook from an observed `before` -> `after` transition.
///
/// The condition pins every changed or user-targeted key to its `before`
/// value (or, for keys absent before, to "not the `after` value"). The action
/// is the per-key diff followed by the user actions the diff does not already
/// imply.
///
/// # Errors
/// Returns [`KernelError::UnknownOperationKind`] or
/// [`KernelError::InvalidOperation`] if a user action cannot be costed, and
/// [`KernelError::InvalidCondition`] if a context value cannot be expressed as
/// a leaf.
pub fn learn_delta(
    before: &Context,
    after: &Context,
    user_actions: &[Operation],
    policy: &Policy,
    registry: &OperationRegistry,
) -> Result<Hook, KernelError> {
    let changed = before.diff(after);
    let diff_ops: Vec<Operation> = changed
        .iter()
        .map(|key| match after.get(key) {
            Some(value) => Operation::assign(key.as_str(), value.clone()),
            None => Operation::unset(key.as_str()),
        })
        .collect();

    let changed_keys: BTreeSet<&str> = changed.iter().map(String::as_str).collect();
    let extra: Vec<Operation> = user_actions
        .iter()
        .filter(|action| !is_implied(action, &diff_ops, &changed_keys))
        .cloned()
        .collect();

    let mut condition_keys = changed_keys.clone();
    for action in user_actions {
        condition_keys.extend(action.targets());
    }
    let leaves = condition_keys.into_iter().filter_map(|key| match (before.get(key), after.get(key)) {
        (Some(prior), _) => Some(Condition::eq(key, prior.clone())),
        (None, Some(next)) => Some(Condition::not(Condition::eq(key, next.clone()))),
        (None, None) => None,
    });
    let condition = Condition::and(leaves).normalize();
    condition.validate()?;

    let mut action = diff_ops;
    action.extend(extra);
    let estimated_cost = registry.total_cost(&action)?;

    let id = learned_id(&condition, &action)?;
    tracing::debug!(
        hook_id = %id,
        changed = changed.len(),
        operations = action.len(),
        "learned hook from delta"
    );

    Ok(Hook::new(
        id,
        HookSource::Learned,
        condition,
        action,
        Stats::new(policy.learning.prior_success, estimated_cost),
    )
    .with_tags([DELTA_TAG]))
}

fn is_implied(action: &Operation, diff_ops: &[Operation], changed: &BTreeSet<&str>) -> bool {
    if diff_ops.contains(action) {
        return true;
    }
    let targets = action.targets();
    !targets.is_empty() && targets.iter().all(|target| changed.contains(target))
}

fn learned_id(condition: &Condition, action: &[Operation]) -> Result<String, KernelError> {
    let action_json = serde_json::to_string(action)
        .map_err(|err| KernelError::Validation(format!("failed to encode learned action: {err}")))?;

    let mut hasher = Sha256::new();
    hasher.update(condition.canonical_key().as_bytes());
    hasher.update(action_json.as_bytes());
    let digest_hex = hex::encode(hasher.finalize());
    Ok(format!("learned-{}", &digest_hex[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Value;
    use crate::execute::execute;
    use crate::fixtures::battery_context;

    fn learn(before: &Context, after: &Context, actions: &[Operation]) -> Hook {
        match learn_delta(before, after, actions, &Policy::default(), &OperationRegistry::standard()) {
            Ok(hook) => hook,
            Err(err) => panic!("learning should succeed: {err}"),
        }
    }

    #[test]
    fn identical_contexts_without_actions_learn_a_noop_hook() {
        let ctx = battery_context(20, false);
        let hook = learn(&ctx, &ctx, &[]);
        assert!(hook.action.is_empty());
        assert!(hook.condition.is_always());
        assert_eq!(hook.specificity(), 0);
        assert!((hook.stats.estimated_cost).abs() < f64::EPSILON);
        assert!(hook.validate().is_ok());
    }

    #[test]
    fn plugging_in_is_learned_as_guarded_assignment() {
        let before = battery_context(20, false);
        let after = battery_context(20, true);
        let hook = learn(&before, &after, &[]);

        assert_eq!(hook.condition, Condition::eq("charging", false));
        assert_eq!(hook.action, vec![Operation::assign("charging", true)]);
        assert_eq!(hook.metadata.source, HookSource::Learned);
        assert_eq!(hook.metadata.tags, vec![DELTA_TAG.to_string()]);
        assert!((hook.stats.success_score - 0.5).abs() < f64::EPSILON);
        assert_eq!(hook.stats.uses, 0);
        assert!(hook.metadata.id.as_str().starts_with("learned-"));
        assert_eq!(hook.metadata.id.as_str().len(), "learned-".len() + 16);

        match execute(&hook, &before, &OperationRegistry::standard()) {
            Ok(execution) => assert_eq!(execution.context, after),
            Err(err) => panic!("learned hook should replay: {err}"),
        }
    }

    #[test]
    fn added_and_removed_keys_use_absence_aware_leaves() {
        let before = Context::from_iter([("banner", Value::from("low battery"))]);
        let after = Context::from_iter([("mode", Value::from("eco"))]);
        let hook = learn(&before, &after, &[]);

        assert_eq!(
            hook.action,
            vec![Operation::unset("banner"), Operation::assign("mode", "eco")]
        );
        assert!(hook.condition.equivalent(&Condition::and([
            Condition::eq("banner", "low battery"),
            Condition::not(Condition::eq("mode", "eco")),
        ])));
        assert!(hook.condition.evaluate(&before));
        assert!(!hook.condition.evaluate(&after));
    }

    #[test]
    fn implied_user_actions_are_not_repeated() {
        let before = battery_context(20, false);
        let after = battery_context(20, true);
        let actions = vec![
            Operation::assign("charging", true),
            Operation::toggle("charging"),
            Operation::noop(),
            Operation::assign("screen", "dim"),
        ];
        let hook = learn(&before, &after, &actions);

        assert_eq!(
            hook.action,
            vec![
                Operation::assign("charging", true),
                Operation::noop(),
                Operation::assign("screen", "dim"),
            ]
        );
        assert!((hook.stats.estimated_cost - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn user_targets_on_present_keys_join_the_condition() {
        let before = battery_context(20, false);
        let hook = learn(&before, &before, &[Operation::increment("battery", 5.0)]);
        assert_eq!(hook.condition, Condition::eq("battery", 20));
        assert_eq!(hook.action, vec![Operation::increment("battery", 5.0)]);
    }

    #[test]
    fn learning_is_deterministic() {
        let before = battery_context(20, false);
        let after = battery_context(25, true);
        let first = learn(&before, &after, &[]);
        let second = learn(&before, &after, &[]);
        assert_eq!(first, second);

        let other = learn(&before, &battery_context(30, true), &[]);
        assert_ne!(first.metadata.id, other.metadata.id);
    }

    #[test]
    fn unknown_user_action_kind_fails() {
        let ctx = battery_context(20, false);
        let result = learn_delta(
            &ctx,
            &ctx,
            &[Operation::new("teleport", "robot")],
            &Policy::default(),
            &OperationRegistry::standard(),
        );
        assert_eq!(result, Err(KernelError::UnknownOperationKind("teleport".to_string())));
    }
}
