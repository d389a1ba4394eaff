use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::hook::{Hook, OutcomePlan};
use crate::operation::{Operation, OperationRegistry};
use crate::KernelError;

/// Result of running a hook's action against a context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub context: Context,
    pub plan: OutcomePlan,
}

/// Interpret `hook.action` in order against `context`.
///
/// The returned plan repeats the action, carries the per-operation inverses
/// in reverse order, and sums each operation's declared cost.
///
/// # Errors
/// Returns [`KernelError::UnknownOperationKind`] if any operation kind is not
/// registered and [`KernelError::InvalidOperation`] if one cannot be applied.
/// Nothing is returned on failure; there is no partially executed plan.
pub fn execute(
    hook: &Hook,
    context: &Context,
    registry: &OperationRegistry,
) -> Result<Execution, KernelError> {
    let mut current = context.clone();
    let mut rollback = Vec::with_capacity(hook.action.len());
    let mut estimated_cost = 0.0;

    for operation in &hook.action {
        estimated_cost += registry.cost(operation)?;
        rollback.push(interpret_rollback(operation, &current, registry)?);
        current = registry.apply(operation, &current)?;
    }
    rollback.reverse();

    tracing::debug!(
        hook_id = %hook.metadata.id,
        operations = hook.action.len(),
        estimated_cost,
        "executed hook"
    );

    Ok(Execution {
        context: current,
        plan: OutcomePlan { operations: hook.action.clone(), rollback, estimated_cost },
    })
}

/// Apply `plan.rollback` in stored order to undo an execution.
///
/// # Errors
/// Returns [`KernelError::Validation`] for a plan whose rollback does not pair
/// with its operations, and registry errors for unknown or inapplicable kinds.
pub fn rollback(
    plan: &OutcomePlan,
    context: &Context,
    registry: &OperationRegistry,
) -> Result<Context, KernelError> {
    plan.validate()?;
    let restored = plan
        .rollback
        .iter()
        .try_fold(context.clone(), |current, operation| registry.apply(operation, &current))?;
    tracing::debug!(operations = plan.rollback.len(), "rolled back plan");
    Ok(restored)
}

/// Inverse of `operation` when applied to `before`.
///
/// # Errors
/// Returns [`KernelError::UnknownOperationKind`] when no inversion rule exists.
pub fn interpret_rollback(
    operation: &Operation,
    before: &Context,
    registry: &OperationRegistry,
) -> Result<Operation, KernelError> {
    registry.invert(operation, before)
}
