use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::context::{Context, Value};
use crate::KernelError;

pub mod kinds {
    pub const ASSIGN: &str = "assign";
    pub const UNSET: &str = "unset";
    pub const INCREMENT: &str = "increment";
    pub const TOGGLE: &str = "toggle";
    pub const APPEND: &str = "append";
    pub const NOOP: &str = "noop";
    pub const SEQUENCE: &str = "sequence";

    /// Kinds installed by [`super::OperationRegistry::standard`].
    pub const STANDARD: [&str; 7] = [ASSIGN, UNSET, INCREMENT, TOGGLE, APPEND, NOOP, SEQUENCE];

    /// Whether `kind` is a built-in kind, which writes at most its `target`.
    #[must_use]
    pub fn is_standard(kind: &str) -> bool {
        STANDARD.contains(&kind)
    }
}

const COST_PARAM: &str = "cost";

/// One atomic action. `steps` is only populated for the `sequence` marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub kind: String,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Operation>,
}

impl Operation {
    #[must_use]
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self { kind: kind.into(), target: target.into(), params: BTreeMap::new(), steps: Vec::new() }
    }

    #[must_use]
    pub fn assign(target: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(kinds::ASSIGN, target).with_param("value", value)
    }

    #[must_use]
    pub fn unset(target: impl Into<String>) -> Self {
        Self::new(kinds::UNSET, target)
    }

    #[must_use]
    pub fn increment(target: impl Into<String>, by: f64) -> Self {
        Self::new(kinds::INCREMENT, target).with_param("by", by)
    }

    #[must_use]
    pub fn toggle(target: impl Into<String>) -> Self {
        Self::new(kinds::TOGGLE, target)
    }

    #[must_use]
    pub fn append(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(kinds::APPEND, target).with_param("text", Value::Text(text.into()))
    }

    #[must_use]
    pub fn noop() -> Self {
        Self::new(kinds::NOOP, "")
    }

    #[must_use]
    pub fn sequence(steps: Vec<Operation>) -> Self {
        Self { steps, ..Self::new(kinds::SEQUENCE, "") }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_cost(self, cost: f64) -> Self {
        self.with_param(COST_PARAM, cost)
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    #[must_use]
    pub fn is_sequence(&self) -> bool {
        self.kind == kinds::SEQUENCE
    }

    /// Context keys this operation (or any nested step) writes.
    #[must_use]
    pub fn targets(&self) -> BTreeSet<&str> {
        let mut targets = BTreeSet::new();
        self.collect_targets(&mut targets);
        targets
    }

    fn collect_targets<'a>(&'a self, targets: &mut BTreeSet<&'a str>) {
        if !self.target.is_empty() {
            targets.insert(self.target.as_str());
        }
        for step in &self.steps {
            step.collect_targets(targets);
        }
    }
}

pub type ApplyFn = fn(&OperationRegistry, &Operation, &Context) -> Result<Context, KernelError>;
pub type InvertFn = fn(&OperationRegistry, &Operation, &Context) -> Result<Operation, KernelError>;
pub type CostFn = fn(&OperationRegistry, &Operation) -> Result<f64, KernelError>;

/// Forward application, inversion and unit cost for one operation kind.
///
/// `invert` receives the context the operation is about to be applied to and
/// returns an operation that restores it.
#[derive(Debug, Clone, Copy)]
pub struct OperationRule {
    pub apply: ApplyFn,
    pub invert: InvertFn,
    pub unit_cost: CostFn,
}

/// Closed dispatch table from operation kind to [`OperationRule`].
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    rules: BTreeMap<String, OperationRule>,
}

impl OperationRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(
            kinds::ASSIGN,
            OperationRule { apply: apply_assign, invert: restore_prior, unit_cost: unit_cost_one },
        );
        registry.register(
            kinds::UNSET,
            OperationRule { apply: apply_unset, invert: restore_prior, unit_cost: unit_cost_one },
        );
        registry.register(
            kinds::INCREMENT,
            OperationRule { apply: apply_increment, invert: restore_prior, unit_cost: unit_cost_one },
        );
        registry.register(
            kinds::TOGGLE,
            OperationRule { apply: apply_toggle, invert: invert_toggle, unit_cost: unit_cost_one },
        );
        registry.register(
            kinds::APPEND,
            OperationRule { apply: apply_append, invert: restore_prior, unit_cost: unit_cost_one },
        );
        registry.register(
            kinds::NOOP,
            OperationRule { apply: apply_noop, invert: invert_noop, unit_cost: unit_cost_zero },
        );
        registry.register(
            kinds::SEQUENCE,
            OperationRule {
                apply: apply_sequence,
                invert: invert_sequence,
                unit_cost: unit_cost_sequence,
            },
        );
        registry
    }

    /// Add or replace the rule for `kind`, returning the previous rule.
    pub fn register(&mut self, kind: impl Into<String>, rule: OperationRule) -> Option<OperationRule> {
        self.rules.insert(kind.into(), rule)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// # Errors
    /// Returns [`KernelError::UnknownOperationKind`] when `kind` has no rule.
    pub fn rule(&self, kind: &str) -> Result<&OperationRule, KernelError> {
        self.rules.get(kind).ok_or_else(|| KernelError::UnknownOperationKind(kind.to_string()))
    }

    /// # Errors
    /// Returns [`KernelError::UnknownOperationKind`] for unregistered kinds and
    /// [`KernelError::InvalidOperation`] for malformed parameters.
    pub fn apply(&self, operation: &Operation, context: &Context) -> Result<Context, KernelError> {
        (self.rule(&operation.kind)?.apply)(self, operation, context)
    }

    /// Inverse of `operation` relative to the context it is applied to.
    ///
    /// # Errors
    /// Same failure modes as [`OperationRegistry::apply`].
    pub fn invert(&self, operation: &Operation, before: &Context) -> Result<Operation, KernelError> {
        (self.rule(&operation.kind)?.invert)(self, operation, before)
    }

    /// Declared cost: an explicit `cost` param wins over the kind's unit cost.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidOperation`] for a negative or non-numeric
    /// `cost` param, and [`KernelError::UnknownOperationKind`] for unregistered kinds.
    pub fn cost(&self, operation: &Operation) -> Result<f64, KernelError> {
        let rule = self.rule(&operation.kind)?;
        match operation.param(COST_PARAM) {
            Some(Value::Number(cost)) if cost.is_finite() && *cost >= 0.0 => Ok(*cost),
            Some(other) => Err(KernelError::InvalidOperation(format!(
                "{} on `{}` declares invalid cost {other}",
                operation.kind, operation.target
            ))),
            None => (rule.unit_cost)(self, operation),
        }
    }

    /// Summed declared cost of an operation sequence.
    ///
    /// # Errors
    /// Propagates the first failure from [`OperationRegistry::cost`].
    pub fn total_cost(&self, operations: &[Operation]) -> Result<f64, KernelError> {
        operations.iter().try_fold(0.0, |total, operation| Ok(total + self.cost(operation)?))
    }
}

fn require_target(operation: &Operation) -> Result<&str, KernelError> {
    if operation.target.trim().is_empty() {
        return Err(KernelError::InvalidOperation(format!(
            "{} requires a non-empty target",
            operation.kind
        )));
    }
    Ok(operation.target.as_str())
}

fn require_param<'a>(operation: &'a Operation, name: &str) -> Result<&'a Value, KernelError> {
    operation.param(name).ok_or_else(|| {
        KernelError::InvalidOperation(format!(
            "{} on `{}` is missing param `{name}`",
            operation.kind, operation.target
        ))
    })
}

fn apply_assign(
    _registry: &OperationRegistry,
    operation: &Operation,
    context: &Context,
) -> Result<Context, KernelError> {
    let target = require_target(operation)?;
    let value = require_param(operation, "value")?;
    Ok(context.with(target, value.clone()))
}

fn apply_unset(
    _registry: &OperationRegistry,
    operation: &Operation,
    context: &Context,
) -> Result<Context, KernelError> {
    Ok(context.without(require_target(operation)?))
}

fn apply_increment(
    _registry: &OperationRegistry,
    operation: &Operation,
    context: &Context,
) -> Result<Context, KernelError> {
    let target = require_target(operation)?;
    let by = match operation.param("by") {
        None => 1.0,
        Some(Value::Number(by)) if by.is_finite() => *by,
        Some(other) => {
            return Err(KernelError::InvalidOperation(format!(
                "increment on `{target}` has non-numeric step {other}"
            )));
        }
    };
    let current = match context.get(target) {
        None => 0.0,
        Some(Value::Number(current)) => *current,
        Some(other) => {
            return Err(KernelError::InvalidOperation(format!(
                "increment on `{target}` found a {} value",
                other.kind_name()
            )));
        }
    };
    Ok(context.with(target, current + by))
}

fn apply_toggle(
    _registry: &OperationRegistry,
    operation: &Operation,
    context: &Context,
) -> Result<Context, KernelError> {
    let target = require_target(operation)?;
    match context.get(target) {
        Some(Value::Bool(current)) => Ok(context.with(target, !current)),
        Some(other) => Err(KernelError::InvalidOperation(format!(
            "toggle on `{target}` found a {} value",
            other.kind_name()
        ))),
        None => Err(KernelError::InvalidOperation(format!("toggle on missing key `{target}`"))),
    }
}

fn apply_append(
    _registry: &OperationRegistry,
    operation: &Operation,
    context: &Context,
) -> Result<Context, KernelError> {
    let target = require_target(operation)?;
    let Value::Text(suffix) = require_param(operation, "text")? else {
        return Err(KernelError::InvalidOperation(format!("append on `{target}` needs text")));
    };
    let current = match context.get(target) {
        None => "",
        Some(Value::Text(current)) => current.as_str(),
        Some(other) => {
            return Err(KernelError::InvalidOperation(format!(
                "append on `{target}` found a {} value",
                other.kind_name()
            )));
        }
    };
    Ok(context.with(target, format!("{current}{suffix}")))
}

fn apply_noop(
    _registry: &OperationRegistry,
    _operation: &Operation,
    context: &Context,
) -> Result<Context, KernelError> {
    Ok(context.clone())
}

fn apply_sequence(
    registry: &OperationRegistry,
    operation: &Operation,
    context: &Context,
) -> Result<Context, KernelError> {
    operation.steps.iter().try_fold(context.clone(), |current, step| registry.apply(step, &current))
}

/// Restore the target to its value in `before`, or remove it if it was absent.
fn restore_prior(
    _registry: &OperationRegistry,
    operation: &Operation,
    before: &Context,
) -> Result<Operation, KernelError> {
    let target = require_target(operation)?;
    Ok(match before.get(target) {
        Some(prior) => Operation::assign(target, prior.clone()),
        None => Operation::unset(target),
    })
}

fn invert_toggle(
    _registry: &OperationRegistry,
    operation: &Operation,
    _before: &Context,
) -> Result<Operation, KernelError> {
    Ok(Operation::toggle(require_target(operation)?))
}

fn invert_noop(
    _registry: &OperationRegistry,
    _operation: &Operation,
    _before: &Context,
) -> Result<Operation, KernelError> {
    Ok(Operation::noop())
}

fn invert_sequence(
    registry: &OperationRegistry,
    operation: &Operation,
    before: &Context,
) -> Result<Operation, KernelError> {
    let mut current = before.clone();
    let mut inverses = Vec::with_capacity(operation.steps.len());
    for step in &operation.steps {
        inverses.push(registry.invert(step, &current)?);
        current = registry.apply(step, &current)?;
    }
    inverses.reverse();
    Ok(Operation::sequence(inverses))
}

fn unit_cost_one(_registry: &OperationRegistry, _operation: &Operation) -> Result<f64, KernelError> {
    Ok(1.0)
}

fn unit_cost_zero(_registry: &OperationRegistry, _operation: &Operation) -> Result<f64, KernelError> {
    Ok(0.0)
}

fn unit_cost_sequence(registry: &OperationRegistry, operation: &Operation) -> Result<f64, KernelError> {
    registry.total_cost(&operation.steps)
}
