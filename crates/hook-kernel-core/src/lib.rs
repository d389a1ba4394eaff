//! Knowledge-hook algebra: conditions over immutable contexts, reversible
//! actions, deterministic selection, and the combinators that learn, compose,
//! refine and cascade hooks.

mod cascade;
mod compose;
mod condition;
mod context;
mod execute;
mod hook;
mod learn;
mod operation;
mod policy;
mod score;
mod select;
mod store;

pub use cascade::{cascade, CandidateLookup, CascadeStatus, CascadeStep, CascadeTrace};
pub use compose::{combine_hooks, compose_flat, compose_nested, refine};
pub use condition::{Comparator, Condition, Predicate};
pub use context::{Context, Value};
pub use execute::{execute, interpret_rollback, rollback, Execution};
pub use hook::{Hook, HookId, HookSource, Metadata, OutcomePlan, Stats};
pub use learn::{learn_delta, DELTA_TAG};
pub use operation::{
    kinds, ApplyFn, CostFn, InvertFn, Operation, OperationRegistry, OperationRule,
};
pub use policy::{
    CombinePolicy, CombineWeighting, LearningPolicy, Policy, ScoringPolicy, SelectionPolicy,
};
pub use score::{negative_rl_update, update_stats, Outcome};
pub use select::{activate, default_tie_breakers, prioritize, selection_order};
pub use store::HookStore;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum KernelError {
    #[error("invalid condition: {0}")]
    InvalidCondition(String),
    #[error("unknown operation kind: {0}")]
    UnknownOperationKind(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("validation error: {0}")]
    Validation(String),
}
