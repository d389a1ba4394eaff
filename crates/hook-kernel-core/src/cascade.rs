use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::execute::execute;
use crate::hook::{Hook, OutcomePlan};
use crate::operation::OperationRegistry;
use crate::policy::Policy;
use crate::select::prioritize;
use crate::KernelError;

/// Read-only source of hooks to consider for a context.
pub trait CandidateLookup {
    fn candidates_for(&self, context: &Context) -> Vec<&Hook>;
}

impl CandidateLookup for [Hook] {
    fn candidates_for(&self, _context: &Context) -> Vec<&Hook> {
        self.iter().collect()
    }
}

/// Why a cascade stopped. Every variant is a normal termination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    Quiescent,
    DepthReached,
    BudgetExceeded,
}

impl CascadeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quiescent => "quiescent",
            Self::DepthReached => "depth_reached",
            Self::BudgetExceeded => "budget_exceeded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CascadeStep {
    pub hook: Hook,
    /// Context after this step's action.
    pub context: Context,
    pub plan: OutcomePlan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CascadeTrace {
    pub steps: Vec<CascadeStep>,
    pub status: CascadeStatus,
    pub final_context: Context,
    pub total_cost: f64,
}

impl CascadeTrace {
    /// Combined plan of every executed step; its rollback undoes the cascade.
    #[must_use]
    pub fn combined_plan(&self) -> OutcomePlan {
        self.steps.iter().fold(OutcomePlan::empty(), |plan, step| plan.then(&step.plan))
    }
}

/// Repeatedly activate, select and execute until nothing activates or a
/// policy bound is hit.
///
/// At most `policy.max_cascade_depth` steps run, and a step whose plan would
/// push the running cost above `policy.cost_budget` is not executed.
///
/// # Errors
/// Propagates execution failures ([`KernelError::UnknownOperationKind`],
/// [`KernelError::InvalidOperation`]) from the selected hook.
pub fn cascade<L>(
    lookup: &L,
    context: &Context,
    policy: &Policy,
    registry: &OperationRegistry,
) -> Result<CascadeTrace, KernelError>
where
    L: CandidateLookup + ?Sized,
{
    let mut current = context.clone();
    let mut steps = Vec::new();
    let mut total_cost = 0.0;

    let status = loop {
        if steps.len() >= policy.max_cascade_depth {
            break CascadeStatus::DepthReached;
        }

        let activated: Vec<&Hook> = lookup
            .candidates_for(&current)
            .into_iter()
            .filter(|hook| hook.condition.evaluate(&current))
            .collect();
        let Some(hook) = prioritize(&activated, policy) else {
            break CascadeStatus::Quiescent;
        };

        let execution = execute(hook, &current, registry)?;
        if total_cost + execution.plan.estimated_cost > policy.cost_budget {
            break CascadeStatus::BudgetExceeded;
        }

        total_cost += execution.plan.estimated_cost;
        current = execution.context.clone();
        steps.push(CascadeStep { hook: hook.clone(), context: execution.context, plan: execution.plan });
    };

    tracing::info!(
        steps = steps.len(),
        status = status.as_str(),
        total_cost,
        "cascade finished"
    );

    Ok(CascadeTrace { steps, status, final_context: current, total_cost })
}
