use serde::{Deserialize, Serialize};

use crate::KernelError;

/// How `combine_hooks` weighs each input when aggregating stats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CombineWeighting {
    /// Weight by `stats.uses`; all-unused inputs fall back to uniform.
    #[default]
    Uses,
    Uniform,
}

impl CombineWeighting {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uses => "uses",
            Self::Uniform => "uniform",
        }
    }
}

/// Selection knobs. There are no per-criterion weights: candidates are ranked
/// by the fixed lexicographic [`crate::selection_order`], so only the score
/// floor is configurable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionPolicy {
    /// Candidates scoring below this floor are never selected.
    pub min_success_score: f64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self { min_success_score: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringPolicy {
    /// Exponential moving average rate, in (0, 1).
    pub alpha: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self { alpha: 0.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningPolicy {
    pub prior_success: f64,
}

impl Default for LearningPolicy {
    fn default() -> Self {
        Self { prior_success: 0.5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CombinePolicy {
    pub weighting: CombineWeighting,
}

/// Explicit configuration threaded through selection, cascading, scoring,
/// learning and combination. There is no process-wide default instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Policy {
    pub max_cascade_depth: usize,
    pub cost_budget: f64,
    pub selection: SelectionPolicy,
    pub scoring: ScoringPolicy,
    pub learning: LearningPolicy,
    pub combine: CombinePolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_cascade_depth: 3,
            cost_budget: 100.0,
            selection: SelectionPolicy::default(),
            scoring: ScoringPolicy::default(),
            learning: LearningPolicy::default(),
            combine: CombinePolicy::default(),
        }
    }
}

impl Policy {
    /// # Errors
    /// Returns [`KernelError::Validation`] when a bound or rate is out of range.
    pub fn validate(&self) -> Result<(), KernelError> {
        if !self.cost_budget.is_finite() || self.cost_budget < 0.0 {
            return Err(KernelError::Validation(
                "cost_budget MUST be finite and >= 0".to_string(),
            ));
        }

        if !(self.scoring.alpha > 0.0 && self.scoring.alpha < 1.0) {
            return Err(KernelError::Validation("scoring.alpha MUST be in (0.0, 1.0)".to_string()));
        }

        for (name, score) in [
            ("selection.min_success_score", self.selection.min_success_score),
            ("learning.prior_success", self.learning.prior_success),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(KernelError::Validation(format!("{name} MUST be in [0.0, 1.0]")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let policy = Policy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.max_cascade_depth, 3);
        assert_eq!(policy.combine.weighting, CombineWeighting::Uses);
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let policy: Policy = match serde_json::from_str(
            r#"{"max_cascade_depth": 5, "combine": {"weighting": "uniform"}}"#,
        ) {
            Ok(policy) => policy,
            Err(err) => panic!("policy should parse: {err}"),
        };
        assert_eq!(policy.max_cascade_depth, 5);
        assert_eq!(policy.combine.weighting, CombineWeighting::Uniform);
        assert!((policy.scoring.alpha - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let cases = [
            (Policy { cost_budget: -1.0, ..Policy::default() }, "cost_budget"),
            (Policy { scoring: ScoringPolicy { alpha: 1.0 }, ..Policy::default() }, "alpha"),
            (
                Policy { learning: LearningPolicy { prior_success: 1.2 }, ..Policy::default() },
                "prior_success",
            ),
        ];
        for (policy, field) in cases {
            match policy.validate() {
                Ok(()) => panic!("policy with bad {field} should be rejected"),
                Err(err) => assert!(err.to_string().contains(field), "`{err}` vs `{field}`"),
            }
        }
    }
}
