use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::operation::Operation;
use crate::KernelError;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct HookId(pub String);

impl HookId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for HookId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HookId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for HookId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HookSource {
    Predefined,
    Learned,
    Composed,
    Refined,
    Combined,
}

impl HookSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Predefined => "predefined",
            Self::Learned => "learned",
            Self::Composed => "composed",
            Self::Refined => "refined",
            Self::Combined => "combined",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "predefined" => Some(Self::Predefined),
            "learned" => Some(Self::Learned),
            "composed" => Some(Self::Composed),
            "refined" => Some(Self::Refined),
            "combined" => Some(Self::Combined),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    pub success_score: f64,
    pub estimated_cost: f64,
    #[serde(default)]
    pub uses: u64,
    #[serde(default)]
    pub corrections: u64,
}

impl Stats {
    #[must_use]
    pub fn new(success_score: f64, estimated_cost: f64) -> Self {
        Self { success_score, estimated_cost, uses: 0, corrections: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub id: HookId,
    pub source: HookSource,
    #[serde(default)]
    pub specificity: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Condition/action/stats unit of operational knowledge.
///
/// Hooks are values: every combinator returns a new hook. Construct through
/// [`Hook::new`] or [`Hook::with_condition`] so `metadata.specificity` tracks
/// the normalized condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hook {
    pub condition: Condition,
    pub action: Vec<Operation>,
    pub stats: Stats,
    pub metadata: Metadata,
}

impl Hook {
    #[must_use]
    pub fn new(
        id: impl Into<HookId>,
        source: HookSource,
        condition: Condition,
        action: Vec<Operation>,
        stats: Stats,
    ) -> Self {
        let specificity = condition.specificity();
        Self {
            condition,
            action,
            stats,
            metadata: Metadata {
                id: id.into(),
                source,
                specificity,
                tags: Vec::new(),
                description: String::new(),
            },
        }
    }

    #[must_use]
    pub fn id(&self) -> &HookId {
        &self.metadata.id
    }

    #[must_use]
    pub fn specificity(&self) -> u32 {
        self.metadata.specificity
    }

    #[must_use]
    pub fn with_condition(&self, condition: Condition) -> Self {
        let mut next = self.clone();
        next.metadata.specificity = condition.specificity();
        next.condition = condition;
        next
    }

    #[must_use]
    pub fn with_tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.metadata.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Recompute specificity, e.g. after loading a hand-written hook file.
    #[must_use]
    pub fn with_recomputed_specificity(mut self) -> Self {
        self.metadata.specificity = self.condition.specificity();
        self
    }

    /// Check hook invariants.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] for identity, score, cost, or
    /// specificity violations and [`KernelError::InvalidCondition`] for a
    /// malformed condition.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.metadata.id.as_str().trim().is_empty() {
            return Err(KernelError::Validation("hook id MUST be non-empty".to_string()));
        }

        if !(0.0..=1.0).contains(&self.stats.success_score) {
            return Err(KernelError::Validation(format!(
                "hook `{}` success_score MUST be in [0.0, 1.0]",
                self.metadata.id
            )));
        }

        if !self.stats.estimated_cost.is_finite() || self.stats.estimated_cost < 0.0 {
            return Err(KernelError::Validation(format!(
                "hook `{}` estimated_cost MUST be finite and >= 0",
                self.metadata.id
            )));
        }

        self.condition.validate()?;

        let expected = self.condition.specificity();
        if self.metadata.specificity != expected {
            return Err(KernelError::Validation(format!(
                "hook `{}` specificity {} does not match normalized leaf count {expected}",
                self.metadata.id, self.metadata.specificity
            )));
        }

        Ok(())
    }

    /// Same condition up to normalization and structurally equal actions.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        self.action == other.action && self.condition.equivalent(&other.condition)
    }
}

/// Forward operations, their rollback, and the summed declared cost.
///
/// `rollback[i]` undoes `operations[len - 1 - i]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutcomePlan {
    pub operations: Vec<Operation>,
    pub rollback: Vec<Operation>,
    pub estimated_cost: f64,
}

impl OutcomePlan {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Plan for `self` followed by `next`: undoing it undoes `next` first.
    #[must_use]
    pub fn then(&self, next: &Self) -> Self {
        let mut operations = self.operations.clone();
        operations.extend(next.operations.iter().cloned());
        let mut rollback = next.rollback.clone();
        rollback.extend(self.rollback.iter().cloned());
        Self { operations, rollback, estimated_cost: self.estimated_cost + next.estimated_cost }
    }

    /// # Errors
    /// Returns [`KernelError::Validation`] when the rollback does not pair with
    /// the forward operations.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.operations.len() != self.rollback.len() {
            return Err(KernelError::Validation(format!(
                "plan has {} operations but {} rollback entries",
                self.operations.len(),
                self.rollback.len()
            )));
        }
        if !self.estimated_cost.is_finite() || self.estimated_cost < 0.0 {
            return Err(KernelError::Validation(
                "plan estimated_cost MUST be finite and >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Comparator;

    fn battery_saver() -> Hook {
        Hook::new(
            "battery_saver",
            HookSource::Predefined,
            Condition::and([
                Condition::leaf("battery", Comparator::Lt, 30),
                Condition::not(Condition::eq("charging", true)),
            ]),
            vec![Operation::assign("charging", true)],
            Stats::new(0.9, 1.0),
        )
    }

    #[test]
    fn new_hook_carries_normalized_specificity() {
        let hook = battery_saver();
        assert_eq!(hook.specificity(), 2);
        assert!(hook.validate().is_ok());

        let narrowed = hook.with_condition(Condition::and([
            hook.condition.clone(),
            Condition::eq("location", "home"),
        ]));
        assert_eq!(narrowed.specificity(), 3);
        assert_eq!(hook.specificity(), 2);
    }

    #[test]
    fn validate_rejects_out_of_range_stats_and_stale_specificity() {
        let mut hook = battery_saver();
        hook.stats.success_score = 1.5;
        assert!(matches!(hook.validate(), Err(KernelError::Validation(_))));

        let mut hook = battery_saver();
        hook.stats.estimated_cost = f64::INFINITY;
        assert!(matches!(hook.validate(), Err(KernelError::Validation(_))));

        let mut hook = battery_saver();
        hook.metadata.specificity = 7;
        match hook.validate() {
            Ok(()) => panic!("stale specificity should be rejected"),
            Err(err) => assert!(err.to_string().contains("does not match")),
        }
        assert!(hook.with_recomputed_specificity().validate().is_ok());
    }

    #[test]
    fn equivalence_needs_equal_actions() {
        let hook = battery_saver();
        let reordered = hook.with_condition(Condition::and([
            Condition::not(Condition::eq("charging", true)),
            Condition::leaf("battery", Comparator::Lt, 30),
        ]));
        assert!(hook.equivalent(&reordered));

        let mut other_action = reordered.clone();
        other_action.action = vec![Operation::assign("charging", false)];
        assert!(!hook.equivalent(&other_action));
    }

    #[test]
    fn plans_concatenate_with_reversed_rollback() {
        let first = OutcomePlan {
            operations: vec![Operation::assign("a", 1)],
            rollback: vec![Operation::unset("a")],
            estimated_cost: 1.0,
        };
        let second = OutcomePlan {
            operations: vec![Operation::assign("b", 2)],
            rollback: vec![Operation::unset("b")],
            estimated_cost: 2.0,
        };
        let joined = first.then(&second);
        assert_eq!(joined.operations, vec![Operation::assign("a", 1), Operation::assign("b", 2)]);
        assert_eq!(joined.rollback, vec![Operation::unset("b"), Operation::unset("a")]);
        assert!((joined.estimated_cost - 3.0).abs() < f64::EPSILON);
        assert!(joined.validate().is_ok());
    }

    #[test]
    fn hook_json_uses_snake_case_source_and_plain_context_values() {
        let json = match serde_json::to_value(battery_saver()) {
            Ok(json) => json,
            Err(err) => panic!("hook should serialize: {err}"),
        };
        assert_eq!(json["metadata"]["source"], "predefined");
        assert_eq!(json["action"][0]["params"]["value"], true);
        assert_eq!(HookSource::parse("learned"), Some(HookSource::Learned));
    }
}
