use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::context::{Context, Value};
use crate::KernelError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl Comparator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Contains => "contains",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "contains",
        }
    }

    fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Compare an observed value against the predicate operand.
    /// Kind mismatches never satisfy an ordering or `contains` comparator.
    #[must_use]
    pub fn apply(self, actual: &Value, expected: &Value) -> bool {
        match self {
            Self::Eq => actual == expected,
            Self::Ne => actual != expected,
            Self::Contains => match (actual, expected) {
                (Value::Text(haystack), Value::Text(needle)) => haystack.contains(needle.as_str()),
                _ => false,
            },
            Self::Lt | Self::Le | Self::Gt | Self::Ge => {
                let ordering = match (actual, expected) {
                    (Value::Number(lhs), Value::Number(rhs)) => lhs.partial_cmp(rhs),
                    (Value::Text(lhs), Value::Text(rhs)) => Some(lhs.cmp(rhs)),
                    _ => None,
                };
                let Some(ordering) = ordering else {
                    return false;
                };
                match self {
                    Self::Lt => ordering == Ordering::Less,
                    Self::Le => ordering != Ordering::Greater,
                    Self::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }
            }
        }
    }
}

/// Test of a single context key against an operand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Predicate {
    pub key: String,
    pub op: Comparator,
    pub value: Value,
}

impl Predicate {
    /// A missing key makes the predicate false for every comparator.
    #[must_use]
    pub fn evaluate(&self, context: &Context) -> bool {
        context.get(&self.key).is_some_and(|actual| self.op.apply(actual, &self.value))
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.op
            .cmp(&other.op)
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| self.value.canonical_cmp(&other.value))
    }
}

/// Boolean predicate tree over a [`Context`].
///
/// `And([])` is the constant true and `Or([])` the constant false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Leaf(Predicate),
    And { children: Vec<Condition> },
    Or { children: Vec<Condition> },
    Not { child: Box<Condition> },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Junction {
    And,
    Or,
}

impl Condition {
    #[must_use]
    pub fn leaf(key: impl Into<String>, op: Comparator, value: impl Into<Value>) -> Self {
        Self::Leaf(Predicate { key: key.into(), op, value: value.into() })
    }

    #[must_use]
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(key, Comparator::Eq, value)
    }

    #[must_use]
    pub fn and<I: IntoIterator<Item = Condition>>(children: I) -> Self {
        Self::And { children: children.into_iter().collect() }
    }

    #[must_use]
    pub fn or<I: IntoIterator<Item = Condition>>(children: I) -> Self {
        Self::Or { children: children.into_iter().collect() }
    }

    #[must_use]
    pub fn not(child: Condition) -> Self {
        Self::Not { child: Box::new(child) }
    }

    #[must_use]
    pub fn always() -> Self {
        Self::And { children: Vec::new() }
    }

    #[must_use]
    pub fn never() -> Self {
        Self::Or { children: Vec::new() }
    }

    #[must_use]
    pub fn is_always(&self) -> bool {
        matches!(self, Self::And { children } if children.is_empty())
    }

    #[must_use]
    pub fn is_never(&self) -> bool {
        matches!(self, Self::Or { children } if children.is_empty())
    }

    /// Parse a JSON condition tree and validate it.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidCondition`] for unknown node kinds, missing
    /// operands, or leaves rejected by [`Condition::validate`].
    pub fn from_json(input: &str) -> Result<Self, KernelError> {
        let condition: Self = serde_json::from_str(input)
            .map_err(|err| KernelError::InvalidCondition(format!("malformed condition: {err}")))?;
        condition.validate()?;
        Ok(condition)
    }

    /// # Errors
    /// Returns [`KernelError::InvalidCondition`] on the first malformed leaf.
    pub fn validate(&self) -> Result<(), KernelError> {
        match self {
            Self::Leaf(predicate) => validate_predicate(predicate),
            Self::And { children } | Self::Or { children } => {
                children.iter().try_for_each(Condition::validate)
            }
            Self::Not { child } => child.validate(),
        }
    }

    #[must_use]
    pub fn evaluate(&self, context: &Context) -> bool {
        match self {
            Self::Leaf(predicate) => predicate.evaluate(context),
            Self::And { children } => children.iter().all(|child| child.evaluate(context)),
            Self::Or { children } => children.iter().any(|child| child.evaluate(context)),
            Self::Not { child } => !child.evaluate(context),
        }
    }

    /// Negation normal form with flattened, sorted, de-duplicated junctions.
    ///
    /// `Not` only ever wraps a leaf in the result, and constants are folded.
    #[must_use]
    pub fn normalize(&self) -> Self {
        match self {
            Self::Leaf(_) => self.clone(),
            Self::Not { child } => negate(child),
            Self::And { children } => assemble(Junction::And, children.iter().map(Self::normalize)),
            Self::Or { children } => assemble(Junction::Or, children.iter().map(Self::normalize)),
        }
    }

    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        self.normalize() == other.normalize()
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::And { children } | Self::Or { children } => {
                children.iter().map(Self::leaf_count).sum()
            }
            Self::Not { child } => child.leaf_count(),
        }
    }

    /// Leaf count of the normalized form.
    #[must_use]
    pub fn specificity(&self) -> u32 {
        u32::try_from(self.normalize().leaf_count()).unwrap_or(u32::MAX)
    }

    /// Context keys referenced anywhere in the tree.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<&str> {
        let mut keys = BTreeSet::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, keys: &mut BTreeSet<&'a str>) {
        match self {
            Self::Leaf(predicate) => {
                keys.insert(predicate.key.as_str());
            }
            Self::And { children } | Self::Or { children } => {
                for child in children {
                    child.collect_keys(keys);
                }
            }
            Self::Not { child } => child.collect_keys(keys),
        }
    }

    /// Stable rendering of the normalized form, usable as an index key.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        self.normalize().to_string()
    }

    /// Replace leaves by the result of `rewrite`, keeping the tree shape.
    pub(crate) fn map_leaves(&self, rewrite: &impl Fn(&Predicate) -> Condition) -> Self {
        match self {
            Self::Leaf(predicate) => rewrite(predicate),
            Self::And { children } => {
                Self::And { children: children.iter().map(|child| child.map_leaves(rewrite)).collect() }
            }
            Self::Or { children } => {
                Self::Or { children: children.iter().map(|child| child.map_leaves(rewrite)).collect() }
            }
            Self::Not { child } => Self::not(child.map_leaves(rewrite)),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Leaf(_) => 0,
            Self::Not { .. } => 1,
            Self::And { .. } => 2,
            Self::Or { .. } => 3,
        }
    }

    /// Total order over condition trees used to sort junction children.
    #[must_use]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Leaf(lhs), Self::Leaf(rhs)) => lhs.canonical_cmp(rhs),
            (Self::Not { child: lhs }, Self::Not { child: rhs }) => lhs.canonical_cmp(rhs),
            (Self::And { children: lhs }, Self::And { children: rhs })
            | (Self::Or { children: lhs }, Self::Or { children: rhs }) => {
                for (left, right) in lhs.iter().zip(rhs) {
                    let ordering = left.canonical_cmp(right);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                lhs.len().cmp(&rhs.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn validate_predicate(predicate: &Predicate) -> Result<(), KernelError> {
    if predicate.key.trim().is_empty() {
        return Err(KernelError::InvalidCondition("leaf key MUST be non-empty".to_string()));
    }

    match &predicate.value {
        Value::Number(number) if !number.is_finite() => Err(KernelError::InvalidCondition(format!(
            "leaf `{}` compares against a non-finite number",
            predicate.key
        ))),
        Value::Bool(_) if predicate.op.is_ordering() => Err(KernelError::InvalidCondition(format!(
            "leaf `{}` applies ordering comparator `{}` to a boolean",
            predicate.key,
            predicate.op.as_str()
        ))),
        Value::Bool(_) | Value::Number(_) if predicate.op == Comparator::Contains => {
            Err(KernelError::InvalidCondition(format!(
                "leaf `{}` uses `contains` with a non-text operand",
                predicate.key
            )))
        }
        _ => Ok(()),
    }
}

/// Normalized form of `Not(condition)`.
fn negate(condition: &Condition) -> Condition {
    match condition {
        Condition::Leaf(_) => Condition::not(condition.clone()),
        Condition::Not { child } => child.normalize(),
        Condition::And { children } => assemble(Junction::Or, children.iter().map(negate)),
        Condition::Or { children } => assemble(Junction::And, children.iter().map(negate)),
    }
}

/// Build a junction from already-normalized children.
fn assemble(junction: Junction, children: impl Iterator<Item = Condition>) -> Condition {
    let mut flat: Vec<Condition> = Vec::new();
    for child in children {
        match (junction, child) {
            (Junction::And, Condition::And { children })
            | (Junction::Or, Condition::Or { children }) => flat.extend(children),
            (Junction::And, Condition::Or { children }) if children.is_empty() => {
                return Condition::never();
            }
            (Junction::Or, Condition::And { children }) if children.is_empty() => {
                return Condition::always();
            }
            (_, other) => flat.push(other),
        }
    }

    flat.sort_by(Condition::canonical_cmp);
    flat.dedup_by(|lhs, rhs| lhs.canonical_cmp(rhs) == Ordering::Equal);

    if flat.len() == 1 {
        if let Some(only) = flat.pop() {
            return only;
        }
    }

    match junction {
        Junction::And => Condition::And { children: flat },
        Junction::Or => Condition::Or { children: flat },
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(predicate) => {
                write!(f, "{:?} {} {}", predicate.key, predicate.op.symbol(), predicate.value)
            }
            Self::Not { child } => write!(f, "!{child}"),
            Self::And { children } if children.is_empty() => write!(f, "true"),
            Self::Or { children } if children.is_empty() => write!(f, "false"),
            Self::And { children } | Self::Or { children } => {
                let separator = if matches!(self, Self::And { .. }) { " && " } else { " || " };
                write!(f, "(")?;
                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        write!(f, "{separator}")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn battery_low_not_charging() -> Condition {
        Condition::and([
            Condition::leaf("battery", Comparator::Lt, 30),
            Condition::not(Condition::eq("charging", true)),
        ])
    }

    fn battery_context(battery: i32, charging: bool) -> Context {
        Context::from_iter([("battery", Value::from(battery)), ("charging", charging.into())])
    }

    #[test]
    fn evaluates_battery_saver_condition() {
        let condition = battery_low_not_charging();
        assert!(condition.evaluate(&battery_context(20, false)));
        assert!(!condition.evaluate(&battery_context(20, true)));
        assert!(!condition.evaluate(&battery_context(45, false)));
    }

    #[test]
    fn missing_key_is_false_for_every_comparator() {
        let empty = Context::new();
        for op in [
            Comparator::Eq,
            Comparator::Ne,
            Comparator::Lt,
            Comparator::Le,
            Comparator::Gt,
            Comparator::Ge,
            Comparator::Contains,
        ] {
            assert!(!Condition::leaf("absent", op, "x").evaluate(&empty), "{op:?}");
        }
        assert!(Condition::not(Condition::eq("absent", 1)).evaluate(&empty));
    }

    #[test]
    fn kind_mismatch_never_satisfies_ordering() {
        let ctx = Context::from_iter([("label", Value::from("10"))]);
        assert!(!Condition::leaf("label", Comparator::Lt, 20).evaluate(&ctx));
        assert!(Condition::leaf("label", Comparator::Lt, "2").evaluate(&ctx));
        assert!(Condition::leaf("label", Comparator::Contains, "1").evaluate(&ctx));
    }

    #[test]
    fn normalize_pushes_negation_through_junctions() {
        let a = Condition::eq("a", 1);
        let b = Condition::eq("b", 2);
        let negated = Condition::not(Condition::and([a.clone(), Condition::not(b.clone())]));

        let expected = Condition::or([b, Condition::not(a)]);
        assert_eq!(negated.normalize(), expected);
    }

    #[test]
    fn normalize_flattens_sorts_and_deduplicates() {
        let a = Condition::eq("a", 1);
        let b = Condition::eq("b", 2);
        let c = Condition::eq("c", 3);
        let nested = Condition::and([
            c.clone(),
            Condition::and([b.clone(), a.clone()]),
            a.clone(),
            Condition::and([Condition::and([c.clone()])]),
        ]);

        assert_eq!(nested.normalize(), Condition::and([a, b, c]));
    }

    #[test]
    fn normalize_folds_constants() {
        let a = Condition::eq("a", 1);
        assert_eq!(Condition::and([a.clone(), Condition::never()]).normalize(), Condition::never());
        assert_eq!(Condition::or([a.clone(), Condition::always()]).normalize(), Condition::always());
        assert_eq!(Condition::and([a.clone(), Condition::always()]).normalize(), a);
        assert_eq!(Condition::not(Condition::always()).normalize(), Condition::never());
    }

    #[test]
    fn equivalence_ignores_child_order() {
        let a = Condition::eq("a", 1);
        let b = Condition::leaf("b", Comparator::Gt, 2);
        assert!(Condition::or([a.clone(), b.clone()]).equivalent(&Condition::or([b.clone(), a.clone()])));
        assert!(!Condition::or([a.clone(), b.clone()]).equivalent(&Condition::and([a, b])));
    }

    #[test]
    fn specificity_counts_normalized_leaves() {
        assert_eq!(battery_low_not_charging().specificity(), 2);
        let duplicated = Condition::and([Condition::eq("a", 1), Condition::eq("a", 1)]);
        assert_eq!(duplicated.specificity(), 1);
        assert_eq!(Condition::always().specificity(), 0);
    }

    #[test]
    fn validate_rejects_malformed_leaves() {
        let cases = [
            (Condition::eq(" ", 1), "non-empty"),
            (Condition::leaf("flag", Comparator::Lt, true), "ordering comparator"),
            (Condition::leaf("n", Comparator::Contains, 3), "non-text operand"),
            (Condition::eq("n", f64::NAN), "non-finite"),
        ];
        for (condition, expected) in cases {
            match condition.validate() {
                Ok(()) => panic!("expected invalid condition containing `{expected}`"),
                Err(err) => assert!(err.to_string().contains(expected), "`{err}` vs `{expected}`"),
            }
        }
    }

    #[test]
    fn from_json_reports_unknown_kinds_and_missing_operands() {
        let parsed = Condition::from_json(
            r#"{"kind":"and","children":[{"kind":"leaf","key":"battery","op":"lt","value":30},
                {"kind":"not","child":{"kind":"leaf","key":"charging","op":"eq","value":true}}]}"#,
        );
        match parsed {
            Ok(condition) => assert_eq!(condition, battery_low_not_charging()),
            Err(err) => panic!("condition should parse: {err}"),
        }

        for input in [r#"{"kind":"xor","children":[]}"#, r#"{"kind":"not"}"#] {
            match Condition::from_json(input) {
                Ok(condition) => panic!("expected InvalidCondition, got {condition}"),
                Err(err) => assert!(matches!(err, KernelError::InvalidCondition(_))),
            }
        }
    }

    #[test]
    fn canonical_key_survives_json_round_trip() {
        let condition = Condition::or([
            Condition::not(Condition::and([Condition::eq("b", "x"), Condition::eq("a", 2)])),
            Condition::leaf("c", Comparator::Ge, 1.5),
        ]);
        let json = match serde_json::to_string(&condition.normalize()) {
            Ok(json) => json,
            Err(err) => panic!("condition should serialize: {err}"),
        };
        let reloaded = match Condition::from_json(&json) {
            Ok(reloaded) => reloaded,
            Err(err) => panic!("condition should reload: {err}"),
        };
        assert_eq!(reloaded.canonical_key(), condition.canonical_key());
        assert_eq!(reloaded.normalize(), condition.normalize());
    }

    #[test]
    fn display_renders_constants_and_junctions() {
        assert_eq!(Condition::always().to_string(), "true");
        assert_eq!(Condition::never().to_string(), "false");
        assert_eq!(battery_low_not_charging().to_string(), "(\"battery\" < 30 && !\"charging\" == true)");
    }

    #[test]
    fn canonical_key_quotes_leaf_keys() {
        let bang = Condition::eq("!charging", true);
        let negated = Condition::not(Condition::eq("charging", true));
        assert_ne!(bang.canonical_key(), negated.canonical_key());

        let spliced = Condition::eq("a == 1 && b", true);
        let pair = Condition::and([Condition::eq("a", 1), Condition::eq("b", true)]);
        assert_ne!(Condition::and([spliced]).canonical_key(), pair.canonical_key());
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            (-3_i32..3).prop_map(Value::from),
            prop::sample::select(vec!["x", "y", "xy"]).prop_map(Value::from),
        ]
    }

    fn arb_condition() -> impl Strategy<Value = Condition> {
        let comparators = vec![
            Comparator::Eq,
            Comparator::Ne,
            Comparator::Lt,
            Comparator::Le,
            Comparator::Gt,
            Comparator::Ge,
            Comparator::Contains,
        ];
        let leaf = (prop::sample::select(vec!["a", "b", "c"]), prop::sample::select(comparators), scalar())
            .prop_map(|(key, op, value)| Condition::leaf(key, op, value));
        leaf.prop_recursive(4, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Condition::and),
                prop::collection::vec(inner.clone(), 0..4).prop_map(Condition::or),
                inner.prop_map(Condition::not),
            ]
        })
    }

    fn arb_context() -> impl Strategy<Value = Context> {
        (prop::option::of(scalar()), prop::option::of(scalar()), prop::option::of(scalar())).prop_map(
            |(a, b, c)| {
                let mut ctx = Context::new();
                for (key, value) in [("a", a), ("b", b), ("c", c)] {
                    if let Some(value) = value {
                        ctx = ctx.with(key, value);
                    }
                }
                ctx
            },
        )
    }

    proptest! {
        #[test]
        fn property_normalize_is_idempotent(condition in arb_condition()) {
            let once = condition.normalize();
            prop_assert_eq!(once.normalize(), once);
        }

        #[test]
        fn property_double_negation_is_equivalent(condition in arb_condition()) {
            let doubled = Condition::not(Condition::not(condition.clone()));
            prop_assert!(condition.equivalent(&doubled));
        }

        #[test]
        fn property_normalize_preserves_evaluation(condition in arb_condition(), ctx in arb_context()) {
            prop_assert_eq!(condition.normalize().evaluate(&ctx), condition.evaluate(&ctx));
        }

        #[test]
        fn property_evaluation_distributes_over_connectives(
            lhs in arb_condition(),
            rhs in arb_condition(),
            ctx in arb_context(),
        ) {
            let left = lhs.evaluate(&ctx);
            let right = rhs.evaluate(&ctx);
            prop_assert_eq!(Condition::and([lhs.clone(), rhs.clone()]).evaluate(&ctx), left && right);
            prop_assert_eq!(Condition::or([lhs.clone(), rhs]).evaluate(&ctx), left || right);
            prop_assert_eq!(Condition::not(lhs).evaluate(&ctx), !left);
        }

        #[test]
        fn property_specificity_bounded_by_raw_leaves(condition in arb_condition()) {
            prop_assert!(condition.normalize().leaf_count() <= condition.leaf_count());
        }
    }
}
