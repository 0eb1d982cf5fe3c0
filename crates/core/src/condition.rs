//! Predicate tree shared by ID rules and EGO forbid policies.
//!
//! Evaluation is pure and total: it never errors and never mutates the
//! context. Anything that cannot be satisfied evaluates to `false`.

use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Intent name equals `name`.
    Intent { name: String },
    /// Fact is present and non-null. Absent and explicit-null keys are indistinguishable.
    Fact { key: String },
    /// Fact equals `expected` under type-strict equality.
    FactValue { key: String, expected: Value },
    /// Strict comparison of a drive intensity against `threshold`.
    Drive {
        name: String,
        threshold: f64,
        #[serde(default = "default_greater_than")]
        gt: bool,
    },
    /// Strict comparison of an affect valence against `threshold`.
    Affect {
        name: String,
        threshold: f64,
        #[serde(default = "default_greater_than")]
        gt: bool,
    },
    And { left: Box<Condition>, right: Box<Condition> },
    Or { left: Box<Condition>, right: Box<Condition> },
    Not { operand: Box<Condition> },
    True,
    False,
}

fn default_greater_than() -> bool {
    true
}

impl Condition {
    pub fn intent(name: impl Into<String>) -> Self {
        Self::Intent { name: name.into() }
    }

    pub fn fact(key: impl Into<String>) -> Self {
        Self::Fact { key: key.into() }
    }

    pub fn fact_value(key: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self::FactValue { key: key.into(), expected: expected.into() }
    }

    pub fn drive_above(name: impl Into<String>, threshold: f64) -> Self {
        Self::Drive { name: name.into(), threshold, gt: true }
    }

    pub fn drive_below(name: impl Into<String>, threshold: f64) -> Self {
        Self::Drive { name: name.into(), threshold, gt: false }
    }

    pub fn affect_above(name: impl Into<String>, threshold: f64) -> Self {
        Self::Affect { name: name.into(), threshold, gt: true }
    }

    pub fn affect_below(name: impl Into<String>, threshold: f64) -> Self {
        Self::Affect { name: name.into(), threshold, gt: false }
    }

    pub fn and(self, other: Condition) -> Self {
        Self::And { left: Box::new(self), right: Box::new(other) }
    }

    pub fn or(self, other: Condition) -> Self {
        Self::Or { left: Box::new(self), right: Box::new(other) }
    }

    pub fn negate(self) -> Self {
        Self::Not { operand: Box::new(self) }
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        evaluate(self, ctx)
    }
}

pub fn evaluate(condition: &Condition, ctx: &ExecutionContext) -> bool {
    match condition {
        Condition::True => true,
        Condition::False => false,
        Condition::Intent { name } => !ctx.intent.name.is_empty() && ctx.intent.name == *name,
        Condition::Fact { key } => !ctx.fact(key).is_null(),
        Condition::FactValue { key, expected } => ctx.fact(key) == expected,
        Condition::Drive { name, threshold, gt } => compare(ctx.drive(name), *threshold, *gt),
        Condition::Affect { name, threshold, gt } => compare(ctx.affect(name), *threshold, *gt),
        Condition::And { left, right } => evaluate(left, ctx) && evaluate(right, ctx),
        Condition::Or { left, right } => evaluate(left, ctx) || evaluate(right, ctx),
        Condition::Not { operand } => !evaluate(operand, ctx),
    }
}

// NaN on either side compares false in both directions.
fn compare(observed: f64, threshold: f64, greater_than: bool) -> bool {
    if greater_than {
        observed > threshold
    } else {
        observed < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::Condition;
    use crate::context::{ExecutionContext, Intent};
    use crate::value::Value;

    fn context() -> ExecutionContext {
        ExecutionContext::new(Intent::new("request_help"))
            .with_fact("urgency", 0.9)
            .with_fact("channel", "slack")
            .with_fact("cleared", Value::Null)
            .with_drive("stress", 0.8)
            .with_affect("mood", -0.3)
    }

    #[test]
    fn intent_matches_exact_name_only() {
        let ctx = context();
        assert!(Condition::intent("request_help").evaluate(&ctx));
        assert!(!Condition::intent("request").evaluate(&ctx));
        assert!(!Condition::intent("").evaluate(&ExecutionContext::default()));
    }

    #[test]
    fn fact_presence_treats_null_as_absent() {
        let ctx = context();
        assert!(Condition::fact("urgency").evaluate(&ctx));
        assert!(!Condition::fact("cleared").evaluate(&ctx));
        assert!(!Condition::fact("missing").evaluate(&ctx));
    }

    #[test]
    fn fact_value_uses_type_strict_equality() {
        let ctx = context();
        assert!(Condition::fact_value("channel", "slack").evaluate(&ctx));
        assert!(!Condition::fact_value("channel", "email").evaluate(&ctx));
        assert!(!Condition::fact_value("urgency", 1).evaluate(&ctx));
        assert!(Condition::fact_value("missing", Value::Null).evaluate(&ctx));
    }

    #[test]
    fn drive_and_affect_comparisons_are_strict() {
        let ctx = context();
        assert!(Condition::drive_above("stress", 0.5).evaluate(&ctx));
        assert!(!Condition::drive_above("stress", 0.8).evaluate(&ctx));
        assert!(!Condition::drive_below("stress", 0.8).evaluate(&ctx));
        assert!(Condition::drive_below("calm", 0.1).evaluate(&ctx));
        assert!(Condition::affect_below("mood", 0.0).evaluate(&ctx));
        assert!(!Condition::affect_above("mood", -0.3).evaluate(&ctx));
    }

    #[test]
    fn nan_thresholds_fail_closed() {
        let ctx = context();
        assert!(!Condition::drive_above("stress", f64::NAN).evaluate(&ctx));
        assert!(!Condition::drive_below("stress", f64::NAN).evaluate(&ctx));
    }

    #[test]
    fn boolean_combinators_compose() {
        let ctx = context();
        let urgent = Condition::fact("urgency").and(Condition::drive_above("stress", 0.5));
        assert!(urgent.evaluate(&ctx));
        assert!(!urgent.clone().negate().evaluate(&ctx));
        assert!(Condition::False.or(Condition::True).evaluate(&ctx));
        assert!(!Condition::True.and(Condition::False).evaluate(&ctx));
    }

    #[test]
    fn tagged_serialization_accepts_nested_trees() {
        let raw = r#"{
            "kind": "and",
            "left": { "kind": "fact", "key": "urgency" },
            "right": { "kind": "drive", "name": "stress", "threshold": 0.5 }
        }"#;
        let parsed: Condition = serde_json::from_str(raw).expect("valid condition");

        assert_eq!(
            parsed,
            Condition::fact("urgency").and(Condition::drive_above("stress", 0.5))
        );
    }
}
