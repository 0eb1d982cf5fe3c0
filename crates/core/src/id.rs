//! ID engine: turns matching rules into weighted proposals.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::context::ExecutionContext;
use crate::value::Args;

/// Per-unit amplification each drive applies to every proposal.
pub const DRIVE_WEIGHT_FACTOR: f64 = 0.1;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub line: u32,
    pub condition: Condition,
    pub action: String,
    pub args: Args,
    pub base_weight: f64,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        line: u32,
        condition: Condition,
        action: impl Into<String>,
        base_weight: f64,
    ) -> Self {
        Self {
            id: RuleId(id.into()),
            line,
            condition,
            action: action.into(),
            args: Args::new(),
            base_weight,
        }
    }

    pub fn with_arg(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::value::Value>,
    ) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// A candidate action produced by a matching rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub action: String,
    pub args: Args,
    /// Clamped to at most 1.0; no lower bound is enforced.
    pub weight: f64,
    pub rule_id: RuleId,
    pub rule_line: u32,
}

#[derive(Clone, Debug, Default)]
pub struct IdEngine {
    rules: Vec<Rule>,
}

impl IdEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn extend(&mut self, rules: impl IntoIterator<Item = Rule>) {
        self.rules.extend(rules);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule in registration order and return matching proposals,
    /// heaviest first. Equal weights keep registration order.
    pub fn evaluate(&self, ctx: &ExecutionContext) -> Vec<Proposal> {
        let mut proposals: Vec<Proposal> = self
            .rules
            .iter()
            .filter(|rule| rule.condition.evaluate(ctx))
            .map(|rule| Proposal {
                action: rule.action.clone(),
                args: rule.args.clone(),
                weight: weighted(rule.base_weight, ctx),
                rule_id: rule.id.clone(),
                rule_line: rule.line,
            })
            .collect();

        sort_by_weight_desc(&mut proposals);
        proposals
    }
}

/// `base × Π(1 + 0.1 × intensity)` over every drive in the context, capped at 1.0.
pub fn weighted(base_weight: f64, ctx: &ExecutionContext) -> f64 {
    let amplified = ctx
        .drives
        .values()
        .fold(base_weight, |weight, intensity| weight * (1.0 + intensity * DRIVE_WEIGHT_FACTOR));
    amplified.min(1.0)
}

/// Stable descending sort; ties keep their incoming order.
pub fn sort_by_weight_desc(proposals: &mut [Proposal]) {
    proposals.sort_by(|a, b| b.weight.total_cmp(&a.weight));
}

#[cfg(test)]
mod tests {
    use super::{weighted, IdEngine, Rule};
    use crate::condition::Condition;
    use crate::context::{ExecutionContext, Intent};
    use crate::value::Value;

    fn help_context() -> ExecutionContext {
        ExecutionContext::new(Intent::new("request_help"))
            .with_fact("urgency", 0.9)
            .with_drive("stress", 0.8)
    }

    #[test]
    fn matching_rule_yields_drive_weighted_proposal() {
        let engine = IdEngine::with_rules(vec![Rule::new(
            "rule_1",
            3,
            Condition::fact("urgency").and(Condition::drive_above("stress", 0.5)),
            "notify",
            0.7,
        )
        .with_arg("channel", "slack")]);

        let proposals = engine.evaluate(&help_context());

        assert_eq!(proposals.len(), 1);
        let proposal = &proposals[0];
        assert_eq!(proposal.action, "notify");
        assert!((proposal.weight - 0.756).abs() < 1e-9);
        assert_eq!(proposal.args.get("channel"), Some(&Value::from("slack")));
        assert_eq!(proposal.rule_line, 3);
        assert_eq!(proposal.rule_id.0, "rule_1");
    }

    #[test]
    fn non_matching_rules_produce_nothing() {
        let engine =
            IdEngine::with_rules(vec![Rule::new("r", 1, Condition::intent("other"), "noop", 0.5)]);
        assert!(engine.evaluate(&help_context()).is_empty());
    }

    #[test]
    fn every_drive_amplifies_and_weight_is_capped() {
        let ctx = ExecutionContext::default().with_drive("a", 1.0).with_drive("b", 1.0);
        assert!((weighted(0.5, &ctx) - 0.605).abs() < 1e-9);
        assert_eq!(weighted(0.95, &ctx), 1.0);
    }

    #[test]
    fn negative_drives_can_push_weight_below_zero() {
        let ctx = ExecutionContext::default().with_drive("dread", -20.0);
        assert!(weighted(0.5, &ctx) < 0.0);
    }

    #[test]
    fn output_is_weight_descending_with_registration_order_for_ties() {
        let engine = IdEngine::with_rules(vec![
            Rule::new("low", 1, Condition::True, "a", 0.2),
            Rule::new("tie_first", 2, Condition::True, "b", 0.6),
            Rule::new("high", 3, Condition::True, "c", 0.9),
            Rule::new("tie_second", 4, Condition::True, "d", 0.6),
        ]);

        let order: Vec<String> = engine
            .evaluate(&ExecutionContext::default())
            .into_iter()
            .map(|proposal| proposal.rule_id.0)
            .collect();

        assert_eq!(order, vec!["high", "tie_first", "tie_second", "low"]);
    }

    #[test]
    fn evaluation_leaves_rule_set_untouched() {
        let engine = IdEngine::with_rules(vec![Rule::new("r", 1, Condition::True, "a", 0.4)]);
        let before = engine.rules().to_vec();
        let _ = engine.evaluate(&help_context());
        assert_eq!(engine.rules(), before.as_slice());
    }
}
