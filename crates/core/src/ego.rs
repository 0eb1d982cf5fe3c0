//! EGO: filters and ranks proposals under forbid, budget and tie-break policies.
//!
//! Each proposal gets exactly one disposition, decided by the first matching check:
//!
//! 1. weight below `min_weight` → "Low weight"
//! 2. a forbid policy matches → "Forbidden" (carries the policy id)
//! 3. the action's budget is spent → "Budget exceeded"
//! 4. `select_top_n` already reached → "Not selected"
//! 5. equal weight with the previously selected proposal → tie-break, loser gets "Tie-break loss"
//! 6. otherwise selected, and the action's budget counter is charged immediately
//!
//! Budget counters are the only state that survives between cycles.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::condition::Condition;
use crate::context::ExecutionContext;
use crate::id::{sort_by_weight_desc, Proposal};

pub const REASON_SELECTED: &str = "Selected";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub String);

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForbidPolicy {
    pub id: PolicyId,
    pub condition: Condition,
    /// `None` matches any action.
    pub action: Option<String>,
}

impl ForbidPolicy {
    pub fn new(id: impl Into<String>, condition: Condition, action: Option<String>) -> Self {
        Self { id: PolicyId(id.into()), condition, action }
    }

    pub fn matches(&self, proposal: &Proposal, ctx: &ExecutionContext) -> bool {
        let action_matches = self.action.as_deref().map_or(true, |action| action == proposal.action);
        action_matches && self.condition.evaluate(ctx)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub action: String,
    pub max_count: u32,
    pub window_seconds: u64,
    pub current_count: u32,
    pub window_start_ms: u64,
}

impl BudgetPolicy {
    pub fn new(action: impl Into<String>, max_count: u32, window_seconds: u64) -> Self {
        Self { action: action.into(), max_count, window_seconds, current_count: 0, window_start_ms: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_count >= self.max_count
    }

    fn window_ms(&self) -> u64 {
        self.window_seconds.saturating_mul(1000)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
    /// Lower source line wins.
    #[default]
    RuleOrder,
    /// Ascending action name wins.
    Alphabetical,
    /// Ascending `fnv1a(action) ^ line` wins.
    #[serde(alias = "hash_based")]
    Hash,
}

impl TieBreaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleOrder => "rule_order",
            Self::Alphabetical => "alphabetical",
            Self::Hash => "hash",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rule_order" => Some(Self::RuleOrder),
            "alphabetical" => Some(Self::Alphabetical),
            "hash" | "hash_based" => Some(Self::Hash),
            _ => None,
        }
    }

    /// `Greater` means `current` outranks `previous`.
    fn compare(&self, previous: &Proposal, current: &Proposal) -> Ordering {
        match self {
            Self::RuleOrder => previous.rule_line.cmp(&current.rule_line),
            Self::Alphabetical => previous.action.cmp(&current.action),
            Self::Hash => tie_hash(previous).cmp(&tie_hash(current)),
        }
    }
}

fn tie_hash(proposal: &Proposal) -> u32 {
    fnv1a(proposal.action.as_bytes()) ^ proposal.rule_line
}

/// 32-bit FNV-1a, stable across platforms and releases.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5_u32, |hash, byte| (hash ^ u32::from(*byte)).wrapping_mul(0x0100_0193))
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EgoConfig {
    pub select_top_n: usize,
    pub tie_breaker: TieBreaker,
    pub min_weight: f64,
}

impl Default for EgoConfig {
    fn default() -> Self {
        Self { select_top_n: 1, tie_breaker: TieBreaker::RuleOrder, min_weight: 0.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    LowWeight,
    Forbidden,
    BudgetExceeded,
    NotSelected,
    TieBreakLoss,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowWeight => "Low weight",
            Self::Forbidden => "Forbidden",
            Self::BudgetExceeded => "Budget exceeded",
            Self::NotSelected => "Not selected",
            Self::TieBreakLoss => "Tie-break loss",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectedProposal {
    pub proposal: Proposal,
    pub rank: usize,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedProposal {
    pub proposal: Proposal,
    pub reason: RejectionReason,
    pub policy_id: Option<PolicyId>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub selected: Vec<SelectedProposal>,
    pub rejected: Vec<RejectedProposal>,
}

impl SelectionResult {
    pub fn selected_actions(&self) -> Vec<&str> {
        self.selected.iter().map(|entry| entry.proposal.action.as_str()).collect()
    }

    fn reject(&mut self, proposal: Proposal, reason: RejectionReason, policy_id: Option<PolicyId>) {
        self.rejected.push(RejectedProposal { proposal, reason, policy_id });
    }
}

#[derive(Clone, Debug, Default)]
pub struct Ego {
    forbid: Vec<ForbidPolicy>,
    budgets: Vec<BudgetPolicy>,
    config: EgoConfig,
}

impl Ego {
    pub fn new(config: EgoConfig) -> Self {
        Self { config, ..Self::default() }
    }

    pub fn config(&self) -> &EgoConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EgoConfig) {
        self.config = config;
    }

    pub fn add_forbid_policy(&mut self, policy: ForbidPolicy) {
        self.forbid.push(policy);
    }

    pub fn add_budget_policy(&mut self, policy: BudgetPolicy) {
        self.budgets.push(policy);
    }

    pub fn forbid_policies(&self) -> &[ForbidPolicy] {
        &self.forbid
    }

    pub fn budget_policies(&self) -> &[BudgetPolicy] {
        &self.budgets
    }

    pub fn budget_for(&self, action: &str) -> Option<&BudgetPolicy> {
        self.budgets.iter().find(|policy| policy.action == action)
    }

    /// First forbid policy blocking `proposal`, if any.
    pub fn forbidding_policy(
        &self,
        proposal: &Proposal,
        ctx: &ExecutionContext,
    ) -> Option<&ForbidPolicy> {
        self.forbid.iter().find(|policy| policy.matches(proposal, ctx))
    }

    pub fn exceeds_budget(&self, proposal: &Proposal) -> bool {
        self.budgets
            .iter()
            .any(|policy| policy.action == proposal.action && policy.is_exhausted())
    }

    /// Reset every budget whose window has fully elapsed at `now_ms`.
    ///
    /// Called once per cycle before selection; nothing resets counters between cycles.
    pub fn reset_budget_windows(&mut self, now_ms: u64) {
        for policy in &mut self.budgets {
            if now_ms.saturating_sub(policy.window_start_ms) >= policy.window_ms() {
                policy.current_count = 0;
                policy.window_start_ms = now_ms;
            }
        }
    }

    pub fn select(&mut self, proposals: &[Proposal], ctx: &ExecutionContext) -> SelectionResult {
        let mut ordered = proposals.to_vec();
        sort_by_weight_desc(&mut ordered);

        let mut result = SelectionResult::default();

        for proposal in ordered {
            if proposal.weight < self.config.min_weight {
                result.reject(proposal, RejectionReason::LowWeight, None);
                continue;
            }

            if let Some(policy) = self.forbidding_policy(&proposal, ctx) {
                let policy_id = policy.id.clone();
                result.reject(proposal, RejectionReason::Forbidden, Some(policy_id));
                continue;
            }

            if self.exceeds_budget(&proposal) {
                result.reject(proposal, RejectionReason::BudgetExceeded, None);
                continue;
            }

            if result.selected.len() >= self.config.select_top_n {
                result.reject(proposal, RejectionReason::NotSelected, None);
                continue;
            }

            if let Some(previous) = result.selected.last_mut() {
                if previous.proposal.weight == proposal.weight {
                    let current_wins = self.config.tie_breaker.compare(&previous.proposal, &proposal)
                        == Ordering::Greater;
                    if current_wins {
                        let action = proposal.action.clone();
                        let displaced = std::mem::replace(&mut previous.proposal, proposal);
                        debug!(
                            event_name = "ego.tie_break.displaced",
                            winner = %action,
                            loser = %displaced.action,
                            "tie-break displaced previous selection"
                        );
                        self.charge_budget(&action);
                        result.reject(displaced, RejectionReason::TieBreakLoss, None);
                    } else {
                        result.reject(proposal, RejectionReason::TieBreakLoss, None);
                    }
                    continue;
                }
            }

            let rank = result.selected.len() + 1;
            self.charge_budget(&proposal.action);
            result.selected.push(SelectedProposal {
                proposal,
                rank,
                reason: REASON_SELECTED.to_string(),
            });
        }

        result
    }

    fn charge_budget(&mut self, action: &str) {
        if let Some(policy) = self.budgets.iter_mut().find(|policy| policy.action == action) {
            policy.current_count = policy.current_count.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        fnv1a, BudgetPolicy, Ego, EgoConfig, ForbidPolicy, RejectionReason, TieBreaker,
    };
    use crate::condition::Condition;
    use crate::context::{ExecutionContext, Intent};
    use crate::id::{Proposal, RuleId};
    use crate::value::Args;

    fn proposal(action: &str, weight: f64, line: u32) -> Proposal {
        Proposal {
            action: action.to_string(),
            args: Args::new(),
            weight,
            rule_id: RuleId(format!("rule_{line}")),
            rule_line: line,
        }
    }

    fn ego(select_top_n: usize, tie_breaker: TieBreaker) -> Ego {
        Ego::new(EgoConfig { select_top_n, tie_breaker, min_weight: 0.0 })
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Intent::new("request_help")).with_fact("maintenance", true)
    }

    #[test]
    fn selected_count_never_exceeds_top_n() {
        for top_n in 0..4 {
            let mut ego = ego(top_n, TieBreaker::RuleOrder);
            let proposals: Vec<Proposal> =
                (0..6).map(|i| proposal(&format!("a{i}"), 0.9 - f64::from(i) * 0.1, i)).collect();

            let result = ego.select(&proposals, &ctx());

            assert_eq!(result.selected.len(), top_n.min(proposals.len()));
            assert_eq!(result.selected.len() + result.rejected.len(), proposals.len());
        }
    }

    #[test]
    fn ranks_are_assigned_in_selection_order() {
        let mut ego = ego(3, TieBreaker::RuleOrder);
        let result =
            ego.select(&[proposal("b", 0.4, 2), proposal("a", 0.8, 1), proposal("c", 0.6, 3)], &ctx());

        assert_eq!(result.selected_actions(), vec!["a", "c", "b"]);
        assert_eq!(result.selected.iter().map(|entry| entry.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(result.selected.iter().all(|entry| entry.reason == "Selected"));
    }

    #[test]
    fn low_weight_is_checked_first() {
        let mut ego = Ego::new(EgoConfig { min_weight: 0.5, ..EgoConfig::default() });
        ego.add_forbid_policy(ForbidPolicy::new("forbid_1", Condition::True, None));

        let result = ego.select(&[proposal("notify", 0.3, 1)], &ctx());

        assert_eq!(result.rejected[0].reason, RejectionReason::LowWeight);
        assert_eq!(result.rejected[0].reason.as_str(), "Low weight");
        assert!(result.rejected[0].policy_id.is_none());
    }

    #[test]
    fn forbid_without_pattern_blocks_any_action() {
        let mut ego = ego(5, TieBreaker::RuleOrder);
        ego.add_forbid_policy(ForbidPolicy::new("forbid_1", Condition::fact("maintenance"), None));

        let result = ego.select(&[proposal("notify", 0.9, 1), proposal("log", 0.5, 2)], &ctx());

        assert!(result.selected.is_empty());
        assert!(result.rejected.iter().all(|entry| entry.reason == RejectionReason::Forbidden));
        assert!(result
            .rejected
            .iter()
            .all(|entry| entry.policy_id.as_ref().map(|id| id.0.as_str()) == Some("forbid_1")));
    }

    #[test]
    fn forbid_with_pattern_blocks_exact_name_only() {
        let mut ego = ego(5, TieBreaker::RuleOrder);
        ego.add_forbid_policy(ForbidPolicy::new(
            "forbid_1",
            Condition::True,
            Some("notify".to_string()),
        ));

        let result = ego.select(
            &[proposal("notify", 0.9, 1), proposal("notify_all", 0.8, 2), proposal("log", 0.7, 3)],
            &ctx(),
        );

        assert_eq!(result.selected_actions(), vec!["notify_all", "log"]);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].proposal.action, "notify");
    }

    #[test]
    fn forbid_with_false_condition_allows() {
        let mut ego = ego(1, TieBreaker::RuleOrder);
        ego.add_forbid_policy(ForbidPolicy::new("forbid_1", Condition::fact("absent"), None));

        let result = ego.select(&[proposal("notify", 0.9, 1)], &ctx());

        assert_eq!(result.selected_actions(), vec!["notify"]);
    }

    #[test]
    fn exhausted_budget_rejects_and_selection_charges_counter() {
        let mut ego = ego(5, TieBreaker::RuleOrder);
        ego.add_budget_policy(BudgetPolicy::new("notify", 2, 60));

        let result = ego.select(
            &[proposal("notify", 0.9, 1), proposal("notify", 0.8, 2), proposal("notify", 0.7, 3)],
            &ctx(),
        );

        assert_eq!(result.selected.len(), 2);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].reason, RejectionReason::BudgetExceeded);
        assert_eq!(ego.budget_for("notify").map(|policy| policy.current_count), Some(2));

        let next = ego.select(&[proposal("notify", 0.9, 1)], &ctx());
        assert_eq!(next.rejected[0].reason.as_str(), "Budget exceeded");
        assert_eq!(ego.budget_for("notify").map(|policy| policy.current_count), Some(2));
    }

    #[test]
    fn budget_is_checked_before_top_n() {
        let mut ego = ego(0, TieBreaker::RuleOrder);
        let mut spent = BudgetPolicy::new("notify", 1, 60);
        spent.current_count = 1;
        ego.add_budget_policy(spent);

        let result = ego.select(&[proposal("notify", 0.9, 1), proposal("log", 0.8, 2)], &ctx());

        assert_eq!(result.rejected[0].reason, RejectionReason::BudgetExceeded);
        assert_eq!(result.rejected[1].reason, RejectionReason::NotSelected);
    }

    #[test]
    fn budget_window_resets_only_after_full_window() {
        let mut ego = ego(1, TieBreaker::RuleOrder);
        let mut policy = BudgetPolicy::new("notify", 1, 60);
        policy.current_count = 1;
        policy.window_start_ms = 1_000;
        ego.add_budget_policy(policy);

        ego.reset_budget_windows(60_999);
        let unchanged = ego.budget_for("notify").cloned();
        assert_eq!(unchanged.as_ref().map(|policy| policy.current_count), Some(1));
        assert_eq!(unchanged.as_ref().map(|policy| policy.window_start_ms), Some(1_000));

        ego.reset_budget_windows(61_000);
        let reset = ego.budget_for("notify").cloned();
        assert_eq!(reset.as_ref().map(|policy| policy.current_count), Some(0));
        assert_eq!(reset.as_ref().map(|policy| policy.window_start_ms), Some(61_000));
    }

    #[test]
    fn clock_going_backwards_never_resets() {
        let mut ego = ego(1, TieBreaker::RuleOrder);
        let mut policy = BudgetPolicy::new("notify", 1, 1);
        policy.current_count = 1;
        policy.window_start_ms = 50_000;
        ego.add_budget_policy(policy);

        ego.reset_budget_windows(10_000);

        assert_eq!(ego.budget_for("notify").map(|policy| policy.current_count), Some(1));
    }

    #[test]
    fn rule_order_tie_break_keeps_lower_line() {
        let mut ego = ego(2, TieBreaker::RuleOrder);
        let result = ego.select(&[proposal("b", 0.5, 7), proposal("a", 0.5, 3)], &ctx());

        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected[0].proposal.rule_line, 3);
        assert_eq!(result.selected[0].rank, 1);
        assert_eq!(result.rejected[0].proposal.rule_line, 7);
        assert_eq!(result.rejected[0].reason.as_str(), "Tie-break loss");
    }

    #[test]
    fn rule_order_tie_break_rejects_later_line_arriving_second() {
        let mut ego = ego(2, TieBreaker::RuleOrder);
        let result = ego.select(&[proposal("a", 0.5, 3), proposal("b", 0.5, 7)], &ctx());

        assert_eq!(result.selected_actions(), vec!["a"]);
        assert_eq!(result.rejected[0].proposal.action, "b");
        assert_eq!(result.rejected[0].reason, RejectionReason::TieBreakLoss);
    }

    #[test]
    fn alphabetical_tie_break_prefers_ascending_name() {
        let mut ego = ego(2, TieBreaker::Alphabetical);
        ego.add_budget_policy(BudgetPolicy::new("alert", 5, 60));
        ego.add_budget_policy(BudgetPolicy::new("zap", 5, 60));

        let result = ego.select(&[proposal("zap", 0.5, 1), proposal("alert", 0.5, 2)], &ctx());

        assert_eq!(result.selected_actions(), vec!["alert"]);
        assert_eq!(result.rejected[0].proposal.action, "zap");
        // Charges are monotonic: the displaced selection keeps its charge.
        assert_eq!(ego.budget_for("zap").map(|policy| policy.current_count), Some(1));
        assert_eq!(ego.budget_for("alert").map(|policy| policy.current_count), Some(1));
    }

    #[test]
    fn hash_tie_break_prefers_lower_hash() {
        // alert ^ 1 = 0xb7c3_58f8, zap ^ 2 = 0x9b95_e23e: hash order overrides line and name.
        let mut ego = ego(2, TieBreaker::Hash);
        let result = ego.select(&[proposal("alert", 0.5, 1), proposal("zap", 0.5, 2)], &ctx());

        assert_eq!(result.selected_actions(), vec!["zap"]);
        assert_eq!(result.rejected[0].proposal.action, "alert");
        assert_eq!(result.rejected[0].reason, RejectionReason::TieBreakLoss);
    }

    #[test]
    fn displaced_entry_is_not_compared_again() {
        let mut ego = ego(3, TieBreaker::RuleOrder);
        let result = ego.select(
            &[proposal("a", 0.5, 5), proposal("b", 0.5, 2), proposal("c", 0.5, 9)],
            &ctx(),
        );

        assert_eq!(result.selected_actions(), vec!["b"]);
        let losers: Vec<&str> =
            result.rejected.iter().map(|entry| entry.proposal.action.as_str()).collect();
        assert_eq!(losers, vec!["a", "c"]);
    }

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a(b"alert"), 0xb7c3_58f9);
        assert_eq!(fnv1a(b"zap"), 0x9b95_e23c);
    }

    #[test]
    fn tie_breaker_parse_accepts_module_spellings() {
        assert_eq!(TieBreaker::parse("rule_order"), Some(TieBreaker::RuleOrder));
        assert_eq!(TieBreaker::parse("Alphabetical"), Some(TieBreaker::Alphabetical));
        assert_eq!(TieBreaker::parse("hash"), Some(TieBreaker::Hash));
        assert_eq!(TieBreaker::parse("random"), None);
    }
}
