use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::act::ActionResult;
use crate::context::Intent;
use crate::ego::SelectionResult;
use crate::id::Proposal;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IdPhase {
    pub rules_evaluated: usize,
    pub proposals_count: usize,
    pub duration_ms: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EgoPhase {
    pub selected_count: usize,
    pub rejected_count: usize,
    pub duration_ms: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ActPhase {
    pub actions_executed: usize,
    pub duration_ms: f64,
}

/// Record of the most recent cycle. The runtime keeps one and overwrites it every cycle.
///
/// Besides phase counts it holds the intent, proposals, selection and results so the
/// last decision can be inspected, including why proposals were rejected.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trace {
    pub cycle_id: String,
    pub timestamp_ms: u64,
    pub intent: Intent,
    pub proposals: Vec<Proposal>,
    pub selection: SelectionResult,
    pub results: Vec<ActionResult>,
    pub id_phase: IdPhase,
    pub ego_phase: EgoPhase,
    pub act_phase: ActPhase,
    pub total_duration_ms: f64,
}

impl Trace {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "cycle_id": self.cycle_id,
            "timestamp": self.timestamp_ms,
            "intent": { "name": self.intent.name },
            "id_phase": {
                "rules_evaluated": self.id_phase.rules_evaluated,
                "proposals_count": self.id_phase.proposals_count,
                "duration_ms": self.id_phase.duration_ms,
            },
            "ego_phase": {
                "selected_count": self.ego_phase.selected_count,
                "rejected_count": self.ego_phase.rejected_count,
                "duration_ms": self.ego_phase.duration_ms,
            },
            "act_phase": {
                "actions_executed": self.act_phase.actions_executed,
                "duration_ms": self.act_phase.duration_ms,
            },
            "total_duration_ms": self.total_duration_ms,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetrics {
    pub total_cycles: u64,
    pub total_proposals: u64,
    pub total_executions: u64,
    pub avg_cycle_duration_ms: f64,
}

impl RuntimeMetrics {
    pub fn record_cycle(&mut self, proposals: usize, executions: usize, duration_ms: f64) {
        self.total_cycles += 1;
        self.total_proposals += proposals as u64;
        self.total_executions += executions as u64;
        self.avg_cycle_duration_ms +=
            (duration_ms - self.avg_cycle_duration_ms) / self.total_cycles as f64;
    }
}
