use std::path::Path;

use serde::Serialize;
use somnia_core::config::{LoadOptions, SomniaConfig};
use somnia_core::{ActionResult, CycleResult, ModuleSummary, Runtime};

use crate::commands::{
    CommandResult, EXIT_ASYNC_RUNTIME, EXIT_CONFIG, EXIT_INVALID_INTENT, EXIT_MODULE_LOAD,
};

const COMMAND: &str = "run";

#[derive(Debug, Serialize)]
struct ProposalLine {
    action: String,
    weight: f64,
    rule_id: String,
    rule_line: u32,
}

#[derive(Debug, Serialize)]
struct SelectedLine {
    action: String,
    rank: usize,
    reason: String,
}

#[derive(Debug, Serialize)]
struct RejectedLine {
    action: String,
    reason: String,
    policy_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    command: &'static str,
    status: &'static str,
    message: String,
    module: ModuleSummary,
    cycle_id: String,
    proposals: Vec<ProposalLine>,
    selected: Vec<SelectedLine>,
    rejected: Vec<RejectedLine>,
    results: Vec<ActionResult>,
    trace: Option<serde_json::Value>,
}

pub fn run(module: &Path, intent_json: &str, config_path: Option<&Path>) -> CommandResult {
    let config = match SomniaConfig::load(LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                error.to_string(),
                EXIT_CONFIG,
            )
        }
    };

    let async_runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "async_runtime",
                format!("failed to initialize async runtime: {error}"),
                EXIT_ASYNC_RUNTIME,
            )
        }
    };

    let mut runtime = Runtime::builder().config(config).register_builtins().build();
    let summary = match runtime.load_module(module) {
        Ok(summary) => summary,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "module_load",
                error.to_string(),
                EXIT_MODULE_LOAD,
            )
        }
    };

    let cycle = match async_runtime.block_on(runtime.run_cycle_json(intent_json)) {
        Ok(cycle) => cycle,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "invalid_intent",
                error.to_string(),
                EXIT_INVALID_INTENT,
            )
        }
    };

    let trace = runtime.last_trace().map(|trace| trace.to_json());
    CommandResult::report(&build_report(summary, cycle, trace))
}

fn build_report(
    module: ModuleSummary,
    cycle: CycleResult,
    trace: Option<serde_json::Value>,
) -> RunReport {
    let failures = cycle.results.iter().filter(|result| !result.is_success()).count();
    let message = format!(
        "cycle {} produced {} proposal(s), selected {}, executed {} ({} failed)",
        cycle.cycle_id,
        cycle.proposals.len(),
        cycle.selection.selected.len(),
        cycle.result_count(),
        failures
    );

    RunReport {
        command: COMMAND,
        status: "ok",
        message,
        module,
        cycle_id: cycle.cycle_id,
        proposals: cycle
            .proposals
            .into_iter()
            .map(|proposal| ProposalLine {
                action: proposal.action,
                weight: proposal.weight,
                rule_id: proposal.rule_id.0,
                rule_line: proposal.rule_line,
            })
            .collect(),
        selected: cycle
            .selection
            .selected
            .into_iter()
            .map(|entry| SelectedLine {
                action: entry.proposal.action,
                rank: entry.rank,
                reason: entry.reason,
            })
            .collect(),
        rejected: cycle
            .selection
            .rejected
            .into_iter()
            .map(|entry| RejectedLine {
                action: entry.proposal.action,
                reason: entry.reason.as_str().to_string(),
                policy_id: entry.policy_id.map(|id| id.0),
            })
            .collect(),
        results: cycle.results,
        trace,
    }
}
