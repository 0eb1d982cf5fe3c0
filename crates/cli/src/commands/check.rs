use std::path::Path;

use serde::Serialize;
use somnia_core::{load_module, ModuleSummary};

use crate::commands::{CommandResult, EXIT_MODULE_LOAD};

#[derive(Debug, Serialize)]
struct CheckReport {
    command: &'static str,
    status: &'static str,
    message: String,
    module: ModuleSummary,
}

pub fn run(module: &Path) -> CommandResult {
    match load_module(module) {
        Ok(compiled) => {
            let summary = compiled.summary();
            CommandResult::report(&CheckReport {
                command: "check",
                status: "ok",
                message: format!(
                    "module `{}` is valid: {} rule(s), {} forbid, {} budget",
                    summary.name, summary.rules, summary.forbid_policies, summary.budget_policies
                ),
                module: summary,
            })
        }
        Err(error) => {
            CommandResult::failure("check", "module_load", error.to_string(), EXIT_MODULE_LOAD)
        }
    }
}
