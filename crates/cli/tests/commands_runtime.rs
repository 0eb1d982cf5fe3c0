use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use somnia_cli::commands::{check, config, run};
use tempfile::TempDir;

const HELPER_MODULE: &str = r#"
name = "helper"
version = "0.1.0"

[id.drives]
stress = 0.8

[[id.rules]]
when = { kind = "and", left = { kind = "fact", key = "urgency" }, right = { kind = "drive", name = "stress", threshold = 0.5 } }
propose = "respond"
args = { status = 202, body = "on it" }
weight = 0.7

[[id.rules]]
when = { kind = "intent", name = "request_help" }
propose = "log"
args = { level = "info", message = "help requested" }
weight = 0.3

[ego]
select_top_n = 2

[[ego.forbid]]
when = { kind = "fact", key = "maintenance" }
action = "respond"
"#;

#[test]
fn run_executes_one_cycle_with_builtins() {
    with_env(&[], || {
        let (_dir, module) = write_module("helper.toml", HELPER_MODULE);
        let result = run::run(
            &module,
            r#"{"name": "request_help", "facts": {"urgency": 0.9}}"#,
            None,
        );
        assert_eq!(result.exit_code, 0, "expected successful cycle: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "run");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["module"]["name"], "helper");
        assert_eq!(payload["proposals"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["selected"][0]["action"], "respond");
        assert_eq!(payload["selected"][1]["action"], "log");
        assert_eq!(payload["results"][0]["outcome"], "success");
        assert_eq!(payload["results"][0]["value"], 202);
        assert_eq!(payload["trace"]["intent"]["name"], "request_help");
        assert_eq!(payload["trace"]["act_phase"]["actions_executed"], 2);
    });
}

#[test]
fn run_reports_forbidden_proposals() {
    with_env(&[], || {
        let (_dir, module) = write_module("helper.toml", HELPER_MODULE);
        let result = run::run(
            &module,
            r#"{"intent": "request_help", "facts": {"urgency": 0.9, "maintenance": true}}"#,
            None,
        );
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["selected"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["rejected"][0]["action"], "respond");
        assert_eq!(payload["rejected"][0]["reason"], "Forbidden");
        assert_eq!(payload["rejected"][0]["policy_id"], "forbid_1");
    });
}

#[test]
fn run_rejects_invalid_intent_json() {
    with_env(&[], || {
        let (_dir, module) = write_module("helper.toml", HELPER_MODULE);
        let result = run::run(&module, "{not json", None);
        assert_eq!(result.exit_code, 5, "expected invalid intent code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "invalid_intent");
    });
}

#[test]
fn run_reports_module_load_failure() {
    with_env(&[], || {
        let result = run::run(&PathBuf::from("does-not-exist.toml"), r#"{"name": "x"}"#, None);
        assert_eq!(result.exit_code, 4, "expected module load failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "run");
        assert_eq!(payload["error_class"], "module_load");
    });
}

#[test]
fn run_returns_config_failure_for_invalid_env() {
    with_env(&[("SOMNIA_ACT_DEFAULT_TIMEOUT_MS", "0")], || {
        let (_dir, module) = write_module("helper.toml", HELPER_MODULE);
        let result = run::run(&module, r#"{"name": "request_help"}"#, None);
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn check_summarizes_valid_module() {
    with_env(&[], || {
        let (_dir, module) = write_module("helper.toml", HELPER_MODULE);
        let result = check::run(&module);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "check");
        assert_eq!(payload["module"]["rules"], 2);
        assert_eq!(payload["module"]["forbid_policies"], 1);
        assert_eq!(payload["module"]["drives"], 1);
    });
}

#[test]
fn check_rejects_invalid_module() {
    with_env(&[], || {
        let (_dir, module) = write_module(
            "broken.json",
            r#"{"name": "broken", "id": {"rules": [
                {"when": {"kind": "true"}, "propose": "log", "weight": 2.0}
            ]}}"#,
        );
        let result = check::run(&module);
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "module_load");
    });
}

#[test]
fn config_attributes_sources() {
    with_env(&[("SOMNIA_EGO_SELECT_TOP_N", "4")], || {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("somnia.toml");
        fs::write(&path, "[act]\ncancel_on_error = true\n").expect("write config");

        let result = config::run(Some(path.as_path()));
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("- ego.select_top_n = 4 (source: env (SOMNIA_EGO_SELECT_TOP_N))"));
        assert!(message.contains("- act.cancel_on_error = true (source: file ("));
        assert!(message.contains("- ego.tie_breaker = rule_order (source: default)"));
    });
}

fn write_module(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("module should be written");
    (dir, path)
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SOMNIA_RUNTIME_SEED",
        "SOMNIA_RUNTIME_ENABLE_TRACING",
        "SOMNIA_EGO_SELECT_TOP_N",
        "SOMNIA_EGO_TIE_BREAKER",
        "SOMNIA_EGO_MIN_WEIGHT",
        "SOMNIA_ACT_DEFAULT_TIMEOUT_MS",
        "SOMNIA_ACT_CANCEL_ON_ERROR",
        "SOMNIA_ACT_BACKOFF_BASE_MS",
        "SOMNIA_LOGGING_LEVEL",
        "SOMNIA_LOGGING_FORMAT",
        "SOMNIA_LOG_LEVEL",
        "SOMNIA_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
