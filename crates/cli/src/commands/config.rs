use std::env;
use std::fs;
use std::path::Path;

use somnia_core::config::{resolve_config_path, LoadOptions, SomniaConfig};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match SomniaConfig::load(LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            )
        }
    };

    let config_file_path = resolve_config_path(config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: [(&str, String, &[&str]); 10] = [
        ("runtime.seed", config.runtime.seed.to_string(), &["SOMNIA_RUNTIME_SEED"]),
        (
            "runtime.enable_tracing",
            config.runtime.enable_tracing.to_string(),
            &["SOMNIA_RUNTIME_ENABLE_TRACING"],
        ),
        ("ego.select_top_n", config.ego.select_top_n.to_string(), &["SOMNIA_EGO_SELECT_TOP_N"]),
        (
            "ego.tie_breaker",
            config.ego.tie_breaker.as_str().to_string(),
            &["SOMNIA_EGO_TIE_BREAKER"],
        ),
        ("ego.min_weight", config.ego.min_weight.to_string(), &["SOMNIA_EGO_MIN_WEIGHT"]),
        (
            "act.default_timeout_ms",
            config.act.default_timeout_ms.to_string(),
            &["SOMNIA_ACT_DEFAULT_TIMEOUT_MS"],
        ),
        (
            "act.cancel_on_error",
            config.act.cancel_on_error.to_string(),
            &["SOMNIA_ACT_CANCEL_ON_ERROR"],
        ),
        (
            "act.backoff_base_ms",
            config.act.backoff_base_ms.to_string(),
            &["SOMNIA_ACT_BACKOFF_BASE_MS"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["SOMNIA_LOGGING_LEVEL", "SOMNIA_LOG_LEVEL"],
        ),
        (
            "logging.format",
            config.logging.format.as_str().to_string(),
            &["SOMNIA_LOGGING_FORMAT", "SOMNIA_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_keys) in fields {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
