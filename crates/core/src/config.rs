use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::act::ActConfig;
use crate::ego::{EgoConfig, TieBreaker};

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["somnia.toml", "config/somnia.toml"];

#[derive(Clone, Debug, PartialEq)]
pub struct SomniaConfig {
    pub runtime: RuntimeSettings,
    pub ego: EgoConfig,
    pub act: ActSettings,
    pub logging: LoggingConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Copied into every cycle context. Zero derives the seed from the clock.
    pub seed: u64,
    pub enable_tracing: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActSettings {
    pub default_timeout_ms: u64,
    pub cancel_on_error: bool,
    pub backoff_base_ms: u64,
}

impl ActSettings {
    pub fn to_act_config(self) -> ActConfig {
        ActConfig {
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            cancel_on_error: self.cancel_on_error,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub seed: Option<u64>,
    pub enable_tracing: Option<bool>,
    pub select_top_n: Option<usize>,
    pub tie_breaker: Option<TieBreaker>,
    pub cancel_on_error: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for SomniaConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSettings { seed: 0, enable_tracing: true },
            ego: EgoConfig::default(),
            act: ActSettings { default_timeout_ms: 5000, cancel_on_error: false, backoff_base_ms: 100 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl SomniaConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn act_config(&self) -> ActConfig {
        self.act.to_act_config()
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(runtime) = patch.runtime {
            if let Some(seed) = runtime.seed {
                self.runtime.seed = seed;
            }
            if let Some(enable_tracing) = runtime.enable_tracing {
                self.runtime.enable_tracing = enable_tracing;
            }
        }

        if let Some(ego) = patch.ego {
            if let Some(select_top_n) = ego.select_top_n {
                self.ego.select_top_n = select_top_n;
            }
            if let Some(tie_breaker) = ego.tie_breaker {
                self.ego.tie_breaker = tie_breaker;
            }
            if let Some(min_weight) = ego.min_weight {
                self.ego.min_weight = min_weight;
            }
        }

        if let Some(act) = patch.act {
            if let Some(default_timeout_ms) = act.default_timeout_ms {
                self.act.default_timeout_ms = default_timeout_ms;
            }
            if let Some(cancel_on_error) = act.cancel_on_error {
                self.act.cancel_on_error = cancel_on_error;
            }
            if let Some(backoff_base_ms) = act.backoff_base_ms {
                self.act.backoff_base_ms = backoff_base_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SOMNIA_RUNTIME_SEED") {
            self.runtime.seed = parse_u64("SOMNIA_RUNTIME_SEED", &value)?;
        }
        if let Some(value) = read_env("SOMNIA_RUNTIME_ENABLE_TRACING") {
            self.runtime.enable_tracing = parse_bool("SOMNIA_RUNTIME_ENABLE_TRACING", &value)?;
        }

        if let Some(value) = read_env("SOMNIA_EGO_SELECT_TOP_N") {
            self.ego.select_top_n = parse_usize("SOMNIA_EGO_SELECT_TOP_N", &value)?;
        }
        if let Some(value) = read_env("SOMNIA_EGO_TIE_BREAKER") {
            self.ego.tie_breaker = TieBreaker::parse(&value).ok_or_else(|| {
                ConfigError::InvalidEnvOverride {
                    key: "SOMNIA_EGO_TIE_BREAKER".to_string(),
                    value: value.clone(),
                }
            })?;
        }
        if let Some(value) = read_env("SOMNIA_EGO_MIN_WEIGHT") {
            self.ego.min_weight = parse_f64("SOMNIA_EGO_MIN_WEIGHT", &value)?;
        }

        if let Some(value) = read_env("SOMNIA_ACT_DEFAULT_TIMEOUT_MS") {
            self.act.default_timeout_ms = parse_u64("SOMNIA_ACT_DEFAULT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("SOMNIA_ACT_CANCEL_ON_ERROR") {
            self.act.cancel_on_error = parse_bool("SOMNIA_ACT_CANCEL_ON_ERROR", &value)?;
        }
        if let Some(value) = read_env("SOMNIA_ACT_BACKOFF_BASE_MS") {
            self.act.backoff_base_ms = parse_u64("SOMNIA_ACT_BACKOFF_BASE_MS", &value)?;
        }

        let log_level = read_env("SOMNIA_LOGGING_LEVEL").or_else(|| read_env("SOMNIA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SOMNIA_LOGGING_FORMAT").or_else(|| read_env("SOMNIA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(seed) = overrides.seed {
            self.runtime.seed = seed;
        }
        if let Some(enable_tracing) = overrides.enable_tracing {
            self.runtime.enable_tracing = enable_tracing;
        }
        if let Some(select_top_n) = overrides.select_top_n {
            self.ego.select_top_n = select_top_n;
        }
        if let Some(tie_breaker) = overrides.tie_breaker {
            self.ego.tie_breaker = tie_breaker;
        }
        if let Some(cancel_on_error) = overrides.cancel_on_error {
            self.act.cancel_on_error = cancel_on_error;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ego(&self.ego)?;
        validate_act(&self.act)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_ego(ego: &EgoConfig) -> Result<(), ConfigError> {
    if !ego.min_weight.is_finite() {
        return Err(ConfigError::Validation("ego.min_weight must be finite".to_string()));
    }
    Ok(())
}

fn validate_act(act: &ActSettings) -> Result<(), ConfigError> {
    if act.default_timeout_ms == 0 || act.default_timeout_ms > 600_000 {
        return Err(ConfigError::Validation(
            "act.default_timeout_ms must be in range 1..=600000".to_string(),
        ));
    }

    if act.backoff_base_ms > 60_000 {
        return Err(ConfigError::Validation(
            "act.backoff_base_ms must be in range 0..=60000".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    runtime: Option<RuntimePatch>,
    ego: Option<EgoPatch>,
    act: Option<ActPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimePatch {
    seed: Option<u64>,
    enable_tracing: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct EgoPatch {
    select_top_n: Option<usize>,
    tie_breaker: Option<TieBreaker>,
    min_weight: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ActPatch {
    default_timeout_ms: Option<u64>,
    cancel_on_error: Option<bool>,
    backoff_base_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
