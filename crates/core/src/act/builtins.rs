//! Actions every runtime can register without host code: `log`, `sleep`, `respond`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use super::registry::{ActionDef, ActionHandler};
use crate::errors::HandlerError;
use crate::value::{Args, Value};

pub const DEFAULT_SLEEP_MS: i64 = 1000;
pub const DEFAULT_RESPOND_STATUS: i64 = 200;

pub fn builtin_actions() -> Vec<ActionDef> {
    vec![
        ActionDef::new("log", Arc::new(LogAction)),
        ActionDef::new("sleep", Arc::new(SleepAction)),
        ActionDef::new("respond", Arc::new(RespondAction)),
    ]
}

/// Emits `message` at `level` (default `INFO`).
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAction;

#[async_trait]
impl ActionHandler for LogAction {
    async fn call(&self, args: &Args) -> Result<Value, HandlerError> {
        let level = args.get("level").and_then(Value::as_str).unwrap_or("INFO");
        let message = args.get("message").map(Value::to_string).unwrap_or_default();

        match level.trim().to_ascii_lowercase().as_str() {
            "trace" => trace!(event_name = "action.log", "{message}"),
            "debug" => debug!(event_name = "action.log", "{message}"),
            "warn" | "warning" => warn!(event_name = "action.log", "{message}"),
            "error" => error!(event_name = "action.log", "{message}"),
            _ => info!(event_name = "action.log", "{message}"),
        }

        Ok(Value::Bool(true))
    }
}

/// Waits `ms` milliseconds (default 1000) and returns the requested duration.
#[derive(Clone, Copy, Debug, Default)]
pub struct SleepAction;

#[async_trait]
impl ActionHandler for SleepAction {
    async fn call(&self, args: &Args) -> Result<Value, HandlerError> {
        let ms = match args.get("ms") {
            None | Some(Value::Null) => DEFAULT_SLEEP_MS,
            Some(value) => value.as_i64().filter(|ms| *ms >= 0).ok_or_else(|| {
                HandlerError::fatal(format!("sleep: `ms` must be a non-negative integer, got {value}"))
            })?,
        };

        tokio::time::sleep(Duration::from_millis(ms.unsigned_abs())).await;
        Ok(Value::Int(ms))
    }
}

/// Records a response for the caller and returns its status (default 200).
#[derive(Clone, Copy, Debug, Default)]
pub struct RespondAction;

#[async_trait]
impl ActionHandler for RespondAction {
    async fn call(&self, args: &Args) -> Result<Value, HandlerError> {
        let status = args.get("status").and_then(Value::as_i64).unwrap_or(DEFAULT_RESPOND_STATUS);
        let body = args.get("body").cloned().unwrap_or_default();

        info!(event_name = "action.respond", status, body = %body, "response emitted");
        Ok(Value::Int(status))
    }
}
