use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::HandlerError;
use crate::value::{Args, Value};

/// A named operation ACT can invoke for a selected proposal.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, args: &Args) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(&Args) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn call(&self, args: &Args) -> Result<Value, HandlerError> {
        (self.0)(args)
    }
}

/// Adapt a synchronous closure into an [`ActionHandler`].
pub fn handler_fn<F>(handler: F) -> Arc<dyn ActionHandler>
where
    F: Fn(&Args) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(handler))
}

#[derive(Clone)]
pub struct ActionDef {
    pub name: String,
    pub handler: Arc<dyn ActionHandler>,
    /// `None` falls back to the executor's default timeout.
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub retryable: bool,
}

impl ActionDef {
    /// Single attempt, default timeout.
    pub fn new(name: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        Self { name: name.into(), handler, timeout: None, max_retries: 0, retryable: false }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Allow up to `max_retries` further attempts after a non-fatal failure.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retryable = true;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retryable", &self.retryable)
            .finish_non_exhaustive()
    }
}

/// Immutable name → action mapping, shared read-only once built.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionDef>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&ActionDef> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<String, ActionDef>,
}

impl ActionRegistryBuilder {
    /// Registering a name twice keeps the later definition.
    pub fn register(mut self, action: ActionDef) -> Self {
        self.insert(action);
        self
    }

    pub fn insert(&mut self, action: ActionDef) {
        self.actions.insert(action.name.clone(), action);
    }

    pub fn with_builtins(mut self) -> Self {
        for action in super::builtins::builtin_actions() {
            self.insert(action);
        }
        self
    }

    pub fn build(self) -> Arc<ActionRegistry> {
        Arc::new(ActionRegistry { actions: self.actions })
    }
}
