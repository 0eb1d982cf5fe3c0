use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{Args, Value};

/// Fact mapping: unique keys, last write wins.
pub type Facts = BTreeMap<String, Value>;

/// A named request supplied by the caller for one cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub args: Args,
}

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), args: Args::new() }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Per-cycle snapshot every condition is evaluated against.
///
/// Built fresh by the runtime for each cycle and dropped when the cycle ends.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionContext {
    pub intent: Intent,
    pub facts: Facts,
    pub drives: BTreeMap<String, f64>,
    pub affects: BTreeMap<String, f64>,
    pub seed: u64,
    pub timestamp_ms: u64,
}

impl ExecutionContext {
    pub fn new(intent: Intent) -> Self {
        Self { intent, ..Self::default() }
    }

    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_fact(key, value);
        self
    }

    pub fn with_drive(mut self, name: impl Into<String>, intensity: f64) -> Self {
        self.drives.insert(name.into(), intensity);
        self
    }

    pub fn with_affect(mut self, name: impl Into<String>, valence: f64) -> Self {
        self.affects.insert(name.into(), valence);
        self
    }

    pub fn insert_fact(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.facts.insert(key.into(), value.into());
    }

    /// Absent keys read as `Null`.
    pub fn fact(&self, key: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.facts.get(key).unwrap_or(&NULL)
    }

    /// Absent drives read as zero intensity.
    pub fn drive(&self, name: &str) -> f64 {
        self.drives.get(name).copied().unwrap_or(0.0)
    }

    /// Absent affects read as zero valence.
    pub fn affect(&self, name: &str) -> f64 {
        self.affects.get(name).copied().unwrap_or(0.0)
    }
}
