//! Module definitions: the parsed form of an agent's ID and EGO blocks.
//!
//! Modules are read from TOML or JSON documents. Other front ends can supply a
//! [`ModuleParser`] and go through [`load_module_with`]. Loading is all-or-nothing:
//! any parse or validation failure returns an error and yields nothing to install.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::ego::{BudgetPolicy, ForbidPolicy, TieBreaker};
use crate::errors::ModuleError;
use crate::id::{Rule, RuleId};
use crate::value::Args;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub id: IdBlock,
    #[serde(default)]
    pub ego: EgoBlock,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdBlock {
    #[serde(default)]
    pub drives: BTreeMap<String, f64>,
    #[serde(default)]
    pub affects: BTreeMap<String, f64>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// `when <condition> => propose <action>(<args>) @<weight>`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    #[serde(default)]
    pub id: Option<String>,
    /// Source line used by rule-order tie-breaks; defaults to the rule's position.
    #[serde(default)]
    pub line: Option<u32>,
    pub when: Condition,
    pub propose: String,
    #[serde(default)]
    pub args: Args,
    pub weight: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EgoBlock {
    #[serde(default)]
    pub forbid: Vec<ForbidDefinition>,
    #[serde(default)]
    pub budget: Vec<BudgetDefinition>,
    #[serde(default)]
    pub select_top_n: Option<usize>,
    #[serde(default)]
    pub on_tie: Option<TieBreaker>,
    #[serde(default)]
    pub min_weight: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForbidDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub when: Condition,
    /// Omitted matches every action.
    #[serde(default)]
    pub action: Option<String>,
}

/// `budget "<action>" max <n> per <unit>`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetDefinition {
    pub action: String,
    pub max: u32,
    #[serde(default)]
    pub per: Option<BudgetUnit>,
    /// Overrides `per` when set.
    #[serde(default)]
    pub window_seconds: Option<u64>,
}

impl BudgetDefinition {
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds.unwrap_or_else(|| self.per.unwrap_or_default().seconds())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetUnit {
    Second,
    #[default]
    Minute,
    Hour,
}

impl BudgetUnit {
    pub fn seconds(self) -> u64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3600,
        }
    }
}

/// EGO settings a module chose to set; `None` keeps the runtime's current value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EgoOverrides {
    pub select_top_n: Option<usize>,
    pub tie_breaker: Option<TieBreaker>,
    pub min_weight: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub name: String,
    pub version: Option<String>,
    pub rules: usize,
    pub forbid_policies: usize,
    pub budget_policies: usize,
    pub drives: usize,
    pub affects: usize,
}

/// A validated module, ready to be installed into a runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledModule {
    pub name: String,
    pub version: Option<String>,
    pub drives: BTreeMap<String, f64>,
    pub affects: BTreeMap<String, f64>,
    pub rules: Vec<Rule>,
    pub forbid: Vec<ForbidPolicy>,
    pub budgets: Vec<BudgetPolicy>,
    pub ego: EgoOverrides,
    generated: Vec<GeneratedFields>,
}

/// Which parts of a rule were numbered from its position instead of being declared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct GeneratedFields {
    id: bool,
    line: bool,
}

impl CompiledModule {
    /// Shift generated rule ids and lines past `installed` rules already held by a runtime.
    ///
    /// Declared ids and lines are kept as written.
    pub fn renumber(&mut self, installed: usize) {
        if installed == 0 {
            return;
        }
        for (index, (rule, generated)) in self.rules.iter_mut().zip(&self.generated).enumerate() {
            let position = installed + index + 1;
            if generated.id {
                rule.id = RuleId(format!("rule_{position}"));
            }
            if generated.line {
                rule.line = u32::try_from(position).unwrap_or(u32::MAX);
            }
        }
    }

    pub fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            name: self.name.clone(),
            version: self.version.clone(),
            rules: self.rules.len(),
            forbid_policies: self.forbid.len(),
            budget_policies: self.budgets.len(),
            drives: self.drives.len(),
            affects: self.affects.len(),
        }
    }
}

impl ModuleDefinition {
    /// Validate and lower into runtime types.
    pub fn compile(self) -> Result<CompiledModule, ModuleError> {
        if self.name.trim().is_empty() {
            return Err(ModuleError::Validation("module name must not be empty".to_owned()));
        }
        validate_levels("drive", &self.id.drives)?;
        validate_levels("affect", &self.id.affects)?;

        let mut seen_ids = HashSet::new();
        let mut rules = Vec::with_capacity(self.id.rules.len());
        let mut generated = Vec::with_capacity(self.id.rules.len());
        for (index, rule) in self.id.rules.into_iter().enumerate() {
            let position = index + 1;
            let fields = GeneratedFields { id: rule.id.is_none(), line: rule.line.is_none() };
            let id = rule.id.unwrap_or_else(|| format!("rule_{position}"));

            if !seen_ids.insert(id.clone()) {
                return Err(ModuleError::Validation(format!("duplicate rule id `{id}`")));
            }
            if rule.propose.trim().is_empty() {
                return Err(ModuleError::Validation(format!(
                    "rule `{id}` must propose a non-empty action"
                )));
            }
            if !(0.0..=1.0).contains(&rule.weight) {
                return Err(ModuleError::Validation(format!(
                    "rule `{id}` weight {} must be within [0, 1]",
                    rule.weight
                )));
            }

            let line = rule.line.unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX));
            let mut compiled = Rule::new(id, line, rule.when, rule.propose, rule.weight);
            compiled.args = rule.args;
            rules.push(compiled);
            generated.push(fields);
        }

        let mut forbid = Vec::with_capacity(self.ego.forbid.len());
        for (index, policy) in self.ego.forbid.into_iter().enumerate() {
            let id = policy.id.unwrap_or_else(|| format!("forbid_{}", index + 1));
            if policy.action.as_deref().is_some_and(|action| action.trim().is_empty()) {
                return Err(ModuleError::Validation(format!(
                    "forbid policy `{id}` has an empty action pattern"
                )));
            }
            forbid.push(ForbidPolicy::new(id, policy.when, policy.action));
        }

        let mut budgeted = HashSet::new();
        let mut budgets = Vec::with_capacity(self.ego.budget.len());
        for budget in self.ego.budget {
            if budget.action.trim().is_empty() {
                return Err(ModuleError::Validation(
                    "budget policy must name a non-empty action".to_owned(),
                ));
            }
            if !budgeted.insert(budget.action.clone()) {
                return Err(ModuleError::Validation(format!(
                    "duplicate budget policy for action `{}`",
                    budget.action
                )));
            }
            if budget.max == 0 {
                return Err(ModuleError::Validation(format!(
                    "budget for `{}` must allow at least one execution",
                    budget.action
                )));
            }
            let window_seconds = budget.window_seconds();
            if window_seconds == 0 {
                return Err(ModuleError::Validation(format!(
                    "budget window for `{}` must be positive",
                    budget.action
                )));
            }
            budgets.push(BudgetPolicy::new(budget.action, budget.max, window_seconds));
        }

        if let Some(min_weight) = self.ego.min_weight {
            if !min_weight.is_finite() {
                return Err(ModuleError::Validation("min_weight must be finite".to_owned()));
            }
        }

        Ok(CompiledModule {
            name: self.name,
            version: self.version,
            drives: self.id.drives,
            affects: self.id.affects,
            rules,
            forbid,
            budgets,
            ego: EgoOverrides {
                select_top_n: self.ego.select_top_n,
                tie_breaker: self.ego.on_tie,
                min_weight: self.ego.min_weight,
            },
            generated,
        })
    }
}

fn validate_levels(kind: &str, levels: &BTreeMap<String, f64>) -> Result<(), ModuleError> {
    match levels.iter().find(|(_, value)| !value.is_finite()) {
        Some((name, value)) => {
            Err(ModuleError::Validation(format!("{kind} `{name}` has non-finite value {value}")))
        }
        None => Ok(()),
    }
}

/// Turns module source text into a [`ModuleDefinition`].
pub trait ModuleParser {
    fn format(&self) -> &'static str;
    fn parse(&self, source: &str) -> Result<ModuleDefinition, ModuleError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TomlModuleParser;

impl ModuleParser for TomlModuleParser {
    fn format(&self) -> &'static str {
        "toml"
    }

    fn parse(&self, source: &str) -> Result<ModuleDefinition, ModuleError> {
        toml::from_str(source).map_err(|error| ModuleError::Parse {
            format: self.format().to_owned(),
            message: error.to_string(),
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonModuleParser;

impl ModuleParser for JsonModuleParser {
    fn format(&self) -> &'static str {
        "json"
    }

    fn parse(&self, source: &str) -> Result<ModuleDefinition, ModuleError> {
        serde_json::from_str(source).map_err(|error| ModuleError::Parse {
            format: self.format().to_owned(),
            message: error.to_string(),
        })
    }
}

/// Read, parse and validate a module, picking the parser from the file extension.
pub fn load_module(path: &Path) -> Result<CompiledModule, ModuleError> {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("toml") => load_module_with(path, &TomlModuleParser),
        Some("json") => load_module_with(path, &JsonModuleParser),
        _ => Err(ModuleError::UnsupportedFormat { path: path.display().to_string() }),
    }
}

pub fn load_module_with(
    path: &Path,
    parser: &dyn ModuleParser,
) -> Result<CompiledModule, ModuleError> {
    let source = std::fs::read_to_string(path).map_err(|error| ModuleError::Read {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    parser.parse(&source)?.compile()
}
