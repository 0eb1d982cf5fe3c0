//! Cycle orchestration: context → ID → EGO → ACT → trace and metrics.
//!
//! A `Runtime` owns the world state, the EGO budget counters and the single
//! trace slot. Cycles take `&mut self`, so callers that share a runtime across
//! tasks must serialize access themselves (for example behind a `tokio::sync::Mutex`).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::act::{Act, ActionDef, ActionRegistryBuilder, ActionResult, Sleeper, TokioSleeper};
use crate::clock::{Clock, SystemClock};
use crate::config::{RuntimeSettings, SomniaConfig};
use crate::context::{ExecutionContext, Facts, Intent};
use crate::ego::{Ego, SelectionResult};
use crate::errors::{ModuleError, StateError};
use crate::id::{IdEngine, Proposal, Rule, RuleId};
use crate::module::{self, CompiledModule, ModuleSummary};
use crate::trace::{ActPhase, EgoPhase, IdPhase, RuntimeMetrics, Trace};
use crate::value::{Args, Value};

/// Everything one cycle produced. Every selected proposal has exactly one result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CycleResult {
    pub cycle_id: String,
    pub proposals: Vec<Proposal>,
    pub selection: SelectionResult,
    pub results: Vec<ActionResult>,
    pub total_duration_ms: f64,
}

impl CycleResult {
    pub fn result_count(&self) -> usize {
        self.results.len()
    }
}

pub struct RuntimeBuilder {
    config: SomniaConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    actions: ActionRegistryBuilder,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            config: SomniaConfig::default(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            actions: ActionRegistryBuilder::default(),
        }
    }
}

impl RuntimeBuilder {
    pub fn config(mut self, config: SomniaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn register_action(mut self, action: ActionDef) -> Self {
        self.actions.insert(action);
        self
    }

    pub fn register_builtins(mut self) -> Self {
        self.actions = self.actions.with_builtins();
        self
    }

    pub fn build(self) -> Runtime {
        let act = Act::new(self.actions.build(), self.config.act_config()).with_sleeper(self.sleeper);

        Runtime {
            id: IdEngine::new(),
            ego: Ego::new(self.config.ego),
            act,
            clock: self.clock,
            settings: self.config.runtime,
            world: Facts::new(),
            memory: BTreeMap::new(),
            drives: BTreeMap::new(),
            affects: BTreeMap::new(),
            metrics: RuntimeMetrics::default(),
            last_trace: None,
            cycle_counter: 0,
            modules: Vec::new(),
        }
    }
}

pub struct Runtime {
    id: IdEngine,
    ego: Ego,
    act: Act,
    clock: Arc<dyn Clock>,
    settings: RuntimeSettings,
    world: Facts,
    memory: BTreeMap<String, Value>,
    drives: BTreeMap<String, f64>,
    affects: BTreeMap<String, f64>,
    metrics: RuntimeMetrics,
    last_trace: Option<Trace>,
    cycle_counter: u64,
    modules: Vec<ModuleSummary>,
}

#[derive(Debug, Deserialize)]
struct IntentDocument {
    #[serde(alias = "intent")]
    name: String,
    #[serde(default)]
    args: Args,
    #[serde(default)]
    facts: Facts,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateSnapshot {
    #[serde(default)]
    facts: Facts,
    #[serde(default)]
    memory: BTreeMap<String, Value>,
    #[serde(default)]
    metrics: RuntimeMetrics,
}

fn set_level(
    kind: &str,
    levels: &mut BTreeMap<String, f64>,
    name: String,
    value: f64,
) -> Result<(), StateError> {
    if !value.is_finite() {
        return Err(StateError::InvalidLevel(format!("{kind} `{name}` has non-finite value {value}")));
    }
    levels.insert(name, value);
    Ok(())
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Load a module file and install it. On error nothing is changed.
    pub fn load_module(&mut self, path: &Path) -> Result<ModuleSummary, ModuleError> {
        let compiled = module::load_module(path)?;
        self.install_module(compiled)
    }

    /// Install an already compiled module, appending its rules and policies.
    ///
    /// Generated rule ids and lines continue after the rules already installed.
    /// Rejected as a whole when a declared rule id or budgeted action is already installed.
    pub fn install_module(
        &mut self,
        mut module: CompiledModule,
    ) -> Result<ModuleSummary, ModuleError> {
        module.renumber(self.id.len());

        let mut installed_ids: HashSet<&RuleId> =
            self.id.rules().iter().map(|rule| &rule.id).collect();
        if let Some(rule) = module.rules.iter().find(|rule| !installed_ids.insert(&rule.id)) {
            return Err(ModuleError::Validation(format!(
                "rule id `{}` is already installed",
                rule.id.0
            )));
        }
        if let Some(budget) =
            module.budgets.iter().find(|budget| self.ego.budget_for(&budget.action).is_some())
        {
            return Err(ModuleError::Validation(format!(
                "action `{}` already has a budget policy",
                budget.action
            )));
        }

        let summary = module.summary();
        for action in module.rules.iter().map(|rule| rule.action.as_str()) {
            if !self.act.registry().contains(action) {
                warn!(
                    event_name = "module.unregistered_action",
                    module = %summary.name,
                    action,
                    "rule proposes an action with no registered handler"
                );
            }
        }

        self.id.extend(module.rules);
        for policy in module.forbid {
            self.ego.add_forbid_policy(policy);
        }
        for policy in module.budgets {
            self.ego.add_budget_policy(policy);
        }

        let mut ego_config = *self.ego.config();
        if let Some(select_top_n) = module.ego.select_top_n {
            ego_config.select_top_n = select_top_n;
        }
        if let Some(tie_breaker) = module.ego.tie_breaker {
            ego_config.tie_breaker = tie_breaker;
        }
        if let Some(min_weight) = module.ego.min_weight {
            ego_config.min_weight = min_weight;
        }
        self.ego.set_config(ego_config);

        self.drives.extend(module.drives);
        self.affects.extend(module.affects);

        info!(
            event_name = "module.loaded",
            module = %summary.name,
            rules = summary.rules,
            forbid_policies = summary.forbid_policies,
            budget_policies = summary.budget_policies,
            "module installed"
        );
        self.modules.push(summary.clone());
        Ok(summary)
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.id.add_rule(rule);
    }

    pub fn modules(&self) -> &[ModuleSummary] {
        &self.modules
    }

    pub fn id_engine(&self) -> &IdEngine {
        &self.id
    }

    pub fn ego(&self) -> &Ego {
        &self.ego
    }

    pub fn ego_mut(&mut self) -> &mut Ego {
        &mut self.ego
    }

    /// Run one decision cycle. Never fails; failures are carried in the results.
    pub async fn run_cycle(&mut self, intent: Intent, facts: Facts) -> CycleResult {
        let started = Instant::now();
        let now_ms = self.clock.now_ms();
        self.cycle_counter += 1;
        let cycle_id = format!("cycle_{now_ms}_{}", self.cycle_counter);

        let ctx = self.build_context(intent, facts, now_ms);
        self.ego.reset_budget_windows(now_ms);

        let id_started = Instant::now();
        let proposals = self.id.evaluate(&ctx);
        let id_phase = IdPhase {
            rules_evaluated: self.id.len(),
            proposals_count: proposals.len(),
            duration_ms: elapsed_ms(id_started),
        };
        debug!(
            event_name = "cycle.id_phase.completed",
            correlation_id = %cycle_id,
            rules_evaluated = id_phase.rules_evaluated,
            proposals = id_phase.proposals_count,
            "id phase completed"
        );

        let ego_started = Instant::now();
        let selection = self.ego.select(&proposals, &ctx);
        let ego_phase = EgoPhase {
            selected_count: selection.selected.len(),
            rejected_count: selection.rejected.len(),
            duration_ms: elapsed_ms(ego_started),
        };
        debug!(
            event_name = "cycle.ego_phase.completed",
            correlation_id = %cycle_id,
            selected = ego_phase.selected_count,
            rejected = ego_phase.rejected_count,
            "ego phase completed"
        );

        let act_started = Instant::now();
        let results = self.act.execute_all(&selection.selected).await;
        let act_phase =
            ActPhase { actions_executed: results.len(), duration_ms: elapsed_ms(act_started) };
        debug!(
            event_name = "cycle.act_phase.completed",
            correlation_id = %cycle_id,
            actions_executed = act_phase.actions_executed,
            failures = results.iter().filter(|result| !result.is_success()).count(),
            "act phase completed"
        );

        let total_duration_ms = elapsed_ms(started);
        self.metrics.record_cycle(proposals.len(), results.len(), total_duration_ms);

        if self.settings.enable_tracing {
            self.last_trace = Some(Trace {
                cycle_id: cycle_id.clone(),
                timestamp_ms: now_ms,
                intent: ctx.intent.clone(),
                proposals: proposals.clone(),
                selection: selection.clone(),
                results: results.clone(),
                id_phase,
                ego_phase,
                act_phase,
                total_duration_ms,
            });
        }

        info!(
            event_name = "cycle.completed",
            correlation_id = %cycle_id,
            intent = %ctx.intent.name,
            proposals = proposals.len(),
            selected = selection.selected.len(),
            results = results.len(),
            duration_ms = total_duration_ms,
            "cycle completed"
        );

        CycleResult { cycle_id, proposals, selection, results, total_duration_ms }
    }

    /// Run one cycle from a JSON intent document:
    /// `{"name" | "intent": string, "args"?: object, "facts"?: object}`.
    pub async fn run_cycle_json(&mut self, json: &str) -> Result<CycleResult, StateError> {
        let document: IntentDocument = serde_json::from_str(json)
            .map_err(|error| StateError::InvalidIntent(error.to_string()))?;
        if document.name.trim().is_empty() {
            return Err(StateError::InvalidIntent("intent name must not be empty".to_string()));
        }

        let intent = Intent { name: document.name, args: document.args };
        Ok(self.run_cycle(intent, document.facts).await)
    }

    // Caller facts first, then world state: world state wins on shared keys.
    fn build_context(&self, intent: Intent, facts: Facts, now_ms: u64) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(intent);
        ctx.facts = facts;
        for (key, value) in &self.world {
            ctx.insert_fact(key.clone(), value.clone());
        }
        ctx.drives = self.drives.clone();
        ctx.affects = self.affects.clone();
        ctx.seed = if self.settings.seed == 0 { now_ms } else { self.settings.seed };
        ctx.timestamp_ms = now_ms;
        ctx
    }

    pub fn last_trace(&self) -> Option<&Trace> {
        self.last_trace.as_ref()
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub fn update_fact(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.world.insert(key.into(), value.into());
    }

    pub fn get_fact(&self, key: &str) -> Option<&Value> {
        self.world.get(key)
    }

    pub fn remove_fact(&mut self, key: &str) -> Option<Value> {
        self.world.remove(key)
    }

    pub fn facts(&self) -> &Facts {
        &self.world
    }

    /// Memory is persisted with the state snapshot but never visible to conditions.
    pub fn set_memory(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.memory.insert(key.into(), value.into());
    }

    pub fn get_memory(&self, key: &str) -> Option<&Value> {
        self.memory.get(key)
    }

    /// Set a drive intensity. Non-finite values are rejected and leave the drive unchanged.
    pub fn set_drive(&mut self, name: impl Into<String>, intensity: f64) -> Result<(), StateError> {
        set_level("drive", &mut self.drives, name.into(), intensity)
    }

    /// Set an affect valence. Non-finite values are rejected like drives.
    pub fn set_affect(&mut self, name: impl Into<String>, valence: f64) -> Result<(), StateError> {
        set_level("affect", &mut self.affects, name.into(), valence)
    }

    pub fn drives(&self) -> &BTreeMap<String, f64> {
        &self.drives
    }

    pub fn affects(&self) -> &BTreeMap<String, f64> {
        &self.affects
    }

    /// Serialize world facts, memory and metrics as JSON.
    pub fn snapshot_state(&self) -> Result<String, StateError> {
        let snapshot = StateSnapshot {
            facts: self.world.clone(),
            memory: self.memory.clone(),
            metrics: self.metrics.clone(),
        };
        serde_json::to_string(&snapshot).map_err(|error| StateError::Serialize(error.to_string()))
    }

    /// Replace facts, memory and metrics from a snapshot. Malformed input changes nothing.
    pub fn restore_state(&mut self, text: &str) -> Result<(), StateError> {
        let snapshot: StateSnapshot =
            serde_json::from_str(text).map_err(|error| StateError::Restore(error.to_string()))?;

        self.world = snapshot.facts;
        self.memory = snapshot.memory;
        self.metrics = snapshot.metrics;

        info!(
            event_name = "state.restored",
            facts = self.world.len(),
            memory = self.memory.len(),
            total_cycles = self.metrics.total_cycles,
            "runtime state restored"
        );
        Ok(())
    }
}
