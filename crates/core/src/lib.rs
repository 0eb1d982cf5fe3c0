//! Somnia agent decision cycle.
//!
//! Each cycle evaluates ID rules into weighted proposals, filters and ranks them
//! through EGO policies, and executes the survivors with ACT.

pub mod act;
pub mod clock;
pub mod condition;
pub mod config;
pub mod context;
pub mod ego;
pub mod errors;
pub mod id;
pub mod module;
pub mod runtime;
pub mod trace;
pub mod value;

pub use act::{
    handler_fn, Act, ActConfig, ActionDef, ActionHandler, ActionOutcome, ActionRegistry,
    ActionRegistryBuilder, ActionResult, RecordingSleeper, Sleeper, TokioSleeper,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::Condition;
pub use config::{ConfigError, ConfigOverrides, LoadOptions, LogFormat, SomniaConfig};
pub use context::{ExecutionContext, Facts, Intent};
pub use ego::{
    BudgetPolicy, Ego, EgoConfig, ForbidPolicy, PolicyId, RejectedProposal, RejectionReason,
    SelectedProposal, SelectionResult, TieBreaker,
};
pub use errors::{HandlerError, ModuleError, StateError};
pub use id::{IdEngine, Proposal, Rule, RuleId};
pub use module::{
    load_module, load_module_with, CompiledModule, ModuleDefinition, ModuleParser, ModuleSummary,
};
pub use runtime::{CycleResult, Runtime, RuntimeBuilder};
pub use trace::{RuntimeMetrics, Trace};
pub use value::{Args, Value};
