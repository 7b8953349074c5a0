//! Workflow engine: execution planning, condition gating, data mapping and
//! the batch-wise driver.
//!
//! The engine holds no per-run state; each run is described by an
//! `ExecutionContext` owned by the caller.

pub mod condition;
pub mod context;
pub mod executor;
pub mod mapping;
pub mod plan;

pub use condition::{ConditionOutcome, evaluate_conditional_execution};
pub use context::ExecutionContext;
pub use executor::{AggregatedResults, ExecutionResult, PluginExecutor, UnresolvedDependency, WorkflowEngine};
pub use mapping::{InputMapping, MissingDependency, apply_input_mapping};
pub use plan::{ExecutionBatch, ExecutionPlan, create_execution_plan};
