//! Workflow domain types for Probekit.
//!
//! A workflow is a named DAG of stages (one plugin invocation each) plus the
//! data-flow dependencies between them. Callers submit a `WorkflowDraft`
//! (JSON or YAML shaped, camelCase keys); the orchestrator validates it and
//! assigns an id, producing an immutable `WorkflowDefinition`. This module
//! also holds the per-stage execution record (`StageResult`) and the
//! execution-history entry (`ExecutionRecord`).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::finding::{Finding, Severity};

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// Caller-supplied workflow shape, before validation and id assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// A validated workflow. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned by the orchestrator.
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Look up a stage by id.
    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// Dependencies whose downstream end is `stage_id`.
    pub fn dependencies_into<'a>(&'a self, stage_id: &'a str) -> impl Iterator<Item = &'a Dependency> + 'a {
        self.dependencies.iter().filter(move |d| d.to_stage == stage_id)
    }
}

/// One plugin invocation within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// Unique within the workflow.
    pub id: String,
    /// Must resolve in the plugin registry.
    pub plugin_id: String,
    /// Batch key: stages sharing an order run together.
    pub order: u32,
    /// Intent flag only; batching by `order` decides actual concurrency.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StageCondition>,
    /// Upstream data key -> input field name for this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mapping: Option<HashMap<String, String>>,
}

/// Data-flow edge between two stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub from_stage: String,
    pub to_stage: String,
    /// Keys of the upstream `StageResult` that flow downstream.
    #[serde(default)]
    pub data_flow: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Run condition attached to a stage.
///
/// Internally tagged by `type`:
/// ```json
/// { "type": "finding_count", "operator": "gt", "value": 10 }
/// { "type": "severity", "severity": "major", "operator": "gte", "value": 1 }
/// { "type": "severity", "severity": "minor", "match": "exact", "operator": "eq", "value": 0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageCondition {
    /// Compare the total number of findings accumulated so far.
    FindingCount {
        operator: ComparisonOperator,
        value: u64,
    },
    /// Compare the number of findings matching `severity`. By default a
    /// finding matches when it is at or above the level.
    Severity {
        severity: Severity,
        #[serde(default, rename = "match")]
        matching: SeverityMatch,
        operator: ComparisonOperator,
        value: u64,
    },
}

/// How a `severity` condition selects findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityMatch {
    /// The named level or anything more severe.
    #[default]
    AtLeast,
    /// Only the named level.
    Exact,
}

/// Comparison applied as `observed <op> value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl ComparisonOperator {
    pub fn compare(self, observed: u64, expected: u64) -> bool {
        match self {
            ComparisonOperator::Gt => observed > expected,
            ComparisonOperator::Gte => observed >= expected,
            ComparisonOperator::Lt => observed < expected,
            ComparisonOperator::Lte => observed <= expected,
            ComparisonOperator::Eq => observed == expected,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Gte => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Lte => "<=",
            ComparisonOperator::Eq => "==",
        }
    }
}

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

/// Non-throwing validation outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Status of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

/// Outcome of one stage. Downstream stages only ever see the final value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_id: String,
    pub plugin_id: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Mapped upstream data the stage was invoked with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

impl StageResult {
    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Execution-history entry kept per workflow by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Stage id -> execution time in milliseconds.
    pub stage_timings: BTreeMap<String, u64>,
    #[serde(rename = "totalExecutionTime")]
    pub total_execution_time_ms: u64,
    #[serde(default)]
    pub skipped_stages: Vec<String>,
    #[serde(default)]
    pub failed_stages: Vec<String>,
}
