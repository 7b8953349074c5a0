//! Per-run execution context.
//!
//! `ExecutionContext` is the mutable state that flows through one workflow run.
//! It holds every recorded `StageResult` keyed by stage id and serializes to
//! JSON so a run can be checkpointed and resumed later.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use probekit_types::checkpoint::Checkpoint;
use probekit_types::finding::{Finding, Severity};
use probekit_types::workflow::StageResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::orchestrator::definition::WorkflowError;

/// Mutable state of a single workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Recorded stage results keyed by stage id.
    #[serde(default)]
    pub stage_data: HashMap<String, StageResult>,
}

impl ExecutionContext {
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            workflow_id,
            started_at: Utc::now(),
            stage_data: HashMap::new(),
        }
    }

    /// Record (or replace) the result for a stage.
    pub fn record(&mut self, result: StageResult) {
        self.stage_data.insert(result.stage_id.clone(), result);
    }

    pub fn stage_result(&self, stage_id: &str) -> Option<&StageResult> {
        self.stage_data.get(stage_id)
    }

    pub fn is_stage_completed(&self, stage_id: &str) -> bool {
        self.stage_data
            .get(stage_id)
            .is_some_and(StageResult::is_completed)
    }

    /// Findings of every completed stage.
    pub fn completed_findings(&self) -> impl Iterator<Item = &Finding> {
        self.stage_data
            .values()
            .filter(|r| r.is_completed())
            .flat_map(|r| r.findings.iter())
    }

    pub fn total_findings(&self) -> u64 {
        self.completed_findings().count() as u64
    }

    /// Completed-stage findings with severity at or above `level`.
    pub fn findings_at_or_above(&self, level: Severity) -> u64 {
        self.completed_findings()
            .filter(|f| f.severity >= level)
            .count() as u64
    }

    /// Completed-stage findings with severity exactly `level`.
    pub fn findings_at(&self, level: Severity) -> u64 {
        self.completed_findings()
            .filter(|f| f.severity == level)
            .count() as u64
    }

    /// Sum of recorded per-stage execution times.
    pub fn total_execution_time_ms(&self) -> u64 {
        self.stage_data.values().map(|r| r.execution_time_ms).sum()
    }

    /// Per-stage execution times, ordered by stage id.
    pub fn stage_timings(&self) -> BTreeMap<String, u64> {
        self.stage_data
            .iter()
            .map(|(id, r)| (id.clone(), r.execution_time_ms))
            .collect()
    }

    pub fn to_json(&self) -> Result<Value, WorkflowError> {
        serde_json::to_value(self).map_err(|e| WorkflowError::ParseError(e.to_string()))
    }

    pub fn from_json(value: Value) -> Result<Self, WorkflowError> {
        serde_json::from_value(value).map_err(|e| WorkflowError::ParseError(e.to_string()))
    }

    /// Snapshot this context as a checkpoint on `thread_id`.
    pub fn to_checkpoint(&self, thread_id: &str) -> Result<Checkpoint, WorkflowError> {
        Ok(Checkpoint::new(
            self.workflow_id.to_string(),
            thread_id,
            self.to_json()?,
        ))
    }

    /// Rebuild a context from a checkpoint written by [`Self::to_checkpoint`].
    ///
    /// The run id is preserved so history entries of a resumed run line up
    /// with the original attempt.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, WorkflowError> {
        Self::from_json(checkpoint.state.clone())
    }
}
