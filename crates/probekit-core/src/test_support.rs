//! Builders and fakes shared by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use probekit_types::finding::{Finding, Severity};
use probekit_types::plugin::PluginInfo;
use probekit_types::workflow::{
    Dependency, Stage, StageResult, StageStatus, WorkflowDefinition, WorkflowDraft,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::PluginExecutor;
use crate::orchestrator::OrchestratorError;
use crate::plugin::{Plugin, PluginContext, PluginError};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub(crate) fn stage(id: &str, plugin_id: &str, order: u32) -> Stage {
    Stage {
        id: id.to_string(),
        plugin_id: plugin_id.to_string(),
        order,
        parallel: false,
        condition: None,
        input_mapping: None,
    }
}

pub(crate) fn dep(from: &str, to: &str, data_flow: &[&str], required: bool) -> Dependency {
    Dependency {
        from_stage: from.to_string(),
        to_stage: to.to_string(),
        data_flow: data_flow.iter().map(|s| s.to_string()).collect(),
        required,
    }
}

pub(crate) fn draft(stages: Vec<Stage>, dependencies: Vec<Dependency>) -> WorkflowDraft {
    WorkflowDraft {
        name: "diagnostics".to_string(),
        description: String::new(),
        stages,
        dependencies,
    }
}

pub(crate) fn workflow(stages: Vec<Stage>, dependencies: Vec<Dependency>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: Uuid::now_v7(),
        name: "diagnostics".to_string(),
        description: String::new(),
        stages,
        dependencies,
        created_at: Utc::now(),
    }
}

pub(crate) fn finding(severity: Severity) -> Finding {
    Finding::new(Uuid::now_v7().to_string(), "protocol", severity, "test finding")
}

fn result(stage_id: &str, status: StageStatus) -> StageResult {
    let now = Utc::now();
    StageResult {
        stage_id: stage_id.to_string(),
        plugin_id: format!("{stage_id}-plugin"),
        findings: vec![],
        execution_time_ms: 1,
        start_time: now,
        end_time: now,
        status,
        error: None,
        input: None,
    }
}

pub(crate) fn completed(stage_id: &str, findings: Vec<Finding>) -> StageResult {
    StageResult {
        findings,
        ..result(stage_id, StageStatus::Completed)
    }
}

pub(crate) fn failed(stage_id: &str, error: &str) -> StageResult {
    StageResult {
        error: Some(error.to_string()),
        ..result(stage_id, StageStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) enum Behaviour {
    Findings(Vec<Finding>),
    Fail(String),
    Delay(Duration),
    /// Fail the first `n` runs, then succeed with no findings.
    FailTimes(usize),
}

async fn act(behaviour: &Behaviour) -> Result<Vec<Finding>, String> {
    match behaviour {
        Behaviour::Findings(findings) => Ok(findings.clone()),
        Behaviour::Fail(message) => Err(message.clone()),
        Behaviour::Delay(delay) => {
            tokio::time::sleep(*delay).await;
            Ok(vec![])
        }
        Behaviour::FailTimes(_) => Ok(vec![]),
    }
}

/// Scripted `PluginExecutor` that records calls and peak concurrency.
#[derive(Default)]
pub(crate) struct FakeExecutor {
    behaviours: HashMap<String, Behaviour>,
    calls: Mutex<Vec<String>>,
    inputs: Mutex<HashMap<String, Map<String, Value>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_findings(mut self, plugin_id: &str, findings: Vec<Finding>) -> Self {
        self.behaviours
            .insert(plugin_id.to_string(), Behaviour::Findings(findings));
        self
    }

    pub(crate) fn with_failure(mut self, plugin_id: &str, message: &str) -> Self {
        self.behaviours
            .insert(plugin_id.to_string(), Behaviour::Fail(message.to_string()));
        self
    }

    pub(crate) fn with_delay(mut self, plugin_id: &str, delay: Duration) -> Self {
        self.behaviours
            .insert(plugin_id.to_string(), Behaviour::Delay(delay));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn input_for(&self, plugin_id: &str) -> Option<Map<String, Value>> {
        self.inputs.lock().unwrap().get(plugin_id).cloned()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl PluginExecutor for FakeExecutor {
    async fn execute_plugin(
        &self,
        plugin_id: &str,
        ctx: &PluginContext,
    ) -> Result<Vec<Finding>, OrchestratorError> {
        let Some(behaviour) = self.behaviours.get(plugin_id) else {
            return Err(OrchestratorError::PluginNotFound(plugin_id.to_string()));
        };
        self.calls.lock().unwrap().push(plugin_id.to_string());
        self.inputs
            .lock()
            .unwrap()
            .insert(plugin_id.to_string(), ctx.inputs.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let outcome = act(behaviour).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        outcome.map_err(|message| OrchestratorError::PluginExecution {
            plugin_id: plugin_id.to_string(),
            message,
        })
    }
}

/// Scripted `Plugin` for registry-backed tests.
pub(crate) struct ScriptedPlugin {
    info: PluginInfo,
    behaviour: Behaviour,
    runs: AtomicUsize,
}

impl ScriptedPlugin {
    pub(crate) fn new(id: &str, behaviour: Behaviour) -> Self {
        Self {
            info: PluginInfo::new(id, id, "test"),
            behaviour,
            runs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Plugin for ScriptedPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn run(&self, _ctx: &PluginContext) -> Result<Vec<Finding>, PluginError> {
        let previous = self.runs.fetch_add(1, Ordering::SeqCst);
        if let Behaviour::FailTimes(n) = self.behaviour {
            if previous < n {
                return Err(PluginError::Unavailable(format!("attempt {}", previous + 1)));
            }
        }
        act(&self.behaviour).await.map_err(PluginError::Failed)
    }
}
