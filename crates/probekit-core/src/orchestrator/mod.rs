//! Plugin orchestrator.
//!
//! The single entry point for running diagnostics: executes plugins singly or
//! in parallel, owns the in-memory workflow store, and drives workflow runs
//! through the engine while recording execution history.
//!
//! Runs of the same workflow never overlap: each workflow has a one-permit
//! semaphore and a second concurrent run is rejected with `WorkflowBusy`.
//! Distinct workflows may run concurrently.

pub mod definition;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use probekit_types::config::EngineConfig;
use probekit_types::finding::Finding;
use probekit_types::plugin::PluginInfo;
use probekit_types::workflow::{ExecutionRecord, WorkflowDefinition, WorkflowDraft, WorkflowValidation};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::engine::{AggregatedResults, ExecutionContext, ExecutionResult, PluginExecutor, WorkflowEngine};
use crate::plugin::{PluginContext, PluginRegistry};

pub use definition::WorkflowError;

// ---------------------------------------------------------------------------
// ParallelExecution
// ---------------------------------------------------------------------------

/// Outcome of running several plugins concurrently.
#[derive(Debug, Default)]
pub struct ParallelExecution {
    /// Findings of every plugin that succeeded.
    pub results: HashMap<String, Vec<Finding>>,
    /// Errors of every plugin that failed or was not found.
    pub errors: HashMap<String, OrchestratorError>,
    pub execution_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    engine: WorkflowEngine,
    workflows: DashMap<Uuid, WorkflowDefinition>,
    /// Append-only run history per workflow.
    history: DashMap<Uuid, Vec<ExecutionRecord>>,
    /// One-permit semaphores guarding each workflow against overlapping runs.
    run_permits: DashMap<Uuid, Arc<Semaphore>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<PluginRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            engine: WorkflowEngine::new(config),
            workflows: DashMap::new(),
            history: DashMap::new(),
            run_permits: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Registered plugin metadata, in registry order.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.registry.list().into_iter().cloned().collect()
    }

    // -- Plugin execution ---------------------------------------------------

    /// Run one plugin by id.
    pub async fn execute_plugin(
        &self,
        plugin_id: &str,
        ctx: &PluginContext,
    ) -> Result<Vec<Finding>, OrchestratorError> {
        let entry = self
            .registry
            .get(plugin_id)
            .ok_or_else(|| OrchestratorError::PluginNotFound(plugin_id.to_string()))?;

        let started = Instant::now();
        let outcome = entry.plugin.run_boxed(ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(findings) => {
                tracing::debug!(plugin_id, findings = findings.len(), elapsed_ms, "plugin completed");
                Ok(findings)
            }
            Err(e) => {
                tracing::warn!(plugin_id, elapsed_ms, error = %e, "plugin failed");
                Err(OrchestratorError::PluginExecution {
                    plugin_id: plugin_id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Run several plugins concurrently. One plugin failing never affects the
    /// others; its error is reported under its id.
    pub async fn execute_parallel<S: AsRef<str>>(
        &self,
        plugin_ids: &[S],
        ctx: &PluginContext,
    ) -> ParallelExecution {
        let started = Instant::now();
        let outcomes = join_all(plugin_ids.iter().map(|id| async move {
            let id = id.as_ref();
            (id.to_string(), self.execute_plugin(id, ctx).await)
        }))
        .await;

        let mut execution = ParallelExecution::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(findings) => {
                    execution.results.insert(id, findings);
                }
                Err(e) => {
                    execution.errors.insert(id, e);
                }
            }
        }
        execution.execution_time_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            succeeded = execution.results.len(),
            failed = execution.errors.len(),
            elapsed_ms = execution.execution_time_ms,
            "parallel plugin execution finished"
        );
        execution
    }

    // -- Workflow store -----------------------------------------------------

    /// Validate a draft, assign it an id and store it.
    pub fn create_workflow(&self, draft: WorkflowDraft) -> Result<WorkflowDefinition, WorkflowError> {
        definition::validate_draft(&draft, &self.registry)?;

        let workflow = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: draft.name,
            description: draft.description,
            stages: draft.stages,
            dependencies: draft.dependencies,
            created_at: Utc::now(),
        };
        tracing::info!(
            workflow_id = %workflow.id,
            name = workflow.name.as_str(),
            stages = workflow.stages.len(),
            "created workflow"
        );
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    pub fn create_workflow_from_yaml(&self, yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
        self.create_workflow(definition::parse_workflow_yaml(yaml)?)
    }

    pub fn create_workflow_from_json(&self, json: &str) -> Result<WorkflowDefinition, WorkflowError> {
        self.create_workflow(definition::parse_workflow_json(json)?)
    }

    /// Report every structural problem in a workflow without raising.
    pub fn validate_workflow(&self, workflow: &WorkflowDefinition) -> WorkflowValidation {
        definition::validation_report(&workflow.stages, &workflow.dependencies, &self.registry)
    }

    pub fn get_workflow(&self, id: Uuid) -> Option<WorkflowDefinition> {
        self.workflows.get(&id).map(|w| w.clone())
    }

    /// All stored workflows, oldest first.
    pub fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        let mut workflows: Vec<WorkflowDefinition> =
            self.workflows.iter().map(|w| w.value().clone()).collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        workflows
    }

    /// Remove a workflow. Its execution history is kept. The run permit is
    /// dropped too unless a run still holds it.
    pub fn delete_workflow(&self, id: Uuid) -> bool {
        let removed = self.workflows.remove(&id).is_some();
        self.run_permits
            .remove_if(&id, |_, permits| permits.available_permits() == 1);
        if removed {
            tracing::info!(workflow_id = %id, "deleted workflow");
        }
        removed
    }

    // -- Workflow execution -------------------------------------------------

    fn acquire_run_permit(&self, workflow_id: Uuid) -> Result<OwnedSemaphorePermit, OrchestratorError> {
        let semaphore = self
            .run_permits
            .entry(workflow_id)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();
        semaphore
            .try_acquire_owned()
            .map_err(|_| OrchestratorError::WorkflowBusy(workflow_id))
    }

    /// Drive `workflow` through the engine using `ctx`, then append the run to
    /// history.
    pub async fn execute_sequential(
        &self,
        workflow: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
        plugin_ctx: &PluginContext,
    ) -> Result<ExecutionResult, OrchestratorError> {
        if ctx.workflow_id != workflow.id {
            return Err(OrchestratorError::ContextMismatch {
                expected: workflow.id,
                found: ctx.workflow_id,
            });
        }
        let _permit = self.acquire_run_permit(workflow.id)?;

        let result = self
            .engine
            .execute_sequential(self, workflow, ctx, plugin_ctx)
            .await?;

        self.history
            .entry(workflow.id)
            .or_default()
            .push(result.to_record());
        Ok(result)
    }

    /// Run a stored workflow from scratch.
    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        plugin_ctx: &PluginContext,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let mut ctx = self.engine.create_execution_context(workflow_id);
        self.resume_workflow(workflow_id, &mut ctx, plugin_ctx).await
    }

    /// Continue a stored workflow from a previously saved context. Stages
    /// already completed in `ctx` are not re-run.
    pub async fn resume_workflow(
        &self,
        workflow_id: Uuid,
        ctx: &mut ExecutionContext,
        plugin_ctx: &PluginContext,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let workflow = self
            .get_workflow(workflow_id)
            .ok_or(OrchestratorError::WorkflowNotFound(workflow_id))?;
        self.execute_sequential(&workflow, ctx, plugin_ctx).await
    }

    /// Past runs of a workflow, oldest first.
    pub fn execution_history(&self, workflow_id: Uuid) -> Vec<ExecutionRecord> {
        self.history
            .get(&workflow_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn aggregate_results(&self, ctx: &ExecutionContext) -> AggregatedResults {
        self.engine.aggregate_results(ctx)
    }
}

impl PluginExecutor for Orchestrator {
    async fn execute_plugin(
        &self,
        plugin_id: &str,
        ctx: &PluginContext,
    ) -> Result<Vec<Finding>, OrchestratorError> {
        Orchestrator::execute_plugin(self, plugin_id, ctx).await
    }
}

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin '{plugin_id}' failed: {message}")]
    PluginExecution { plugin_id: String, message: String },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow {0} is already running")]
    WorkflowBusy(Uuid),

    #[error("execution context belongs to workflow {found}, expected {expected}")]
    ContextMismatch { expected: Uuid, found: Uuid },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Behaviour, ScriptedPlugin, dep, draft, finding, stage};
    use probekit_types::finding::Severity;
    use std::time::Duration;

    fn orchestrator() -> Orchestrator {
        let mut registry = PluginRegistry::new();
        registry
            .register(ScriptedPlugin::new(
                "protocol",
                Behaviour::Findings(vec![finding(Severity::Major)]),
            ))
            .unwrap();
        registry
            .register(ScriptedPlugin::new(
                "security",
                Behaviour::Findings(vec![finding(Severity::Minor), finding(Severity::Info)]),
            ))
            .unwrap();
        registry
            .register(ScriptedPlugin::new(
                "broken",
                Behaviour::Fail("handshake refused".to_string()),
            ))
            .unwrap();
        registry
            .register(ScriptedPlugin::new(
                "slow",
                Behaviour::Delay(Duration::from_millis(200)),
            ))
            .unwrap();
        Orchestrator::new(Arc::new(registry), EngineConfig::default())
    }

    #[tokio::test]
    async fn execute_plugin_returns_findings() {
        let orch = orchestrator();
        let findings = orch
            .execute_plugin("protocol", &PluginContext::new("stdio://server"))
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Major);
    }

    #[tokio::test]
    async fn execute_plugin_errors() {
        let orch = orchestrator();
        let err = orch
            .execute_plugin("ghost", &PluginContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PluginNotFound(_)));

        let err = orch
            .execute_plugin("broken", &PluginContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("handshake refused"));
    }

    #[tokio::test]
    async fn parallel_isolates_failures() {
        let orch = orchestrator();
        let outcome = orch
            .execute_parallel(&["protocol", "broken", "security", "ghost"], &PluginContext::default())
            .await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results["security"].len(), 2);
        assert_eq!(outcome.errors.len(), 2);
        assert!(matches!(
            outcome.errors["ghost"],
            OrchestratorError::PluginNotFound(_)
        ));
        assert!(matches!(
            outcome.errors["broken"],
            OrchestratorError::PluginExecution { .. }
        ));
    }

    #[test]
    fn workflow_store_crud() {
        let orch = orchestrator();
        let created = orch
            .create_workflow(draft(
                vec![stage("a", "protocol", 1), stage("b", "security", 2)],
                vec![dep("a", "b", &["findings"], true)],
            ))
            .unwrap();

        assert_eq!(orch.get_workflow(created.id).unwrap().name, "diagnostics");
        assert_eq!(orch.list_workflows().len(), 1);
        assert!(orch.validate_workflow(&created).valid);
        assert!(orch.delete_workflow(created.id));
        assert!(!orch.delete_workflow(created.id));
        assert!(orch.get_workflow(created.id).is_none());
    }

    #[test]
    fn invalid_workflow_not_stored() {
        let orch = orchestrator();
        let err = orch
            .create_workflow(draft(vec![stage("a", "ghost", 1)], vec![]))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::PluginNotFound(_)));
        assert!(orch.list_workflows().is_empty());
    }

    #[tokio::test]
    async fn delete_releases_idle_run_permit() {
        let orch = orchestrator();
        let idle = orch
            .create_workflow(draft(vec![stage("p", "protocol", 1)], vec![]))
            .unwrap();
        orch.execute_workflow(idle.id, &PluginContext::default()).await.unwrap();
        assert!(orch.run_permits.contains_key(&idle.id));
        assert!(orch.delete_workflow(idle.id));
        assert!(!orch.run_permits.contains_key(&idle.id));

        let busy = orch
            .create_workflow(draft(vec![stage("p", "protocol", 1)], vec![]))
            .unwrap();
        let held = orch.acquire_run_permit(busy.id).unwrap();
        assert!(orch.delete_workflow(busy.id));
        assert!(orch.run_permits.contains_key(&busy.id));
        drop(held);
    }

    #[test]
    fn duplicate_stage_ids_not_stored() {
        let orch = orchestrator();
        let err = orch
            .create_workflow(draft(
                vec![stage("scan", "protocol", 1), stage("scan", "security", 2)],
                vec![],
            ))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidDefinition(_)));
        assert!(err.to_string().starts_with("Invalid workflow definition"));
        assert!(orch.list_workflows().is_empty());
    }

    #[test]
    fn validate_reports_all_problems() {
        let orch = orchestrator();
        let mut wf = orch
            .create_workflow(draft(vec![stage("a", "protocol", 1)], vec![]))
            .unwrap();
        wf.stages.push(stage("a", "ghost", 2));

        let report = orch.validate_workflow(&wf);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn execute_workflow_records_history() {
        let orch = orchestrator();
        let wf = orch
            .create_workflow_from_json(
                r#"{
                    "name": "proto-then-sec",
                    "stages": [
                        {"id": "proto", "pluginId": "protocol", "order": 1},
                        {"id": "sec", "pluginId": "security", "order": 2,
                         "condition": {"type": "severity", "severity": "major", "operator": "gte", "value": 1}}
                    ],
                    "dependencies": [
                        {"fromStage": "proto", "toStage": "sec", "dataFlow": ["findings"], "required": true}
                    ]
                }"#,
            )
            .unwrap();

        let result = orch
            .execute_workflow(wf.id, &PluginContext::new("http://localhost"))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.skipped_stages.is_empty());
        assert_eq!(result.stage_results.len(), 2);

        let history = orch.execution_history(wf.id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].run_id, result.run_id);
        assert!(history[0].success);
    }

    #[tokio::test]
    async fn optional_dependency_does_not_block_downstream() {
        let orch = orchestrator();
        let wf = orch
            .create_workflow(draft(
                vec![stage("handshake", "broken", 1), stage("sec", "security", 2)],
                vec![dep("handshake", "sec", &["findings"], false)],
            ))
            .unwrap();

        let result = orch.execute_workflow(wf.id, &PluginContext::default()).await.unwrap();

        assert_eq!(result.stage_results.len(), 2);
        assert_eq!(result.failed_stages, vec!["handshake".to_string()]);
        assert!(result.unresolved_dependencies.is_empty());
        assert!(result.stage_results["sec"].is_completed());
        assert!(!result.success);
        assert_eq!(
            result.total_execution_time_ms,
            result.stage_results.values().map(|r| r.execution_time_ms).sum::<u64>()
        );
    }

    #[tokio::test]
    async fn parallel_with_unknown_plugin_keeps_siblings() {
        let orch = orchestrator();
        let outcome = orch
            .execute_parallel(&["protocol", "unknown-plugin", "security"], &PluginContext::default())
            .await;

        assert!(!outcome.results.is_empty());
        assert!(outcome.errors.contains_key("unknown-plugin"));
        assert!(!outcome.errors.contains_key("protocol"));
    }

    #[tokio::test]
    async fn unknown_workflow_rejected() {
        let orch = orchestrator();
        let err = orch
            .execute_workflow(Uuid::now_v7(), &PluginContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::WorkflowNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_runs_of_same_workflow_rejected() {
        let orch = orchestrator();
        let wf = orch
            .create_workflow(draft(vec![stage("wait", "slow", 1)], vec![]))
            .unwrap();
        let other = orch
            .create_workflow(draft(vec![stage("wait", "slow", 1)], vec![]))
            .unwrap();
        let ctx = PluginContext::default();

        let (first, second, third) = tokio::join!(
            orch.execute_workflow(wf.id, &ctx),
            orch.execute_workflow(wf.id, &ctx),
            orch.execute_workflow(other.id, &ctx),
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(OrchestratorError::WorkflowBusy(id)) if id == wf.id));
        assert!(third.is_ok());

        // Permit released once the run finished.
        assert!(orch.execute_workflow(wf.id, &ctx).await.is_ok());
        assert_eq!(orch.execution_history(wf.id).len(), 2);
    }

    #[tokio::test]
    async fn resume_rejects_foreign_context() {
        let orch = orchestrator();
        let wf = orch
            .create_workflow(draft(vec![stage("a", "protocol", 1)], vec![]))
            .unwrap();
        let mut foreign = ExecutionContext::new(Uuid::now_v7());

        let err = orch
            .resume_workflow(wf.id, &mut foreign, &PluginContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ContextMismatch { .. }));
    }

    #[tokio::test]
    async fn resume_from_checkpoint_reruns_only_unfinished_stages() {
        use crate::checkpoint::{CheckpointStore, InMemoryCheckpointRepository};
        use probekit_types::checkpoint::RecoveryQuery;
        use probekit_types::config::CheckpointConfig;

        let scan = Arc::new(ScriptedPlugin::new("scan", Behaviour::Findings(vec![finding(Severity::Minor)])));
        let flaky = Arc::new(ScriptedPlugin::new("flaky", Behaviour::FailTimes(1)));
        let mut registry = PluginRegistry::new();
        registry.register_arc(scan.clone()).unwrap();
        registry.register_arc(flaky.clone()).unwrap();
        let orch = Orchestrator::new(Arc::new(registry), EngineConfig::default());
        let store = CheckpointStore::new(InMemoryCheckpointRepository::new(), CheckpointConfig::default());

        let wf = orch
            .create_workflow(draft(
                vec![stage("scan", "scan", 1), stage("probe", "flaky", 2)],
                vec![dep("scan", "probe", &["findings"], true)],
            ))
            .unwrap();
        let plugin_ctx = PluginContext::new("http://localhost");

        let mut ctx = orch.engine().create_execution_context(wf.id);
        let first = orch
            .resume_workflow(wf.id, &mut ctx, &plugin_ctx)
            .await
            .unwrap();
        assert_eq!(first.failed_stages, vec!["probe"]);
        store
            .save_checkpoint(&ctx.to_checkpoint("main").unwrap())
            .await
            .unwrap();

        let saved = store
            .recover_state(&RecoveryQuery::for_workflow(wf.id.to_string()).thread("main"))
            .await
            .unwrap()
            .unwrap();
        let mut restored = ExecutionContext::from_checkpoint(&saved).unwrap();
        let second = orch
            .resume_workflow(wf.id, &mut restored, &plugin_ctx)
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(scan.runs(), 1);
        assert_eq!(flaky.runs(), 2);
        assert_eq!(orch.aggregate_results(&restored).findings.len(), 1);
        assert_eq!(orch.execution_history(wf.id).len(), 2);
    }

    #[tokio::test]
    async fn plugins_run_once_per_stage() {
        let plugin = Arc::new(ScriptedPlugin::new("counted", Behaviour::Findings(vec![])));
        let mut registry = PluginRegistry::new();
        registry.register_arc(plugin.clone()).unwrap();
        let orch = Orchestrator::new(Arc::new(registry), EngineConfig::default());
        let wf = orch
            .create_workflow(draft(
                vec![stage("a", "counted", 1), stage("b", "counted", 2)],
                vec![],
            ))
            .unwrap();

        orch.execute_workflow(wf.id, &PluginContext::default())
            .await
            .unwrap();
        assert_eq!(plugin.runs(), 2);
    }
}
