//! Batch-wise workflow driver.
//!
//! Batches run strictly in ascending `order`. Inside a batch every stage is
//! first gated (condition, required dependencies) against the context as it
//! stood when the batch began, then the runnable stages are dispatched
//! concurrently. Plugin failures are captured per stage and never abort the
//! run.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use probekit_types::config::EngineConfig;
use probekit_types::finding::Finding;
use probekit_types::workflow::{ExecutionRecord, Stage, StageResult, StageStatus, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::condition::evaluate_conditional_execution;
use super::context::ExecutionContext;
use super::mapping::apply_input_mapping;
use super::plan::{ExecutionPlan, create_execution_plan};
use crate::orchestrator::OrchestratorError;
use crate::orchestrator::definition::WorkflowError;
use crate::plugin::PluginContext;

// ---------------------------------------------------------------------------
// PluginExecutor trait
// ---------------------------------------------------------------------------

/// Something that can run a plugin by id. Implemented by the orchestrator.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods,
/// consistent with the project's Rust 2024 edition approach.
pub trait PluginExecutor: Send + Sync {
    fn execute_plugin(
        &self,
        plugin_id: &str,
        ctx: &PluginContext,
    ) -> impl Future<Output = Result<Vec<Finding>, OrchestratorError>> + Send;
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A stage that could not run because a required upstream had not completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedDependency {
    pub stage_id: String,
    pub depends_on: String,
}

/// Outcome of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    /// False when any stage failed or a required dependency was unmet.
    pub success: bool,
    pub stage_results: HashMap<String, StageResult>,
    pub stage_timings: BTreeMap<String, u64>,
    /// Sum of per-stage execution times.
    #[serde(rename = "totalExecutionTime")]
    pub total_execution_time_ms: u64,
    /// Elapsed wall-clock time of this run.
    pub wall_clock_ms: u64,
    pub skipped_stages: Vec<String>,
    pub failed_stages: Vec<String>,
    pub unresolved_dependencies: Vec<UnresolvedDependency>,
}

impl ExecutionResult {
    /// History entry for this run.
    pub fn to_record(&self) -> ExecutionRecord {
        ExecutionRecord {
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            timestamp: Utc::now(),
            success: self.success,
            stage_timings: self.stage_timings.clone(),
            total_execution_time_ms: self.total_execution_time_ms,
            skipped_stages: self.skipped_stages.clone(),
            failed_stages: self.failed_stages.clone(),
        }
    }
}

/// Flattened findings and counters across a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResults {
    pub findings: Vec<Finding>,
    #[serde(rename = "totalExecutionTime")]
    pub total_execution_time_ms: u64,
    pub stage_count: usize,
    pub success_count: usize,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Stateless workflow driver. One engine may run many workflows at once;
/// all per-run state lives in the caller's `ExecutionContext`.
#[derive(Debug, Clone, Default)]
pub struct WorkflowEngine {
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_execution_plan(&self, workflow: &WorkflowDefinition) -> Result<ExecutionPlan, WorkflowError> {
        create_execution_plan(workflow)
    }

    pub fn create_execution_context(&self, workflow_id: Uuid) -> ExecutionContext {
        ExecutionContext::new(workflow_id)
    }

    /// Run `workflow` batch by batch, recording every stage result in `ctx`.
    ///
    /// Stages already completed in `ctx` are not re-run, which makes this the
    /// resume path as well.
    pub async fn execute_sequential<E: PluginExecutor>(
        &self,
        executor: &E,
        workflow: &WorkflowDefinition,
        ctx: &mut ExecutionContext,
        plugin_ctx: &PluginContext,
    ) -> Result<ExecutionResult, WorkflowError> {
        let plan = create_execution_plan(workflow)?;
        let started = Instant::now();

        let mut skipped_stages = Vec::new();
        let mut failed_stages = Vec::new();
        let mut unresolved_dependencies = Vec::new();

        tracing::info!(
            workflow_id = %workflow.id,
            run_id = %ctx.run_id,
            batches = plan.execution_order.len(),
            "executing workflow"
        );

        for batch in &plan.execution_order {
            let mut runnable: Vec<(&Stage, Map<String, Value>)> = Vec::new();
            let mut gated: Vec<StageResult> = Vec::new();

            for stage_id in &batch.stage_ids {
                let Some(stage) = workflow.stage(stage_id) else {
                    continue;
                };

                if ctx.is_stage_completed(&stage.id) {
                    tracing::debug!(stage_id = stage.id.as_str(), "stage already completed, skipping");
                    continue;
                }

                let outcome = evaluate_conditional_execution(stage, ctx);
                if !outcome.should_execute {
                    tracing::info!(
                        stage_id = stage.id.as_str(),
                        reason = outcome.reason.as_str(),
                        "stage skipped by condition"
                    );
                    skipped_stages.push(stage.id.clone());
                    gated.push(immediate_result(stage, StageStatus::Skipped, None));
                    continue;
                }

                let mapping = apply_input_mapping(stage, workflow, ctx);
                let unmet: Vec<&str> = mapping.unmet_required().collect();
                if !unmet.is_empty() {
                    tracing::warn!(
                        stage_id = stage.id.as_str(),
                        unmet = ?unmet,
                        "required dependencies not completed"
                    );
                    for upstream in &unmet {
                        unresolved_dependencies.push(UnresolvedDependency {
                            stage_id: stage.id.clone(),
                            depends_on: upstream.to_string(),
                        });
                    }
                    let error = format!("required dependencies not completed: {}", unmet.join(", "));
                    failed_stages.push(stage.id.clone());
                    gated.push(immediate_result(stage, StageStatus::Failed, Some(error)));
                    continue;
                }

                runnable.push((stage, mapping.mapped_data));
            }

            for result in gated {
                ctx.record(result);
            }

            let limit = self
                .config
                .max_batch_concurrency
                .unwrap_or(runnable.len())
                .max(1);

            let results: Vec<StageResult> = stream::iter(
                runnable
                    .into_iter()
                    .map(|(stage, input)| run_stage(executor, stage, input, plugin_ctx)),
            )
            .buffer_unordered(limit)
            .collect()
            .await;

            for result in results {
                if result.status == StageStatus::Failed {
                    failed_stages.push(result.stage_id.clone());
                }
                ctx.record(result);
            }
        }

        let stage_results: HashMap<String, StageResult> = workflow
            .stages
            .iter()
            .filter_map(|s| ctx.stage_result(&s.id).map(|r| (s.id.clone(), r.clone())))
            .collect();
        let stage_timings = stage_results
            .iter()
            .map(|(id, r)| (id.clone(), r.execution_time_ms))
            .collect();
        let total_execution_time_ms = stage_results.values().map(|r| r.execution_time_ms).sum();
        let success = failed_stages.is_empty() && unresolved_dependencies.is_empty();

        tracing::info!(
            workflow_id = %workflow.id,
            run_id = %ctx.run_id,
            success,
            failed = failed_stages.len(),
            skipped = skipped_stages.len(),
            "workflow finished"
        );

        Ok(ExecutionResult {
            run_id: ctx.run_id,
            workflow_id: workflow.id,
            success,
            stage_results,
            stage_timings,
            total_execution_time_ms,
            wall_clock_ms: started.elapsed().as_millis() as u64,
            skipped_stages,
            failed_stages,
            unresolved_dependencies,
        })
    }

    /// Flatten all stage findings and count stage outcomes.
    pub fn aggregate_results(&self, ctx: &ExecutionContext) -> AggregatedResults {
        let mut stage_ids: Vec<&String> = ctx.stage_data.keys().collect();
        stage_ids.sort();

        let findings = stage_ids
            .iter()
            .flat_map(|id| ctx.stage_data[*id].findings.iter().cloned())
            .collect();

        AggregatedResults {
            findings,
            total_execution_time_ms: ctx.total_execution_time_ms(),
            stage_count: ctx.stage_data.len(),
            success_count: ctx.stage_data.values().filter(|r| r.is_completed()).count(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage helpers
// ---------------------------------------------------------------------------

async fn run_stage<E: PluginExecutor>(
    executor: &E,
    stage: &Stage,
    input: Map<String, Value>,
    plugin_ctx: &PluginContext,
) -> StageResult {
    let start_time = Utc::now();
    let started = Instant::now();
    let stage_ctx = plugin_ctx.with_inputs(input.clone());

    let (status, findings, error) = match executor.execute_plugin(&stage.plugin_id, &stage_ctx).await {
        Ok(findings) => (StageStatus::Completed, findings, None),
        Err(e) => {
            tracing::warn!(
                stage_id = stage.id.as_str(),
                plugin_id = stage.plugin_id.as_str(),
                error = %e,
                "stage failed"
            );
            (StageStatus::Failed, Vec::new(), Some(e.to_string()))
        }
    };

    StageResult {
        stage_id: stage.id.clone(),
        plugin_id: stage.plugin_id.clone(),
        findings,
        execution_time_ms: started.elapsed().as_millis() as u64,
        start_time,
        end_time: Utc::now(),
        status,
        error,
        input: (!input.is_empty()).then_some(Value::Object(input)),
    }
}

fn immediate_result(stage: &Stage, status: StageStatus, error: Option<String>) -> StageResult {
    let now = Utc::now();
    StageResult {
        stage_id: stage.id.clone(),
        plugin_id: stage.plugin_id.clone(),
        findings: Vec::new(),
        execution_time_ms: 0,
        start_time: now,
        end_time: now,
        status,
        error,
        input: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeExecutor, dep, finding, stage, workflow};
    use probekit_types::finding::Severity;
    use probekit_types::workflow::{ComparisonOperator, StageCondition};
    use std::time::Duration;

    fn engine() -> WorkflowEngine {
        WorkflowEngine::default()
    }

    #[tokio::test]
    async fn batches_run_in_order_and_data_flows() {
        let wf = workflow(
            vec![stage("scan", "scanner", 1), stage("report", "reporter", 2)],
            vec![dep("scan", "report", &["findings"], true)],
        );
        let executor = FakeExecutor::new()
            .with_findings("scanner", vec![finding(Severity::Major)])
            .with_findings("reporter", vec![]);
        let mut ctx = engine().create_execution_context(wf.id);

        let result = engine()
            .execute_sequential(&executor, &wf, &mut ctx, &PluginContext::new("t"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.stage_results.len(), 2);
        assert_eq!(executor.calls(), vec!["scanner", "reporter"]);

        let report_input = executor.input_for("reporter").unwrap();
        assert_eq!(report_input["findings"].as_array().unwrap().len(), 1);
        assert_eq!(
            result.total_execution_time_ms,
            result.stage_results.values().map(|r| r.execution_time_ms).sum::<u64>()
        );
    }

    #[tokio::test]
    async fn plugin_failure_is_captured() {
        let wf = workflow(
            vec![stage("a", "ok", 1), stage("b", "broken", 1)],
            vec![],
        );
        let executor = FakeExecutor::new()
            .with_findings("ok", vec![finding(Severity::Info)])
            .with_failure("broken", "socket closed");
        let mut ctx = engine().create_execution_context(wf.id);

        let result = engine()
            .execute_sequential(&executor, &wf, &mut ctx, &PluginContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.failed_stages, vec!["b"]);
        let failed = &result.stage_results["b"];
        assert_eq!(failed.status, StageStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("socket closed"));
        assert!(result.stage_results["a"].is_completed());
    }

    #[tokio::test]
    async fn condition_skips_stage() {
        let mut deep = stage("deep", "deep", 2);
        deep.condition = Some(StageCondition::FindingCount {
            operator: ComparisonOperator::Gt,
            value: 1000,
        });
        let wf = workflow(vec![stage("scan", "scanner", 1), deep], vec![]);
        let executor = FakeExecutor::new()
            .with_findings("scanner", vec![finding(Severity::Major)])
            .with_findings("deep", vec![]);
        let mut ctx = engine().create_execution_context(wf.id);

        let result = engine()
            .execute_sequential(&executor, &wf, &mut ctx, &PluginContext::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.skipped_stages, vec!["deep"]);
        assert_eq!(result.stage_results["deep"].status, StageStatus::Skipped);
        assert_eq!(executor.calls(), vec!["scanner"]);
    }

    #[tokio::test]
    async fn unmet_required_dependency_fails_stage() {
        let wf = workflow(
            vec![stage("a", "broken", 1), stage("b", "fine", 2), stage("c", "fine2", 2)],
            vec![
                dep("a", "b", &["findings"], true),
                dep("a", "c", &["findings"], false),
            ],
        );
        let executor = FakeExecutor::new()
            .with_failure("broken", "boom")
            .with_findings("fine", vec![])
            .with_findings("fine2", vec![]);
        let mut ctx = engine().create_execution_context(wf.id);

        let result = engine()
            .execute_sequential(&executor, &wf, &mut ctx, &PluginContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(
            result.unresolved_dependencies,
            vec![UnresolvedDependency {
                stage_id: "b".to_string(),
                depends_on: "a".to_string()
            }]
        );
        assert_eq!(result.stage_results["b"].status, StageStatus::Failed);
        // Optional dependency: stage still runs.
        assert!(result.stage_results["c"].is_completed());
        assert!(!executor.calls().contains(&"fine".to_string()));
    }

    #[tokio::test]
    async fn resume_skips_completed_stages() {
        let wf = workflow(
            vec![stage("a", "first", 1), stage("b", "second", 2)],
            vec![dep("a", "b", &["findings"], true)],
        );
        let flaky = FakeExecutor::new()
            .with_findings("first", vec![finding(Severity::Minor)])
            .with_failure("second", "timeout");
        let mut ctx = engine().create_execution_context(wf.id);
        let first = engine()
            .execute_sequential(&flaky, &wf, &mut ctx, &PluginContext::default())
            .await
            .unwrap();
        assert!(!first.success);

        let restored = ExecutionContext::from_json(ctx.to_json().unwrap()).unwrap();
        let mut ctx = restored;
        let healthy = FakeExecutor::new()
            .with_findings("first", vec![])
            .with_findings("second", vec![]);
        let second = engine()
            .execute_sequential(&healthy, &wf, &mut ctx, &PluginContext::default())
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(healthy.calls(), vec!["second"]);
        assert_eq!(second.run_id, first.run_id);
        // Upstream findings from the first attempt still flow downstream.
        assert_eq!(
            healthy.input_for("second").unwrap()["findings"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batch_stages_run_concurrently() {
        let wf = workflow(
            vec![stage("a", "slow_a", 1), stage("b", "slow_b", 1), stage("c", "slow_c", 1)],
            vec![],
        );
        let executor = FakeExecutor::new()
            .with_delay("slow_a", Duration::from_millis(100))
            .with_delay("slow_b", Duration::from_millis(100))
            .with_delay("slow_c", Duration::from_millis(100));
        let mut ctx = engine().create_execution_context(wf.id);

        engine()
            .execute_sequential(&executor, &wf, &mut ctx, &PluginContext::default())
            .await
            .unwrap();
        assert_eq!(executor.max_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_concurrency_cap_respected() {
        let wf = workflow(
            vec![stage("a", "slow_a", 1), stage("b", "slow_b", 1), stage("c", "slow_c", 1)],
            vec![],
        );
        let executor = FakeExecutor::new()
            .with_delay("slow_a", Duration::from_millis(100))
            .with_delay("slow_b", Duration::from_millis(100))
            .with_delay("slow_c", Duration::from_millis(100));
        let capped = WorkflowEngine::new(EngineConfig {
            max_batch_concurrency: Some(1),
        });
        let mut ctx = capped.create_execution_context(wf.id);

        let result = capped
            .execute_sequential(&executor, &wf, &mut ctx, &PluginContext::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(executor.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn cyclic_workflow_is_rejected_before_running() {
        let wf = workflow(
            vec![stage("a", "p", 1), stage("b", "p", 2)],
            vec![dep("a", "b", &[], true), dep("b", "a", &[], true)],
        );
        let executor = FakeExecutor::new().with_findings("p", vec![]);
        let mut ctx = engine().create_execution_context(wf.id);

        let err = engine()
            .execute_sequential(&executor, &wf, &mut ctx, &PluginContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CircularDependency(_)));
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn aggregate_counts_and_flattens() {
        use crate::test_support::{completed, failed};

        let mut ctx = ExecutionContext::new(Uuid::now_v7());
        let mut a = completed("a", vec![finding(Severity::Info), finding(Severity::Major)]);
        a.execution_time_ms = 12;
        let mut b = failed("b", "boom");
        b.execution_time_ms = 3;
        ctx.record(a);
        ctx.record(b);

        let aggregated = engine().aggregate_results(&ctx);
        assert_eq!(aggregated.findings.len(), 2);
        assert_eq!(aggregated.total_execution_time_ms, 15);
        assert_eq!(aggregated.stage_count, 2);
        assert_eq!(aggregated.success_count, 1);
    }

    #[test]
    fn result_converts_to_history_record() {
        let result = ExecutionResult {
            run_id: Uuid::nil(),
            workflow_id: Uuid::nil(),
            success: false,
            stage_results: HashMap::new(),
            stage_timings: BTreeMap::from([("a".to_string(), 7)]),
            total_execution_time_ms: 7,
            wall_clock_ms: 9,
            skipped_stages: vec![],
            failed_stages: vec!["a".to_string()],
            unresolved_dependencies: vec![],
        };
        let record = result.to_record();
        assert!(!record.success);
        assert_eq!(record.total_execution_time_ms, 7);
        assert_eq!(record.failed_stages, vec!["a"]);
    }
}
