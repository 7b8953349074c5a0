//! Upstream-to-downstream data mapping.
//!
//! For each dependency into a stage, the upstream `StageResult` is serialized
//! to a JSON object and the requested keys are copied into the stage's input.
//! With an explicit `input_mapping` (upstream key -> input field) only mapped
//! keys that the dependency's `data_flow` carries are copied, renamed to the
//! input field; otherwise every `data_flow` key is copied under its own name.

use probekit_types::workflow::{StageResult, Stage, WorkflowDefinition};
use serde_json::{Map, Value};

use super::context::ExecutionContext;

/// An upstream stage that had not completed when the mapping was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub stage_id: String,
    pub required: bool,
}

/// Result of mapping upstream data into a stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputMapping {
    pub mapped_data: Map<String, Value>,
    /// Upstream stages that contributed at least one value.
    pub sources_used: Vec<String>,
    pub missing_dependencies: Vec<MissingDependency>,
}

impl InputMapping {
    /// Required upstream stages that were missing or not completed.
    pub fn unmet_required(&self) -> impl Iterator<Item = &str> {
        self.missing_dependencies
            .iter()
            .filter(|m| m.required)
            .map(|m| m.stage_id.as_str())
    }
}

/// Build the input object for `stage` from the results recorded in `ctx`.
pub fn apply_input_mapping(
    stage: &Stage,
    workflow: &WorkflowDefinition,
    ctx: &ExecutionContext,
) -> InputMapping {
    let mut mapping = InputMapping::default();

    for dep in workflow.dependencies_into(&stage.id) {
        let upstream = match ctx.stage_result(&dep.from_stage) {
            Some(result) if result.is_completed() => result,
            _ => {
                mapping.missing_dependencies.push(MissingDependency {
                    stage_id: dep.from_stage.clone(),
                    required: dep.required,
                });
                continue;
            }
        };

        let fields = result_fields(upstream);
        let mut used = false;

        match &stage.input_mapping {
            Some(input_mapping) => {
                for (output_key, input_key) in input_mapping {
                    if !dep.data_flow.contains(output_key) {
                        continue;
                    }
                    if let Some(value) = fields.get(output_key) {
                        mapping.mapped_data.insert(input_key.clone(), value.clone());
                        used = true;
                    }
                }
            }
            None => {
                for key in &dep.data_flow {
                    if let Some(value) = fields.get(key) {
                        mapping.mapped_data.insert(key.clone(), value.clone());
                        used = true;
                    }
                }
            }
        }

        if used && !mapping.sources_used.contains(&dep.from_stage) {
            mapping.sources_used.push(dep.from_stage.clone());
        }
    }

    mapping
}

fn result_fields(result: &StageResult) -> Map<String, Value> {
    match serde_json::to_value(result) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
