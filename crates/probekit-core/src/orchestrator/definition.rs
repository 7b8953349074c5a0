//! Workflow definition parsing and validation.
//!
//! Drafts arrive as Rust values, YAML or JSON. Validation reports every
//! structural problem it finds (`collect_issues`), while creation fails fast
//! on the first violated rule class (`validate_draft`), checked in this order:
//! duplicate stage ids, unknown plugins, dangling dependencies, cycles.

use std::collections::HashSet;
use std::path::Path;

use probekit_types::workflow::{Dependency, Stage, WorkflowDraft, WorkflowValidation};
use thiserror::Error;

use crate::engine::plan::StageGraph;
use crate::plugin::PluginRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while parsing, validating or planning a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Duplicate stage ids or dependencies naming unknown stages.
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// A stage references a plugin id missing from the registry.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// YAML/JSON (de)serialization failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML document into a workflow draft. Structure is not validated.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDraft, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Parse a JSON document into a workflow draft. Structure is not validated.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDraft, WorkflowError> {
    serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Load a draft from disk, choosing the format by extension
/// (`.json`, otherwise YAML).
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDraft, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Every structural problem in a stage/dependency set, in check order.
pub fn collect_issues(
    stages: &[Stage],
    dependencies: &[Dependency],
    registry: &PluginRegistry,
) -> Vec<WorkflowError> {
    let mut issues = Vec::new();

    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(stage.id.as_str()) {
            issues.push(WorkflowError::InvalidDefinition(format!(
                "duplicate stage id '{}'",
                stage.id
            )));
        }
    }

    for stage in stages {
        if !registry.contains(&stage.plugin_id) {
            issues.push(WorkflowError::PluginNotFound(format!(
                "stage '{}' uses unknown plugin '{}'",
                stage.id, stage.plugin_id
            )));
        }
    }

    let mut dangling = false;
    for dep in dependencies {
        for id in [&dep.from_stage, &dep.to_stage] {
            if !seen.contains(id.as_str()) {
                dangling = true;
                issues.push(WorkflowError::InvalidDefinition(format!(
                    "dependency '{}' -> '{}' references unknown stage '{id}'",
                    dep.from_stage, dep.to_stage
                )));
            }
        }
    }

    // Cycle detection needs a well-formed graph.
    if !dangling {
        match StageGraph::build(stages, dependencies).and_then(|g| g.topo_order()) {
            Ok(_) => {}
            Err(e) => issues.push(e),
        }
    }

    issues
}

/// Fail on the first violated rule class.
pub fn validate_draft(draft: &WorkflowDraft, registry: &PluginRegistry) -> Result<(), WorkflowError> {
    match collect_issues(&draft.stages, &draft.dependencies, registry)
        .into_iter()
        .next()
    {
        Some(issue) => Err(issue),
        None => Ok(()),
    }
}

/// Validation report listing every problem found.
pub fn validation_report(
    stages: &[Stage],
    dependencies: &[Dependency],
    registry: &PluginRegistry,
) -> WorkflowValidation {
    let errors: Vec<String> = collect_issues(stages, dependencies, registry)
        .iter()
        .map(ToString::to_string)
        .collect();
    WorkflowValidation {
        valid: errors.is_empty(),
        errors,
    }
}
