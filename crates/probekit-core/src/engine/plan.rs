//! Execution plan construction.
//!
//! Stages are batched by their `order` value (ascending). Dependencies are
//! modelled with `petgraph`; topological sort rejects cycles and drives the
//! longest-chain (critical path) computation.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use probekit_types::workflow::{Dependency, Stage, WorkflowDefinition};
use serde::{Deserialize, Serialize};

use crate::orchestrator::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

/// Stages sharing one `order` value; they may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBatch {
    pub order: u32,
    /// Stage ids in declaration order.
    pub stage_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Batches in ascending `order`.
    pub execution_order: Vec<ExecutionBatch>,
    /// Stage id -> ids of stages that depend on it. Every stage is a key.
    pub dependency_graph: BTreeMap<String, Vec<String>>,
    /// Longest dependency chain, upstream first.
    pub critical_path: Vec<String>,
}

// ---------------------------------------------------------------------------
// Stage graph
// ---------------------------------------------------------------------------

/// Directed stage graph with an edge `from_stage -> to_stage` per dependency.
pub(crate) struct StageGraph<'a> {
    graph: DiGraph<&'a str, ()>,
}

impl<'a> StageGraph<'a> {
    /// Build the graph. Dependencies naming unknown stages are rejected.
    pub(crate) fn build(stages: &'a [Stage], dependencies: &'a [Dependency]) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let index: HashMap<&str, NodeIndex> = stages
            .iter()
            .map(|s| (s.id.as_str(), graph.add_node(s.id.as_str())))
            .collect();

        for dep in dependencies {
            let lookup = |id: &str| {
                index.get(id).copied().ok_or_else(|| {
                    WorkflowError::InvalidDefinition(format!(
                        "dependency '{}' -> '{}' references unknown stage '{id}'",
                        dep.from_stage, dep.to_stage
                    ))
                })
            };
            let from = lookup(&dep.from_stage)?;
            let to = lookup(&dep.to_stage)?;
            graph.add_edge(from, to, ());
        }

        Ok(Self { graph })
    }

    /// Topological order of stage ids, or the stage found on a cycle.
    pub(crate) fn topo_order(&self) -> Result<Vec<NodeIndex>, WorkflowError> {
        toposort(&self.graph, None).map_err(|cycle| {
            WorkflowError::CircularDependency(format!(
                "cycle involving stage '{}'",
                self.graph[cycle.node_id()]
            ))
        })
    }

    /// Longest chain through the graph, upstream first. Ties go to the chain
    /// ending earliest in topological order.
    fn longest_chain(&self) -> Result<Vec<&'a str>, WorkflowError> {
        let sorted = self.topo_order()?;
        let mut length: HashMap<NodeIndex, usize> = HashMap::new();
        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        for &node in &sorted {
            let best = self
                .graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .map(|pred| (length.get(&pred).copied().unwrap_or(1), pred))
                .max_by_key(|(len, _)| *len);
            match best {
                Some((len, pred)) => {
                    length.insert(node, len + 1);
                    previous.insert(node, pred);
                }
                None => {
                    length.insert(node, 1);
                }
            }
        }

        let mut tail = None;
        let mut best_len = 0;
        for &node in &sorted {
            let len = length.get(&node).copied().unwrap_or(1);
            if len > best_len {
                best_len = len;
                tail = Some(node);
            }
        }

        let mut chain = Vec::with_capacity(best_len);
        let mut cursor = tail;
        while let Some(node) = cursor {
            chain.push(self.graph[node]);
            cursor = previous.get(&node).copied();
        }
        chain.reverse();
        Ok(chain)
    }
}

// ---------------------------------------------------------------------------
// Plan construction
// ---------------------------------------------------------------------------

/// Build the execution plan for a workflow.
pub fn create_execution_plan(workflow: &WorkflowDefinition) -> Result<ExecutionPlan, WorkflowError> {
    let graph = StageGraph::build(&workflow.stages, &workflow.dependencies)?;
    let critical_path = graph
        .longest_chain()?
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut batches: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for stage in &workflow.stages {
        batches.entry(stage.order).or_default().push(stage.id.clone());
    }
    let execution_order = batches
        .into_iter()
        .map(|(order, stage_ids)| ExecutionBatch { order, stage_ids })
        .collect();

    let mut dependency_graph: BTreeMap<String, Vec<String>> = workflow
        .stages
        .iter()
        .map(|s| (s.id.clone(), Vec::new()))
        .collect();
    for dep in &workflow.dependencies {
        if let Some(downstream) = dependency_graph.get_mut(&dep.from_stage) {
            downstream.push(dep.to_stage.clone());
        }

        let upstream_order = workflow.stage(&dep.from_stage).map(|s| s.order);
        let downstream_order = workflow.stage(&dep.to_stage).map(|s| s.order);
        if let (Some(up), Some(down)) = (upstream_order, downstream_order) {
            if up < down {
                continue;
            }
            tracing::warn!(
                workflow_id = %workflow.id,
                from = dep.from_stage.as_str(),
                to = dep.to_stage.as_str(),
                "dependency does not point to a later batch; downstream stage will see it as missing"
            );
        }
    }

    Ok(ExecutionPlan {
        execution_order,
        dependency_graph,
        critical_path,
    })
}
