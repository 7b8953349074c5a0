//! Stage condition evaluation.

use probekit_types::workflow::{SeverityMatch, Stage, StageCondition};

use super::context::ExecutionContext;

/// Whether a stage should run, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutcome {
    pub should_execute: bool,
    pub reason: String,
}

/// Evaluate a stage's gating condition against findings recorded so far.
///
/// Only completed stages contribute findings. `severity` conditions count
/// findings at or above the named level unless `match` is `exact`.
pub fn evaluate_conditional_execution(stage: &Stage, ctx: &ExecutionContext) -> ConditionOutcome {
    let Some(condition) = &stage.condition else {
        return ConditionOutcome {
            should_execute: true,
            reason: "no condition".to_string(),
        };
    };

    match condition {
        StageCondition::FindingCount { operator, value } => {
            let observed = ctx.total_findings();
            let should_execute = operator.compare(observed, *value);
            ConditionOutcome {
                should_execute,
                reason: format!(
                    "finding count {observed} {} {value} is {should_execute}",
                    operator.symbol()
                ),
            }
        }
        StageCondition::Severity {
            severity,
            matching,
            operator,
            value,
        } => {
            let (observed, label) = match matching {
                SeverityMatch::AtLeast => (ctx.findings_at_or_above(*severity), format!("{severity}+")),
                SeverityMatch::Exact => (ctx.findings_at(*severity), severity.to_string()),
            };
            let should_execute = operator.compare(observed, *value);
            ConditionOutcome {
                should_execute,
                reason: format!(
                    "{label} finding count {observed} {} {value} is {should_execute}",
                    operator.symbol()
                ),
            }
        }
    }
}
