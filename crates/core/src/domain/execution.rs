use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::plan::StepId;

/// Lifecycle of a single step while the coordinator runs a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Dispatched,
    Retrying,
    Succeeded,
    Failed,
    Skipped,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The tool reported an error.
    Error,
    /// The step's own timeout expired.
    Timeout,
    /// A dependency did not succeed, so the tool was never invoked.
    Skipped,
    /// The coordinator deadline passed before the step finished.
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed(FailureKind),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn final_state(&self) -> StepState {
        match self {
            Self::Succeeded => StepState::Succeeded,
            Self::Failed(FailureKind::Skipped) => StepState::Skipped,
            Self::Failed(_) => StepState::Failed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: StepId,
    pub outcome: StepOutcome,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub attempts: u32,
    pub latency_ms: u64,
    #[serde(default)]
    pub optional: bool,
}

impl StepResult {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn skipped(step_id: StepId, optional: bool, reason: impl Into<String>) -> Self {
        Self {
            step_id,
            outcome: StepOutcome::Failed(FailureKind::Skipped),
            output: None,
            error: Some(reason.into()),
            attempts: 0,
            latency_ms: 0,
            optional,
        }
    }

    pub fn cancelled(step_id: StepId, optional: bool) -> Self {
        Self {
            step_id,
            outcome: StepOutcome::Failed(FailureKind::Cancelled),
            output: None,
            error: Some("coordinator deadline reached before the step finished".to_string()),
            attempts: 0,
            latency_ms: 0,
            optional,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Success,
    Partial,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatedResult {
    pub success: bool,
    pub status: PlanStatus,
    /// One entry per plan step, in plan order.
    pub steps: Vec<StepResult>,
    pub failed_steps: Vec<StepId>,
    pub total_latency_ms: u64,
    #[serde(default)]
    pub deadline_exceeded: bool,
}

impl CoordinatedResult {
    /// Aggregates per-step results. `success` depends only on final outcomes.
    pub fn aggregate(steps: Vec<StepResult>, total_latency_ms: u64, deadline_exceeded: bool) -> Self {
        let success = steps.iter().all(|step| step.optional || step.success());
        let failed_steps =
            steps.iter().filter(|step| !step.success()).map(|step| step.step_id.clone()).collect();
        let status = if success {
            PlanStatus::Success
        } else if steps.iter().any(StepResult::success) {
            PlanStatus::Partial
        } else {
            PlanStatus::Failed
        };

        Self { success, status, steps, failed_steps, total_latency_ms, deadline_exceeded }
    }

    pub fn step(&self, id: &StepId) -> Option<&StepResult> {
        self.steps.iter().find(|step| &step.step_id == id)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&StepId, &Value)> {
        self.steps
            .iter()
            .filter(|step| step.success())
            .filter_map(|step| step.output.as_ref().map(|output| (&step.step_id, output)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CoordinatedResult, FailureKind, PlanStatus, StepOutcome, StepResult, StepState};
    use crate::domain::plan::StepId;

    fn result(id: &str, outcome: StepOutcome, optional: bool) -> StepResult {
        StepResult {
            step_id: StepId::new(id),
            outcome,
            output: outcome.is_success().then(|| json!({"id": id})),
            error: None,
            attempts: 1,
            latency_ms: 5,
            optional,
        }
    }

    #[test]
    fn outcomes_settle_into_terminal_states() {
        assert_eq!(StepOutcome::Succeeded.final_state(), StepState::Succeeded);
        assert_eq!(StepOutcome::Failed(FailureKind::Skipped).final_state(), StepState::Skipped);
        assert_eq!(StepOutcome::Failed(FailureKind::Timeout).final_state(), StepState::Failed);
        assert_eq!(StepOutcome::Failed(FailureKind::Cancelled).final_state().as_str(), "failed");
    }

    #[test]
    fn aggregate_fails_when_required_step_fails_regardless_of_order() {
        let ordered = vec![
            result("a", StepOutcome::Succeeded, false),
            result("b", StepOutcome::Failed(FailureKind::Timeout), false),
        ];
        let mut reversed = ordered.clone();
        reversed.reverse();

        for steps in [ordered, reversed] {
            let aggregated = CoordinatedResult::aggregate(steps, 10, false);
            assert!(!aggregated.success);
            assert_eq!(aggregated.status, PlanStatus::Partial);
            assert_eq!(aggregated.failed_steps, vec![StepId::new("b")]);
        }
    }

    #[test]
    fn optional_failure_keeps_plan_successful_but_is_listed() {
        let aggregated = CoordinatedResult::aggregate(
            vec![
                result("a", StepOutcome::Succeeded, false),
                result("b", StepOutcome::Failed(FailureKind::Error), true),
            ],
            10,
            false,
        );

        assert!(aggregated.success);
        assert_eq!(aggregated.status, PlanStatus::Success);
        assert_eq!(aggregated.failed_steps, vec![StepId::new("b")]);
        assert_eq!(aggregated.outputs().count(), 1);
    }

    #[test]
    fn nothing_succeeding_is_a_failed_plan() {
        let aggregated = CoordinatedResult::aggregate(
            vec![StepResult::skipped(StepId::new("a"), false, "dependency failed")],
            0,
            false,
        );
        assert_eq!(aggregated.status, PlanStatus::Failed);
        assert_eq!(
            aggregated.steps[0].outcome.final_state(),
            StepState::Skipped,
        );
    }
}
