//! Dependency-aware execution of an [`ExecutionPlan`].
//!
//! Every step runs as its own future inside one `FuturesUnordered`. A step waits on
//! the watch channels of its dependencies (no polling), invokes its tool under a
//! semaphore permit and a per-attempt timeout, and retries with linear backoff.
//! Results come back to the drain loop, which is the only writer of the result
//! slots and the only sender on the watch channels. An overall deadline cuts the
//! run short; steps still unfinished at that instant are recorded as cancelled.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use concierge_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use concierge_core::config::CoordinatorConfig;
use concierge_core::domain::execution::{
    CoordinatedResult, FailureKind, PlanStatus, StepOutcome, StepResult, StepState,
};
use concierge_core::domain::plan::{ExecutionPlan, ExecutionStep, StepIndex};
use concierge_core::planner::PlanGraph;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{watch, Semaphore};

use crate::tools::{elapsed_ms, ToolInvoker, ToolResponse};

/// Stand-in for deadlines too far out for the clock to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Per-call settings supplied by whoever runs the plan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub correlation_id: String,
    /// Replaces the deadline derived from the plan's estimated latency.
    pub deadline: Option<Duration>,
}

impl CallerContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Clone, Debug)]
enum Settled {
    Succeeded(Value),
    Failed,
}

struct RunState<'a> {
    plan: &'a ExecutionPlan,
    graph: &'a PlanGraph,
    settled: &'a [watch::Receiver<Option<Settled>>],
    permits: &'a Semaphore,
    first_dispatch: &'a OnceLock<Instant>,
    correlation_id: &'a str,
}

pub struct ToolCoordinator {
    tools: Arc<dyn ToolInvoker>,
    config: CoordinatorConfig,
    audit: Arc<dyn AuditSink>,
}

impl ToolCoordinator {
    pub fn new(tools: Arc<dyn ToolInvoker>, config: CoordinatorConfig) -> Self {
        Self { tools, config, audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// `max(estimated latency x deadline_factor, deadline_floor)`.
    pub fn deadline_for(&self, plan: &ExecutionPlan) -> Duration {
        let scaled = (plan.estimated_latency_ms as f64 * self.config.deadline_factor) as u64;
        Duration::from_millis(scaled.max(self.config.deadline_floor_ms))
    }

    pub async fn execute_coordinated_plan(
        &self,
        plan: &ExecutionPlan,
        caller: &CallerContext,
    ) -> CoordinatedResult {
        let graph = match PlanGraph::build(plan) {
            Ok(graph) => graph,
            Err(error) => {
                tracing::warn!(
                    event_name = "coordinator.plan.rejected",
                    correlation_id = %caller.correlation_id,
                    code = error.code(),
                    error = %error,
                    "refusing to run structurally invalid plan"
                );
                let reason = format!("plan rejected: {error}");
                let steps = plan
                    .steps
                    .iter()
                    .map(|step| StepResult::skipped(step.id.clone(), step.optional, reason.clone()))
                    .collect();
                let mut result = CoordinatedResult::aggregate(steps, 0, false);
                result.success = false;
                result.status = PlanStatus::Failed;
                return result;
            }
        };

        let deadline_after = caller.deadline.unwrap_or_else(|| self.deadline_for(plan));
        let started_at = tokio::time::Instant::now();
        let deadline =
            started_at.checked_add(deadline_after).unwrap_or_else(|| started_at + FAR_FUTURE);

        let (senders, receivers): (Vec<_>, Vec<_>) =
            graph.indices().map(|_| watch::channel::<Option<Settled>>(None)).unzip();
        let permits = Semaphore::new(self.config.max_concurrency.max(1));
        let first_dispatch = OnceLock::new();
        let state = RunState {
            plan,
            graph: &graph,
            settled: &receivers,
            permits: &permits,
            first_dispatch: &first_dispatch,
            correlation_id: &caller.correlation_id,
        };

        tracing::info!(
            event_name = "coordinator.plan.started",
            correlation_id = %caller.correlation_id,
            steps = plan.steps.len(),
            max_concurrency = self.config.max_concurrency,
            deadline_ms = u64::try_from(deadline_after.as_millis()).unwrap_or(u64::MAX),
            "executing plan"
        );

        // Permits are requested in wave order.
        let mut dispatch_order: Vec<StepIndex> = graph.indices().collect();
        dispatch_order.sort_by_key(|index| (plan.steps[index.0].priority, *index));

        let mut in_flight: FuturesUnordered<_> =
            dispatch_order.into_iter().map(|index| self.run_step(&state, index)).collect();

        let mut slots: Vec<Option<StepResult>> = vec![None; plan.steps.len()];
        let mut last_terminal: Option<Instant> = None;
        let mut deadline_exceeded = false;
        let deadline_timer = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline_timer);

        loop {
            tokio::select! {
                biased;
                next = in_flight.next() => {
                    let Some((index, result)) = next else { break };
                    let settled = match (&result.outcome, &result.output) {
                        (StepOutcome::Succeeded, output) => {
                            Settled::Succeeded(output.clone().unwrap_or(Value::Null))
                        }
                        _ => Settled::Failed,
                    };
                    self.emit_step_outcome(caller, &result);
                    senders[index.0].send_replace(Some(settled));
                    slots[index.0] = Some(result);
                    last_terminal = Some(Instant::now());
                }
                _ = &mut deadline_timer => {
                    deadline_exceeded = true;
                    last_terminal = Some(Instant::now());
                    break;
                }
            }
        }
        drop(in_flight);

        if deadline_exceeded {
            tracing::warn!(
                event_name = "coordinator.deadline.exceeded",
                correlation_id = %caller.correlation_id,
                unfinished = slots.iter().filter(|slot| slot.is_none()).count(),
                "coordinator deadline reached; cancelling unfinished steps"
            );
        }

        let steps: Vec<StepResult> = slots
            .into_iter()
            .zip(&plan.steps)
            .map(|(slot, step)| {
                slot.unwrap_or_else(|| {
                    let cancelled = StepResult::cancelled(step.id.clone(), step.optional);
                    self.emit_step_outcome(caller, &cancelled);
                    cancelled
                })
            })
            .collect();

        let total_latency_ms = match (first_dispatch.get(), last_terminal) {
            (Some(first), Some(last)) => {
                u64::try_from(last.saturating_duration_since(*first).as_millis()).unwrap_or(u64::MAX)
            }
            _ => 0,
        };

        let result = CoordinatedResult::aggregate(steps, total_latency_ms, deadline_exceeded);
        tracing::info!(
            event_name = "coordinator.plan.finished",
            correlation_id = %caller.correlation_id,
            status = result.status.as_str(),
            failed_steps = result.failed_steps.len(),
            total_latency_ms = result.total_latency_ms,
            deadline_exceeded = result.deadline_exceeded,
            "plan execution finished"
        );
        result
    }

    async fn run_step(&self, state: &RunState<'_>, index: StepIndex) -> (StepIndex, StepResult) {
        let step = &state.plan.steps[index.0];

        let mut upstream = Map::new();
        if !state.graph.dependencies(index).is_empty() {
            tracing::trace!(
                event_name = "coordinator.step.waiting",
                correlation_id = %state.correlation_id,
                step_id = %step.id,
                state = StepState::Pending.as_str(),
                "step waiting on dependencies"
            );
        }
        for dependency in state.graph.dependencies(index) {
            let mut receiver = state.settled[dependency.0].clone();
            let settled = match receiver.wait_for(Option::is_some).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };
            let dependency_id = &state.plan.steps[dependency.0].id;
            match settled {
                Some(Settled::Succeeded(output)) => {
                    upstream.insert(dependency_id.to_string(), output);
                }
                _ => {
                    tracing::debug!(
                        event_name = "coordinator.step.skipped",
                        correlation_id = %state.correlation_id,
                        step_id = %step.id,
                        state = StepState::Skipped.as_str(),
                        dependency = %dependency_id,
                        "dependency did not succeed; skipping step"
                    );
                    let reason = format!("dependency `{dependency_id}` did not succeed");
                    return (index, StepResult::skipped(step.id.clone(), step.optional, reason));
                }
            }
        }

        let parameters = step_parameters(step, upstream);
        (index, self.invoke_with_retry(state, step, &parameters).await)
    }

    async fn invoke_with_retry(
        &self,
        state: &RunState<'_>,
        step: &ExecutionStep,
        parameters: &Value,
    ) -> StepResult {
        let policy = step.retry_policy;
        let max_attempts = policy.max_attempts();
        let mut attempts: u32 = 0;
        let mut step_started: Option<Instant> = None;

        loop {
            attempts += 1;
            let response = {
                let Ok(_permit) = state.permits.acquire().await else {
                    return failed_result(step, FailureKind::Error, "scheduler closed", attempts, 0);
                };
                let now = Instant::now();
                state.first_dispatch.get_or_init(|| now);
                step_started.get_or_insert(now);

                tracing::debug!(
                    event_name = "coordinator.step.dispatched",
                    correlation_id = %state.correlation_id,
                    step_id = %step.id,
                    tool = %step.tool,
                    state = StepState::Dispatched.as_str(),
                    attempt = attempts,
                    "step dispatched"
                );

                let timeout = step.timeout();
                match tokio::time::timeout(timeout, self.tools.invoke(&step.tool, parameters, timeout)).await {
                    Ok(response) => response,
                    Err(_) => ToolResponse::timeout(timeout, u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
                }
            };
            let latency_ms = step_started.map(elapsed_ms).unwrap_or(0);

            if response.success {
                return StepResult {
                    step_id: step.id.clone(),
                    outcome: StepOutcome::Succeeded,
                    output: response.result,
                    error: None,
                    attempts,
                    latency_ms,
                    optional: step.optional,
                };
            }

            let kind = if response.timed_out { FailureKind::Timeout } else { FailureKind::Error };
            let error = response.error.unwrap_or_else(|| "tool reported failure".to_string());
            if attempts >= max_attempts {
                tracing::warn!(
                    event_name = "coordinator.step.failed",
                    correlation_id = %state.correlation_id,
                    step_id = %step.id,
                    state = StepState::Failed.as_str(),
                    kind = kind.as_str(),
                    attempts,
                    error = %error,
                    "step failed after exhausting retries"
                );
                return failed_result(step, kind, &error, attempts, latency_ms);
            }

            let delay = policy.backoff_after(attempts);
            tracing::warn!(
                event_name = "coordinator.step.retrying",
                correlation_id = %state.correlation_id,
                step_id = %step.id,
                state = StepState::Retrying.as_str(),
                kind = kind.as_str(),
                attempt = attempts,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying step after failure"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn emit_step_outcome(&self, caller: &CallerContext, result: &StepResult) {
        let outcome = if result.success() { AuditOutcome::Success } else { AuditOutcome::Failed };
        let state = result.outcome.final_state();
        let status = match result.outcome {
            StepOutcome::Succeeded => state.as_str(),
            StepOutcome::Failed(kind) => kind.as_str(),
        };
        self.audit.emit(
            AuditEvent::new(
                caller.correlation_id.clone(),
                "coordinator.step_outcome",
                AuditCategory::Execution,
                "tool-coordinator",
                outcome,
            )
            .with_metadata("step_id", result.step_id.to_string())
            .with_metadata("state", state.as_str())
            .with_metadata("status", status)
            .with_metadata("attempts", result.attempts.to_string())
            .with_metadata("latency_ms", result.latency_ms.to_string()),
        );
    }
}

fn step_parameters(step: &ExecutionStep, upstream: Map<String, Value>) -> Value {
    let mut parameters: Map<String, Value> =
        step.parameters.iter().map(|(key, value)| (key.clone(), value.clone())).collect();
    if !step.dependencies.is_empty() {
        parameters.insert("upstream".to_string(), Value::Object(upstream));
    }
    Value::Object(parameters)
}

fn failed_result(
    step: &ExecutionStep,
    kind: FailureKind,
    error: &str,
    attempts: u32,
    latency_ms: u64,
) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        outcome: StepOutcome::Failed(kind),
        output: None,
        error: Some(error.to_string()),
        attempts,
        latency_ms,
        optional: step.optional,
    }
}
