//! End-to-end answer pipeline.
//!
//! classify → plan → validate (advisory) → guardrails → coordinate → compose →
//! ground. Each stage absorbs the failure of the one before it; the only terminal
//! failure is pipeline exhaustion, which yields the emergency response.

use std::sync::Arc;
use std::time::Duration;

use concierge_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use concierge_core::config::AppConfig;
use concierge_core::domain::execution::{CoordinatedResult, PlanStatus};
use concierge_core::domain::grounding::{EvidenceDocument, ResponseQualityAssessment};
use concierge_core::domain::intent::ParsedIntent;
use concierge_core::domain::plan::{ExecutionPlan, StepId};
use concierge_core::grounding::{FallbackResponder, GroundingValidator};
use concierge_core::planner::{
    ExecutionPlanner, PlanConstraints, PlanPolicy, PlanValidator, PlanningContext,
    GROUNDING_STEP_ID,
};
use serde::Serialize;

use crate::composer::{LlmResponseComposer, ResponseComposer};
use crate::coordinator::{CallerContext, ToolCoordinator};
use crate::guardrails::GuardrailPolicy;
use crate::intent::{ConversationContext, IntentClassifier};
use crate::llm::LlmClient;
use crate::tools::{evidence_from_output, merge_evidence, ToolInvoker};

/// Per-turn caller facts.
#[derive(Clone, Debug, Default)]
pub struct QueryContext {
    pub correlation_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub history: Vec<String>,
    /// Replaces the coordinator deadline derived from the plan.
    pub deadline: Option<Duration>,
}

impl QueryContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), ..Self::default() }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub correlation_id: String,
    pub text: String,
    pub citations: Vec<String>,
    pub confidence: f64,
    pub intent: ParsedIntent,
    pub plan_status: PlanStatus,
    pub failed_steps: Vec<StepId>,
    /// The primary plan was replaced by a fallback plan.
    pub used_fallback_plan: bool,
    /// Set when the text came from the fallback responder.
    pub fallback_reason: Option<String>,
    pub guardrail: Option<String>,
    pub emergency: bool,
    pub assessment: Option<ResponseQualityAssessment>,
}

pub struct AgentRuntime {
    classifier: IntentClassifier,
    planner: ExecutionPlanner,
    plan_policy: Arc<dyn PlanPolicy>,
    constraints: PlanConstraints,
    abort_on_violation: bool,
    guardrails: GuardrailPolicy,
    coordinator: ToolCoordinator,
    composer: Arc<dyn ResponseComposer>,
    grounding: GroundingValidator,
    fallback: FallbackResponder,
    audit: Arc<dyn AuditSink>,
}

struct Execution {
    plan_status: PlanStatus,
    failed_steps: Vec<StepId>,
    evidence: Vec<EvidenceDocument>,
    used_fallback_plan: bool,
}

impl AgentRuntime {
    pub fn new(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolInvoker>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let llm_timeout = Duration::from_secs(config.llm.timeout_secs);
        Self {
            classifier: IntentClassifier::new(
                llm.clone(),
                tools.clone(),
                config.classifier.clone(),
                llm_timeout,
            ),
            planner: ExecutionPlanner::new(config.planner.clone()),
            plan_policy: Arc::new(PlanValidator),
            constraints: PlanConstraints::from(&config.planner),
            abort_on_violation: config.planner.abort_on_violation,
            guardrails: GuardrailPolicy::from(&config.guardrails),
            coordinator: ToolCoordinator::new(tools, config.coordinator.clone())
                .with_audit(audit.clone()),
            composer: Arc::new(LlmResponseComposer::new(llm, llm_timeout)),
            grounding: GroundingValidator::new(config.grounding.clone()),
            fallback: FallbackResponder::from_config(&config.grounding),
            audit,
        }
    }

    pub fn with_composer(mut self, composer: Arc<dyn ResponseComposer>) -> Self {
        self.composer = composer;
        self
    }

    pub async fn handle_query(&self, query: &str, context: &QueryContext) -> AgentResponse {
        let correlation_id = context.correlation_id.as_str();
        tracing::info!(
            event_name = "pipeline.query.received",
            correlation_id,
            query_chars = query.chars().count(),
            "query received"
        );
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "pipeline.query_received",
                AuditCategory::Ingress,
                "agent-runtime",
                AuditOutcome::Success,
            )
            .with_metadata("query_chars", query.chars().count().to_string()),
        );

        let conversation = ConversationContext { history: context.history.clone() };
        let intent = self.classifier.parse_intent(query, &conversation).await;

        let planning = PlanningContext {
            query: query.to_string(),
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            require_grounding: None,
        };
        let mut plan = self.planner.generate_execution_plan(&intent, &planning);
        let mut used_fallback_plan = false;

        let validation = self.plan_policy.validate(&plan, &self.constraints);
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "pipeline.plan_validated",
                AuditCategory::Planning,
                "plan-validator",
                if validation.valid { AuditOutcome::Success } else { AuditOutcome::Rejected },
            )
            .with_metadata("steps", plan.steps.len().to_string())
            .with_metadata("violations", validation.codes().join(",")),
        );
        if !validation.valid {
            tracing::warn!(
                event_name = "pipeline.plan.violations",
                correlation_id,
                violations = ?validation.codes(),
                abort = self.abort_on_violation,
                "plan validation reported violations"
            );
            if self.abort_on_violation {
                plan = self.fallback_for(&plan, &planning);
                used_fallback_plan = true;
            }
        }

        let decision = self.guardrails.evaluate(&intent, &plan);
        let guardrail = decision.reason_code().map(str::to_string);
        let notice = decision.user_message().map(str::to_string);
        if !decision.is_allowed() {
            tracing::warn!(
                event_name = "pipeline.guardrail.applied",
                correlation_id,
                reason_code = decision.reason_code().unwrap_or_default(),
                "guardrail replaced the plan with retrieval only"
            );
            plan = self.planner.fallback_plan(&planning);
            used_fallback_plan = true;
        }

        let caller = CallerContext { correlation_id: correlation_id.to_string(), deadline: context.deadline };
        let Some(execution) = self.execute(plan, &planning, &caller, used_fallback_plan).await else {
            return self.emergency(correlation_id, intent, guardrail);
        };

        let (text, fallback_reason, assessment) =
            match self.composer.compose(query, &intent, &execution.evidence).await {
                Ok(text) => {
                    let assessment = self.grounding.validate_response_grounding(&text, &execution.evidence, query);
                    self.emit_grounding_verdict(correlation_id, &assessment);
                    if assessment.fallback_recommended {
                        let reason = assessment.fallback_reasons.join("; ");
                        (None, Some(reason), Some(assessment))
                    } else {
                        (Some(text), None, Some(assessment))
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "pipeline.compose.failed",
                        correlation_id,
                        error = %error,
                        "response composition failed; using fallback responder"
                    );
                    (None, Some("response composition failed".to_string()), None)
                }
            };

        let (text, citations, confidence) = match (text, &fallback_reason, &assessment) {
            (Some(text), _, Some(assessment)) => {
                (text, assessment.grounding.citations.clone(), assessment.quality.overall)
            }
            (_, reason, _) => {
                let reason = reason.as_deref().unwrap_or("answer could not be verified");
                let fallback = self.fallback.create_fallback_response(query, &execution.evidence, reason);
                (fallback.text, fallback.citations, fallback.confidence)
            }
        };

        AgentResponse {
            correlation_id: correlation_id.to_string(),
            text: with_notice(notice.as_deref(), text),
            citations,
            confidence,
            intent,
            plan_status: execution.plan_status,
            failed_steps: execution.failed_steps,
            used_fallback_plan: execution.used_fallback_plan,
            fallback_reason,
            guardrail,
            emergency: false,
            assessment,
        }
    }

    /// Runs `plan`, then its fallback when it fails outright. `None` means both failed.
    async fn execute(
        &self,
        plan: ExecutionPlan,
        planning: &PlanningContext,
        caller: &CallerContext,
        already_fallback: bool,
    ) -> Option<Execution> {
        let result = self.coordinator.execute_coordinated_plan(&plan, caller).await;
        if result.status != PlanStatus::Failed {
            return Some(Execution::from_result(&result, already_fallback));
        }
        if already_fallback {
            return None;
        }

        tracing::warn!(
            event_name = "pipeline.plan.fallback",
            correlation_id = %caller.correlation_id,
            failed_steps = result.failed_steps.len(),
            "primary plan failed; running fallback plan"
        );
        let fallback = self.fallback_for(&plan, planning);
        let result = self.coordinator.execute_coordinated_plan(&fallback, caller).await;
        (result.status != PlanStatus::Failed).then(|| Execution::from_result(&result, true))
    }

    fn fallback_for(&self, plan: &ExecutionPlan, planning: &PlanningContext) -> ExecutionPlan {
        match &plan.fallback_plan {
            Some(fallback) => fallback.as_ref().clone(),
            None => self.planner.fallback_plan(planning),
        }
    }

    fn emergency(&self, correlation_id: &str, intent: ParsedIntent, guardrail: Option<String>) -> AgentResponse {
        let reason = "pipeline exhausted: primary and fallback plans failed";
        tracing::error!(event_name = "pipeline.emergency_fallback", correlation_id, "{reason}");
        self.audit.emit(AuditEvent::new(
            correlation_id,
            "pipeline.emergency_fallback",
            AuditCategory::System,
            "agent-runtime",
            AuditOutcome::Failed,
        ));

        let response = self.fallback.emergency_response(reason);
        AgentResponse {
            correlation_id: correlation_id.to_string(),
            text: response.text,
            citations: response.citations,
            confidence: response.confidence,
            intent,
            plan_status: PlanStatus::Failed,
            failed_steps: Vec::new(),
            used_fallback_plan: true,
            fallback_reason: Some(response.reason),
            guardrail,
            emergency: true,
            assessment: None,
        }
    }

    fn emit_grounding_verdict(&self, correlation_id: &str, assessment: &ResponseQualityAssessment) {
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "pipeline.grounding_verdict",
                AuditCategory::Grounding,
                "grounding-validator",
                if assessment.fallback_recommended { AuditOutcome::Rejected } else { AuditOutcome::Success },
            )
            .with_metadata("grounding_score", format!("{:.3}", assessment.grounding.grounding_score))
            .with_metadata("is_grounded", assessment.grounding.is_grounded.to_string())
            .with_metadata("hallucination", assessment.grounding.hallucination.detected.to_string())
            .with_metadata("overall_quality", format!("{:.3}", assessment.quality.overall)),
        );
    }
}

impl Execution {
    fn from_result(result: &CoordinatedResult, used_fallback_plan: bool) -> Self {
        let checkpoint = result
            .steps
            .iter()
            .find(|step| step.success() && step.step_id.as_str() == GROUNDING_STEP_ID)
            .and_then(|step| step.output.as_ref())
            .map(|output| evidence_from_output(GROUNDING_STEP_ID, output))
            .filter(|documents| !documents.is_empty());

        let evidence = checkpoint.unwrap_or_else(|| {
            merge_evidence(result.outputs().map(|(id, output)| evidence_from_output(id.as_str(), output)))
        });

        Self {
            plan_status: result.status,
            failed_steps: result.failed_steps.clone(),
            evidence,
            used_fallback_plan,
        }
    }
}

fn with_notice(notice: Option<&str>, text: String) -> String {
    match notice {
        Some(notice) => format!("{notice}\n\n{text}"),
        None => text,
    }
}
