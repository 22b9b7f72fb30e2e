use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::domain::plan::{ExecutionPlan, StepType};
use crate::planner::graph::PlanGraph;
use crate::planner::tool_profile;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanConstraints {
    pub max_latency_ms: u64,
    pub max_cost: f64,
    pub require_grounding: bool,
}

impl From<&PlannerConfig> for PlanConstraints {
    fn from(config: &PlannerConfig) -> Self {
        Self {
            max_latency_ms: config.max_latency_ms,
            max_cost: config.max_cost,
            require_grounding: config.require_grounding,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanViolation {
    pub code: String,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanValidationResult {
    pub valid: bool,
    pub violations: Vec<PlanViolation>,
    pub suggestions: Vec<String>,
}

impl Default for PlanValidationResult {
    fn default() -> Self {
        Self { valid: true, violations: Vec::new(), suggestions: Vec::new() }
    }
}

impl PlanValidationResult {
    fn push(&mut self, code: &str, message: String, suggestion: &str) {
        self.violations.push(PlanViolation {
            code: code.to_string(),
            message,
            suggestion: Some(suggestion.to_string()),
        });
        if !self.suggestions.iter().any(|existing| existing == suggestion) {
            self.suggestions.push(suggestion.to_string());
        }
        self.valid = false;
    }

    pub fn codes(&self) -> Vec<&str> {
        self.violations.iter().map(|violation| violation.code.as_str()).collect()
    }
}

/// Advisory checks over a plan. Never mutates or executes it.
pub trait PlanPolicy: Send + Sync {
    fn validate(&self, plan: &ExecutionPlan, constraints: &PlanConstraints) -> PlanValidationResult;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlanValidator;

impl PlanPolicy for PlanValidator {
    fn validate(&self, plan: &ExecutionPlan, constraints: &PlanConstraints) -> PlanValidationResult {
        validate_plan(plan, constraints)
    }
}

pub fn validate_plan(plan: &ExecutionPlan, constraints: &PlanConstraints) -> PlanValidationResult {
    let mut result = PlanValidationResult::default();

    let latency_ms = match PlanGraph::build(plan) {
        Ok(graph) => {
            graph.critical_path(|index| {
                plan.step(index).map(|step| tool_profile(&step.tool).latency_ms).unwrap_or(0)
            })
        }
        Err(error) => {
            result.push(
                error.code(),
                error.to_string(),
                "declare every dependency earlier in the plan with a unique step id",
            );
            plan.steps.iter().map(|step| tool_profile(&step.tool).latency_ms).sum()
        }
    };

    if latency_ms > constraints.max_latency_ms {
        result.push(
            "LATENCY_BUDGET_EXCEEDED",
            format!(
                "critical path latency {latency_ms}ms exceeds budget of {}ms",
                constraints.max_latency_ms
            ),
            "reduce step count or run independent steps in parallel",
        );
    }

    let cost: f64 = plan.steps.iter().map(|step| tool_profile(&step.tool).cost).sum();
    if cost > constraints.max_cost {
        result.push(
            "COST_BUDGET_EXCEEDED",
            format!("estimated cost {cost:.4} exceeds budget of {:.4}", constraints.max_cost),
            "reduce step count or prefer cheaper tools",
        );
    }

    if constraints.require_grounding && !plan.has_step_type(StepType::Grounding) {
        result.push(
            "GROUNDING_STEP_MISSING",
            "grounding is required but the plan has no grounding step".to_string(),
            "add grounding step",
        );
    }

    result
}

/// True iff every step's dependencies all run in strictly earlier waves.
pub fn can_parallelize(plan: &ExecutionPlan) -> bool {
    PlanGraph::build(plan).map(|graph| graph.waves_are_ordered()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::{can_parallelize, validate_plan, PlanConstraints};
    use crate::domain::plan::{ExecutionPlan, ExecutionStep, StepId, StepType, ToolId};

    fn plan(steps: Vec<ExecutionStep>) -> ExecutionPlan {
        ExecutionPlan { steps, parallelizable: false, estimated_latency_ms: 0, fallback_plan: None }
    }

    fn relaxed() -> PlanConstraints {
        PlanConstraints { max_latency_ms: 10_000, max_cost: 1.0, require_grounding: false }
    }

    fn retrieval(id: &str) -> ExecutionStep {
        ExecutionStep::new(id, StepType::Retrieval, ToolId::semantic_retrieval())
    }

    #[test]
    fn clean_plan_is_valid_with_empty_lists() {
        let result = validate_plan(&plan(vec![retrieval("retrieve")]), &relaxed());
        assert!(result.valid);
        assert!(result.violations.is_empty());
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn critical_path_over_budget_is_reported_with_suggestion() {
        let checkout = ExecutionStep::new("checkout", StepType::Checkout, ToolId::process_checkout())
            .with_dependencies([StepId::new("retrieve")])
            .with_priority(1);
        let constraints = PlanConstraints { max_latency_ms: 500, ..relaxed() };

        let result = validate_plan(&plan(vec![retrieval("retrieve"), checkout]), &constraints);

        assert!(!result.valid);
        assert_eq!(result.codes(), vec!["LATENCY_BUDGET_EXCEEDED"]);
        assert!(!result.suggestions.is_empty());
    }

    #[test]
    fn independent_steps_only_count_the_slowest_branch() {
        let constraints = PlanConstraints { max_latency_ms: 350, ..relaxed() };
        let result = validate_plan(&plan(vec![retrieval("a"), retrieval("b")]), &constraints);
        assert!(result.valid, "parallel retrievals should fit: {:?}", result.violations);
    }

    #[test]
    fn missing_grounding_and_cost_overrun_are_both_reported() {
        let constraints =
            PlanConstraints { max_latency_ms: 10_000, max_cost: 0.001, require_grounding: true };
        let result = validate_plan(&plan(vec![retrieval("a"), retrieval("b")]), &constraints);

        assert_eq!(result.codes(), vec!["COST_BUDGET_EXCEEDED", "GROUNDING_STEP_MISSING"]);
        assert!(result.suggestions.iter().any(|suggestion| suggestion == "add grounding step"));
    }

    #[test]
    fn structural_problems_surface_as_violations() {
        let broken = plan(vec![retrieval("a").with_dependencies([StepId::new("missing")])]);
        let result = validate_plan(&broken, &relaxed());
        assert_eq!(result.codes(), vec!["UNKNOWN_DEPENDENCY"]);
    }

    #[test]
    fn two_independent_chains_can_parallelize() {
        let chains = plan(vec![
            retrieval("a1").with_priority(0),
            retrieval("b1").with_priority(0),
            retrieval("a2").with_dependencies([StepId::new("a1")]).with_priority(1),
            retrieval("b2").with_dependencies([StepId::new("b1")]).with_priority(1),
        ]);
        assert!(can_parallelize(&chains));
    }

    #[test]
    fn dependency_in_the_same_wave_cannot_parallelize() {
        let same_wave = plan(vec![
            retrieval("a").with_priority(0),
            retrieval("b").with_dependencies([StepId::new("a")]).with_priority(0),
        ]);
        assert!(!can_parallelize(&same_wave));
    }
}
