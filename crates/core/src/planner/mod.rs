//! Intent-to-plan templating.
//!
//! [`ExecutionPlanner`] maps each [`IntentKind`] onto a fixed step template, assigns
//! every step a concurrency wave equal to its dependency depth, and attaches a
//! retrieval-only fallback plan when the intent is not trustworthy enough.

pub mod graph;
pub mod validator;

use serde_json::{json, Map, Value};

use crate::config::PlannerConfig;
use crate::domain::intent::{IntentKind, ParsedIntent};
use crate::domain::plan::{ExecutionPlan, ExecutionStep, RetryPolicy, StepId, StepType, ToolId};

pub use graph::PlanGraph;
pub use validator::{
    can_parallelize, validate_plan, PlanConstraints, PlanPolicy, PlanValidationResult,
    PlanValidator, PlanViolation,
};

/// Nominal latency and cost of one call to a tool.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolProfile {
    pub latency_ms: u64,
    pub cost: f64,
}

const UNKNOWN_TOOL_PROFILE: ToolProfile = ToolProfile { latency_ms: 500, cost: 0.005 };

pub fn tool_profile(tool: &ToolId) -> ToolProfile {
    match tool.as_str() {
        ToolId::SEMANTIC_RETRIEVAL => ToolProfile { latency_ms: 300, cost: 0.002 },
        ToolId::PRODUCT_PREDICTION => ToolProfile { latency_ms: 150, cost: 0.001 },
        ToolId::CART_VALIDATION => ToolProfile { latency_ms: 100, cost: 0.0005 },
        ToolId::PROCESS_CHECKOUT => ToolProfile { latency_ms: 800, cost: 0.01 },
        ToolId::KNOWLEDGE_CONTEXT => ToolProfile { latency_ms: 400, cost: 0.003 },
        ToolId::GROUNDING => ToolProfile { latency_ms: 200, cost: 0.002 },
        _ => UNKNOWN_TOOL_PROFILE,
    }
}

pub const GROUNDING_STEP_ID: &str = "ground_response";
pub const FALLBACK_STEP_ID: &str = "fallback_retrieval";

const FALLBACK_MIN_RELEVANCE: f64 = 0.3;
const FALLBACK_TIMEOUT_MS: u64 = 2_000;
const PRIMARY_MIN_RELEVANCE: f64 = 0.7;

/// Caller-side facts the planner needs beyond the intent itself.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanningContext {
    pub query: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Overrides `planner.require_grounding` for this turn.
    pub require_grounding: Option<bool>,
}

impl PlanningContext {
    pub fn for_query(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionPlanner {
    config: PlannerConfig,
}

impl ExecutionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn generate_execution_plan(
        &self,
        intent: &ParsedIntent,
        context: &PlanningContext,
    ) -> ExecutionPlan {
        let mut steps = match intent.intent {
            IntentKind::Search => vec![self.retrieval_step("retrieve_products", intent, context)],
            IntentKind::Recommend => self.recommend_steps(intent, context),
            IntentKind::Purchase => self.purchase_steps(intent, context),
            IntentKind::Compare => self.compare_steps(intent, context),
            IntentKind::Question => vec![
                self.knowledge_step(context),
                self.retrieval_step("retrieve_documents", intent, context),
            ],
            IntentKind::Support => vec![self.knowledge_step(context)],
        };

        let require_grounding = context.require_grounding.unwrap_or(self.config.require_grounding);
        if require_grounding {
            let dependencies: Vec<StepId> = steps.iter().map(|step| step.id.clone()).collect();
            steps.push(
                ExecutionStep::new(GROUNDING_STEP_ID, StepType::Grounding, ToolId::grounding())
                    .with_parameter("query", context.query.clone())
                    .with_dependencies(dependencies)
                    .with_timeout_ms(2_000)
                    .with_retry_policy(RetryPolicy::none()),
            );
        }

        assign_waves(&mut steps);
        let mut plan = assemble(steps);

        if intent.confidence < self.config.fallback_confidence_threshold {
            plan.fallback_plan = Some(Box::new(self.fallback_plan(context)));
        }

        tracing::debug!(
            event_name = "planner.plan.generated",
            intent = intent.intent.as_str(),
            confidence = intent.confidence,
            steps = plan.steps.len(),
            estimated_latency_ms = plan.estimated_latency_ms,
            parallelizable = plan.parallelizable,
            has_fallback = plan.fallback_plan.is_some(),
            "execution plan generated"
        );

        plan
    }

    /// Single low-threshold retrieval with a short timeout and no retries.
    pub fn fallback_plan(&self, context: &PlanningContext) -> ExecutionPlan {
        let step = ExecutionStep::new(FALLBACK_STEP_ID, StepType::Retrieval, ToolId::semantic_retrieval())
            .with_parameter("query", context.query.clone())
            .with_parameter("top_k", self.config.retrieval_top_k)
            .with_parameter("min_relevance", FALLBACK_MIN_RELEVANCE)
            .with_timeout_ms(FALLBACK_TIMEOUT_MS)
            .with_retry_policy(RetryPolicy::none());
        assemble(vec![step])
    }

    fn default_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.default_max_retries,
            backoff_base_ms: self.config.backoff_base_ms,
        }
    }

    fn retrieval_step(
        &self,
        id: &str,
        intent: &ParsedIntent,
        context: &PlanningContext,
    ) -> ExecutionStep {
        let mut step = ExecutionStep::new(id, StepType::Retrieval, ToolId::semantic_retrieval())
            .with_parameter("query", context.query.clone())
            .with_parameter("top_k", self.config.retrieval_top_k)
            .with_parameter("min_relevance", PRIMARY_MIN_RELEVANCE)
            .with_timeout_ms(3_000)
            .with_retry_policy(self.default_retry());

        let filters = entity_filters(intent);
        if !filters.is_empty() {
            step = step.with_parameter("filters", Value::Object(filters));
        }
        step
    }

    fn knowledge_step(&self, context: &PlanningContext) -> ExecutionStep {
        ExecutionStep::new("knowledge_context", StepType::Retrieval, ToolId::knowledge_context())
            .with_parameter("query", context.query.clone())
            .with_timeout_ms(3_000)
            .with_retry_policy(self.default_retry())
    }

    fn recommend_steps(&self, intent: &ParsedIntent, context: &PlanningContext) -> Vec<ExecutionStep> {
        let retrieve = self.retrieval_step("retrieve_candidates", intent, context);
        let predict =
            ExecutionStep::new("predict_preferences", StepType::Prediction, ToolId::product_prediction())
                .with_parameter("user_id", optional_string(&context.user_id))
                .with_parameter("products", json!(intent.entities.products))
                .with_dependencies([retrieve.id.clone()])
                .with_timeout_ms(2_000)
                .with_retry_policy(self.default_retry());
        vec![retrieve, predict]
    }

    fn purchase_steps(&self, intent: &ParsedIntent, context: &PlanningContext) -> Vec<ExecutionStep> {
        let validate = ExecutionStep::new("validate_cart", StepType::Validation, ToolId::cart_validation())
            .with_parameter("user_id", optional_string(&context.user_id))
            .with_parameter("products", json!(intent.entities.products))
            .with_parameter("quantity", intent.entities.quantity.unwrap_or(1))
            .with_timeout_ms(2_000)
            .with_retry_policy(self.default_retry());
        let checkout = ExecutionStep::new("process_checkout", StepType::Checkout, ToolId::process_checkout())
            .with_parameter("user_id", optional_string(&context.user_id))
            .with_parameter("session_id", optional_string(&context.session_id))
            .with_dependencies([validate.id.clone()])
            .with_timeout_ms(10_000)
            .with_retry_policy(RetryPolicy::none());
        vec![validate, checkout]
    }

    fn compare_steps(&self, intent: &ParsedIntent, context: &PlanningContext) -> Vec<ExecutionStep> {
        if intent.entities.products.is_empty() {
            return vec![self.retrieval_step("retrieve_products", intent, context)];
        }

        intent
            .entities
            .products
            .iter()
            .enumerate()
            .map(|(position, product)| {
                self.retrieval_step(&format!("retrieve_product_{}", position + 1), intent, context)
                    .with_parameter("query", product.clone())
                    .with_parameter("product", product.clone())
            })
            .collect()
    }
}

fn optional_string(value: &Option<String>) -> Value {
    value.as_ref().map(|value| Value::String(value.clone())).unwrap_or(Value::Null)
}

fn entity_filters(intent: &ParsedIntent) -> Map<String, Value> {
    let entities = &intent.entities;
    let mut filters = Map::new();
    if !entities.categories.is_empty() {
        filters.insert("categories".to_string(), json!(entities.categories));
    }
    if !entities.brands.is_empty() {
        filters.insert("brands".to_string(), json!(entities.brands));
    }
    if !entities.features.is_empty() {
        filters.insert("features".to_string(), json!(entities.features));
    }
    if let Some(range) = entities.price_range {
        filters.insert("price_range".to_string(), json!({"min": range.min, "max": range.max}));
    }
    filters
}

/// Steps arrive in dependency order, so one forward pass fixes every depth.
fn assign_waves(steps: &mut [ExecutionStep]) {
    let mut depths: Vec<(StepId, u32)> = Vec::with_capacity(steps.len());
    for step in steps.iter_mut() {
        let depth = step
            .dependencies
            .iter()
            .filter_map(|dependency| {
                depths.iter().find(|(id, _)| id == dependency).map(|(_, depth)| depth + 1)
            })
            .max()
            .unwrap_or(0);
        step.priority = depth;
        depths.push((step.id.clone(), depth));
    }
}

fn assemble(steps: Vec<ExecutionStep>) -> ExecutionPlan {
    let estimated_latency_ms = steps.iter().map(|step| tool_profile(&step.tool).latency_ms).sum();
    let mut plan = ExecutionPlan { steps, parallelizable: false, estimated_latency_ms, fallback_plan: None };
    plan.parallelizable = can_parallelize(&plan);
    plan
}
