use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PlanStructureError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a step inside its plan. Only meaningful for the plan it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepIndex(pub usize);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolId(pub String);

impl ToolId {
    pub const SEMANTIC_RETRIEVAL: &'static str = "semanticRetrieval";
    pub const PRODUCT_PREDICTION: &'static str = "productPrediction";
    pub const PROCESS_CHECKOUT: &'static str = "processCheckout";
    pub const CART_VALIDATION: &'static str = "cartValidation";
    pub const KNOWLEDGE_CONTEXT: &'static str = "knowledgeContext";
    pub const GROUNDING: &'static str = "grounding";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn semantic_retrieval() -> Self {
        Self::new(Self::SEMANTIC_RETRIEVAL)
    }

    pub fn product_prediction() -> Self {
        Self::new(Self::PRODUCT_PREDICTION)
    }

    pub fn process_checkout() -> Self {
        Self::new(Self::PROCESS_CHECKOUT)
    }

    pub fn cart_validation() -> Self {
        Self::new(Self::CART_VALIDATION)
    }

    pub fn knowledge_context() -> Self {
        Self::new(Self::KNOWLEDGE_CONTEXT)
    }

    pub fn grounding() -> Self {
        Self::new(Self::GROUNDING)
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Retrieval,
    Prediction,
    Grounding,
    Checkout,
    Validation,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Prediction => "prediction",
            Self::Grounding => "grounding",
            Self::Checkout => "checkout",
            Self::Validation => "validation",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_retries: 0, backoff_base_ms: 0 }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following `attempt_number` (1-based).
    pub fn backoff_after(&self, attempt_number: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(u64::from(attempt_number)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, backoff_base_ms: 100 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: StepId,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub tool: ToolId,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Concurrency wave. Waves run in ascending order.
    pub priority: u32,
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub optional: bool,
}

impl ExecutionStep {
    pub fn new(id: impl Into<String>, step_type: StepType, tool: ToolId) -> Self {
        Self {
            id: StepId::new(id),
            step_type,
            tool,
            parameters: BTreeMap::new(),
            priority: 0,
            dependencies: Vec::new(),
            timeout_ms: 5_000,
            retry_policy: RetryPolicy::default(),
            optional: false,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = StepId>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub steps: Vec<ExecutionStep>,
    pub parallelizable: bool,
    pub estimated_latency_ms: u64,
    #[serde(default)]
    pub fallback_plan: Option<Box<ExecutionPlan>>,
}

impl ExecutionPlan {
    pub fn step(&self, index: StepIndex) -> Option<&ExecutionStep> {
        self.steps.get(index.0)
    }

    pub fn index_of(&self, id: &StepId) -> Option<StepIndex> {
        self.steps.iter().position(|step| &step.id == id).map(StepIndex)
    }

    pub fn step_ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|step| step.id.clone()).collect()
    }

    pub fn has_step_type(&self, step_type: StepType) -> bool {
        self.steps.iter().any(|step| step.step_type == step_type)
    }

    pub fn estimated_latency(&self) -> Duration {
        Duration::from_millis(self.estimated_latency_ms)
    }

    /// Checks id uniqueness and that every dependency names a step declared earlier.
    /// A reference to a later step is a cycle when that step reaches back to the
    /// referencing one, and a forward reference otherwise.
    pub fn validate_structure(&self) -> Result<(), PlanStructureError> {
        let mut seen: HashSet<&StepId> = HashSet::new();
        let all_ids: HashSet<&StepId> = self.steps.iter().map(|step| &step.id).collect();

        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(PlanStructureError::DuplicateStepId(step.id.clone()));
            }
            for dependency in &step.dependencies {
                if dependency == &step.id {
                    return Err(PlanStructureError::SelfDependency(step.id.clone()));
                }
                if !all_ids.contains(dependency) {
                    return Err(PlanStructureError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                if !seen.contains(dependency) {
                    let (step, dependency) = (step.id.clone(), dependency.clone());
                    return Err(if self.reaches(&dependency, &step) {
                        PlanStructureError::Cycle { step, dependency }
                    } else {
                        PlanStructureError::ForwardReference { step, dependency }
                    });
                }
            }
        }

        Ok(())
    }

    fn reaches(&self, from: &StepId, target: &StepId) -> bool {
        let mut visited: HashSet<&StepId> = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(step) = self.steps.iter().find(|step| &step.id == current) {
                stack.extend(step.dependencies.iter());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{ExecutionPlan, ExecutionStep, RetryPolicy, StepId, StepType, ToolId};
    use crate::errors::PlanStructureError;

    fn plan(steps: Vec<ExecutionStep>) -> ExecutionPlan {
        ExecutionPlan { steps, parallelizable: false, estimated_latency_ms: 0, fallback_plan: None }
    }

    #[test]
    fn retry_policy_backoff_grows_linearly_with_attempt_number() {
        let policy = RetryPolicy { max_retries: 2, backoff_base_ms: 50 };
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff_after(1), Duration::from_millis(50));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(100));
    }

    #[test]
    fn execution_plan_survives_json_round_trip() {
        let retrieve = ExecutionStep::new("retrieve", StepType::Retrieval, ToolId::semantic_retrieval())
            .with_parameter("query", "usb-c hub")
            .with_parameter("top_k", 10)
            .with_timeout_ms(2_500);
        let predict =
            ExecutionStep::new("predict", StepType::Prediction, ToolId::product_prediction())
                .with_dependencies([StepId::new("retrieve")])
                .with_priority(1)
                .with_parameter("signals", json!({"recent_views": ["sku-1"]}))
                .optional();
        let original = ExecutionPlan {
            steps: vec![retrieve.clone(), predict],
            parallelizable: true,
            estimated_latency_ms: 450,
            fallback_plan: Some(Box::new(plan(vec![retrieve]))),
        };

        let encoded = serde_json::to_string(&original).expect("serialize plan");
        let decoded: ExecutionPlan = serde_json::from_str(&encoded).expect("deserialize plan");

        assert_eq!(decoded, original);
    }

    #[test]
    fn structure_check_rejects_duplicates_unknown_and_forward_references() {
        let a = ExecutionStep::new("a", StepType::Retrieval, ToolId::semantic_retrieval());

        let duplicate = plan(vec![a.clone(), a.clone()]);
        assert_eq!(
            duplicate.validate_structure(),
            Err(PlanStructureError::DuplicateStepId(StepId::new("a")))
        );

        let unknown = plan(vec![a.clone().with_dependencies([StepId::new("ghost")])]);
        assert!(matches!(
            unknown.validate_structure(),
            Err(PlanStructureError::UnknownDependency { .. })
        ));

        let forward = plan(vec![
            a.clone().with_dependencies([StepId::new("b")]),
            ExecutionStep::new("b", StepType::Prediction, ToolId::product_prediction())
                .with_dependencies([StepId::new("a")]),
        ]);
        assert!(matches!(forward.validate_structure(), Err(PlanStructureError::Cycle { .. })));

        let misordered = plan(vec![
            a.clone().with_dependencies([StepId::new("b")]),
            ExecutionStep::new("b", StepType::Prediction, ToolId::product_prediction()),
        ]);
        assert_eq!(
            misordered.validate_structure(),
            Err(PlanStructureError::ForwardReference { step: StepId::new("a"), dependency: StepId::new("b") })
        );

        let self_loop = plan(vec![a.with_dependencies([StepId::new("a")])]);
        assert!(matches!(
            self_loop.validate_structure(),
            Err(PlanStructureError::SelfDependency(_))
        ));
    }
}
