use concierge_core::config::GuardrailConfig;
use concierge_core::domain::intent::{IntentKind, ParsedIntent};
use concierge_core::domain::plan::{ExecutionPlan, StepType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
    Degrade { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(reason_code),
        }
    }

    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { user_message, .. } | Self::Degrade { user_message, .. } => {
                Some(user_message)
            }
        }
    }
}

/// Side-effecting steps need an explicit policy go-ahead before they run.
#[derive(Clone, Debug, PartialEq)]
pub struct GuardrailPolicy {
    pub checkout_enabled: bool,
    pub min_checkout_confidence: f64,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self::from(&GuardrailConfig::default())
    }
}

impl From<&GuardrailConfig> for GuardrailPolicy {
    fn from(config: &GuardrailConfig) -> Self {
        Self {
            checkout_enabled: config.checkout_enabled,
            min_checkout_confidence: config.min_checkout_confidence,
        }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, intent: &ParsedIntent, plan: &ExecutionPlan) -> GuardrailDecision {
        if !plan.has_step_type(StepType::Checkout) {
            return GuardrailDecision::Allow;
        }

        if !self.checkout_enabled {
            return GuardrailDecision::Deny {
                reason_code: "checkout_disabled",
                user_message:
                    "Checkout is not available from this assistant right now. Here is what I found instead."
                        .to_string(),
            };
        }

        if intent.intent != IntentKind::Purchase || intent.confidence < self.min_checkout_confidence {
            return GuardrailDecision::Degrade {
                reason_code: "checkout_confidence_low",
                user_message:
                    "I was not confident enough that you want to buy, so I did not start checkout."
                        .to_string(),
            };
        }

        GuardrailDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::config::PlannerConfig;
    use concierge_core::domain::intent::{IntentKind, ParsedIntent};
    use concierge_core::planner::{ExecutionPlanner, PlanningContext};

    use super::{GuardrailDecision, GuardrailPolicy};

    fn purchase(confidence: f64) -> ParsedIntent {
        ParsedIntent::new(IntentKind::Purchase, confidence)
    }

    fn plan_for(intent: &ParsedIntent) -> concierge_core::domain::plan::ExecutionPlan {
        ExecutionPlanner::new(PlannerConfig::default())
            .generate_execution_plan(intent, &PlanningContext::for_query("buy it"))
    }

    #[test]
    fn confident_purchase_is_allowed() {
        let intent = purchase(0.95);
        let decision = GuardrailPolicy::default().evaluate(&intent, &plan_for(&intent));
        assert_eq!(decision, GuardrailDecision::Allow);
    }

    #[test]
    fn disabled_checkout_is_denied() {
        let intent = purchase(0.95);
        let policy = GuardrailPolicy { checkout_enabled: false, ..GuardrailPolicy::default() };

        let decision = policy.evaluate(&intent, &plan_for(&intent));

        assert_eq!(decision.reason_code(), Some("checkout_disabled"));
        assert!(matches!(decision, GuardrailDecision::Deny { reason_code: "checkout_disabled", .. }));
    }

    #[test]
    fn hesitant_purchase_is_degraded() {
        let intent = purchase(0.65);
        let decision = GuardrailPolicy::default().evaluate(&intent, &plan_for(&intent));

        assert!(matches!(decision, GuardrailDecision::Degrade { .. }));
        assert!(decision.user_message().unwrap_or_default().contains("did not start checkout"));
    }

    #[test]
    fn plans_without_checkout_pass_regardless_of_policy() {
        let intent = ParsedIntent::new(IntentKind::Search, 0.2);
        let policy = GuardrailPolicy { checkout_enabled: false, min_checkout_confidence: 1.0 };
        assert!(policy.evaluate(&intent, &plan_for(&intent)).is_allowed());
    }
}
