use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Search,
    Recommend,
    Purchase,
    Question,
    Compare,
    Support,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Recommend => "recommend",
            Self::Purchase => "purchase",
            Self::Question => "question",
            Self::Compare => "compare",
            Self::Support => "support",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "search" => Some(Self::Search),
            "recommend" => Some(Self::Recommend),
            "purchase" => Some(Self::Purchase),
            "question" => Some(Self::Question),
            "compare" => Some(Self::Compare),
            "support" => Some(Self::Support),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    New,
    Returning,
    Premium,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Structured extraction from the query. Every field is optional on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntentEntities {
    pub products: Vec<String>,
    pub categories: Vec<String>,
    pub price_range: Option<PriceRange>,
    pub brands: Vec<String>,
    pub features: Vec<String>,
    pub quantity: Option<u32>,
}

impl IntentEntities {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
            && self.categories.is_empty()
            && self.price_range.is_none()
            && self.brands.is_empty()
            && self.features.is_empty()
            && self.quantity.is_none()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntentContext {
    pub urgency: Urgency,
    pub complexity: Complexity,
    pub user_type: UserType,
}

/// Classified, confidence-scored reading of a single query turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub intent: IntentKind,
    pub confidence: f64,
    #[serde(default)]
    pub entities: IntentEntities,
    #[serde(default)]
    pub context: IntentContext,
    #[serde(default)]
    pub reasoning: String,
}

impl ParsedIntent {
    pub const DEFAULT_CONFIDENCE: f64 = 0.3;

    pub fn new(intent: IntentKind, confidence: f64) -> Self {
        Self {
            intent,
            confidence: clamp_unit(confidence),
            entities: IntentEntities::default(),
            context: IntentContext::default(),
            reasoning: String::new(),
        }
    }

    /// The intent used when classifier output is unusable.
    pub fn default_question(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            ..Self::new(IntentKind::Question, Self::DEFAULT_CONFIDENCE)
        }
    }

    pub fn with_entities(mut self, entities: IntentEntities) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// Clamps a score into `[0, 1]`; NaN collapses to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{clamp_unit, IntentEntities, IntentKind, ParsedIntent, PriceRange, Urgency};

    #[test]
    fn intent_kind_round_trips_from_wire_encoding() {
        let cases = [
            IntentKind::Search,
            IntentKind::Recommend,
            IntentKind::Purchase,
            IntentKind::Question,
            IntentKind::Compare,
            IntentKind::Support,
        ];

        for kind in cases {
            assert_eq!(IntentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(IntentKind::parse("browse"), None);
    }

    #[test]
    fn parsed_intent_survives_json_round_trip() {
        let mut intent = ParsedIntent::new(IntentKind::Compare, 0.82)
            .with_entities(IntentEntities {
                products: vec!["Acme X200".to_string(), "Acme X300".to_string()],
                categories: vec!["laptops".to_string()],
                price_range: Some(PriceRange { min: Some(300.0), max: Some(900.5) }),
                brands: vec!["Acme".to_string()],
                features: vec!["16GB RAM".to_string()],
                quantity: Some(1),
            })
            .with_reasoning("two named products");
        intent.context.urgency = Urgency::High;

        let encoded = serde_json::to_string(&intent).expect("serialize intent");
        let decoded: ParsedIntent = serde_json::from_str(&encoded).expect("deserialize intent");

        assert_eq!(decoded, intent);
    }

    #[test]
    fn constructor_clamps_confidence() {
        assert_eq!(ParsedIntent::new(IntentKind::Search, 1.7).confidence, 1.0);
        assert_eq!(ParsedIntent::new(IntentKind::Search, -0.2).confidence, 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
    }

    #[test]
    fn default_question_intent_has_low_confidence() {
        let intent = ParsedIntent::default_question("fallback");
        assert_eq!(intent.intent, IntentKind::Question);
        assert!((intent.confidence - 0.3).abs() < f64::EPSILON);
        assert!(intent.entities.is_empty());
    }
}
