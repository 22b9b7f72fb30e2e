use serde::{Deserialize, Serialize};

/// A retrieved document offered as evidence for a composed answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceDocument {
    pub id: String,
    #[serde(alias = "text", alias = "snippet")]
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "score")]
    pub relevance_score: f64,
}

impl EvidenceDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), title: None, relevance_score: 0.0 }
    }

    pub fn with_relevance(mut self, relevance_score: f64) -> Self {
        self.relevance_score = relevance_score;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub document_id: String,
    pub snippet: String,
    pub relevance_score: f64,
    pub exact_match: bool,
    pub semantic_match: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    ProductFeature,
    Price,
    Availability,
    Specification,
    GeneralFact,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductFeature => "product_feature",
            Self::Price => "price",
            Self::Availability => "availability",
            Self::Specification => "specification",
            Self::GeneralFact => "general_fact",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactualClaim {
    pub text: String,
    pub claim_type: ClaimType,
    pub confidence: f64,
    pub supporting_evidence: Vec<Evidence>,
    pub validated: bool,
    pub validation_score: f64,
}

impl FactualClaim {
    pub fn new(text: impl Into<String>, claim_type: ClaimType, confidence: f64) -> Self {
        Self {
            text: text.into(),
            claim_type,
            confidence,
            supporting_evidence: Vec::new(),
            validated: false,
            validation_score: 0.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HallucinationReport {
    pub detected: bool,
    pub confidence: f64,
    pub indicators: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingValidationResult {
    pub is_grounded: bool,
    pub grounding_score: f64,
    pub claims: Vec<FactualClaim>,
    pub validated_claims: usize,
    pub total_claims: usize,
    /// Ids of documents backing at least one validated claim, first-seen order.
    pub citations: Vec<String>,
    pub hallucination: HallucinationReport,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityBreakdown {
    pub factual_accuracy: f64,
    pub query_relevance: f64,
    pub completeness: f64,
    pub clarity: f64,
    pub groundedness: f64,
    pub overall: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseQualityAssessment {
    pub grounding: GroundingValidationResult,
    pub quality: QualityBreakdown,
    pub fallback_recommended: bool,
    pub fallback_reasons: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackResponse {
    pub text: String,
    pub citations: Vec<String>,
    pub confidence: f64,
    pub reason: String,
}
