//! Post-hoc validation of a composed answer against retrieved evidence.
//!
//! Claim extraction and evidence matching sit behind [`ClaimExtractor`] and
//! [`EvidenceMatcher`] so a different matcher can be swapped in without touching
//! scoring. Validation always completes: empty responses, empty evidence and
//! zero-claim answers all produce a definite assessment.

pub mod claims;
pub mod fallback;
pub mod matching;
pub mod quality;

use std::sync::Arc;

use crate::config::GroundingConfig;
use crate::domain::grounding::{
    EvidenceDocument, FactualClaim, GroundingValidationResult, HallucinationReport,
    ResponseQualityAssessment,
};
use crate::domain::intent::clamp_unit;

pub use claims::{ClaimExtractor, PatternClaimExtractor};
pub use fallback::FallbackResponder;
pub use matching::{EvidenceMatcher, LexicalEvidenceMatcher};
pub use quality::QualityInputs;

const EXACT_BASE_SCORE: f64 = 0.8;
const EXACT_BONUS_PER_MATCH: f64 = 0.1;
const EXACT_BONUS_CAP: f64 = 0.2;
const SEMANTIC_SCALE: f64 = 0.6;

#[derive(Clone)]
pub struct GroundingValidator {
    config: GroundingConfig,
    extractor: Arc<dyn ClaimExtractor>,
    matcher: Arc<dyn EvidenceMatcher>,
}

impl std::fmt::Debug for GroundingValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroundingValidator").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Default for GroundingValidator {
    fn default() -> Self {
        Self::new(GroundingConfig::default())
    }
}

impl GroundingValidator {
    pub fn new(config: GroundingConfig) -> Self {
        let extractor = Arc::new(PatternClaimExtractor::new(config.max_claims));
        let matcher = Arc::new(LexicalEvidenceMatcher::from_config(&config));
        Self { config, extractor, matcher }
    }

    pub fn with_strategies(
        config: GroundingConfig,
        extractor: Arc<dyn ClaimExtractor>,
        matcher: Arc<dyn EvidenceMatcher>,
    ) -> Self {
        Self { config, extractor, matcher }
    }

    pub fn config(&self) -> &GroundingConfig {
        &self.config
    }

    pub fn validate_response_grounding(
        &self,
        response: &str,
        documents: &[EvidenceDocument],
        query: &str,
    ) -> ResponseQualityAssessment {
        let grounding = self.validate_claims(response, documents);

        let vacuous = grounding.total_claims == 0 && self.config.vacuous_grounding;
        let effective_grounding = if vacuous { 1.0 } else { grounding.grounding_score };

        let quality = quality::assess_quality(&QualityInputs {
            response,
            query,
            grounding: effective_grounding,
            cited_documents: grounding.citations.len(),
            total_documents: documents.len(),
            hallucination_detected: grounding.hallucination.detected,
        });

        let mut fallback_reasons = Vec::new();
        if !vacuous && effective_grounding < self.config.fallback_threshold {
            fallback_reasons.push(format!(
                "grounding score {:.2} below threshold {:.2}",
                grounding.grounding_score, self.config.fallback_threshold
            ));
        }
        if quality.overall < self.config.fallback_threshold {
            fallback_reasons.push(format!(
                "overall quality {:.2} below threshold {:.2}",
                quality.overall, self.config.fallback_threshold
            ));
        }
        if grounding.hallucination.detected {
            fallback_reasons.push("possible hallucination detected".to_string());
        }
        let fallback_recommended = !fallback_reasons.is_empty();

        tracing::info!(
            event_name = "grounding.verdict",
            is_grounded = grounding.is_grounded,
            grounding_score = grounding.grounding_score,
            validated_claims = grounding.validated_claims,
            total_claims = grounding.total_claims,
            hallucination = grounding.hallucination.detected,
            overall_quality = quality.overall,
            fallback_recommended,
            "grounding validation completed"
        );

        ResponseQualityAssessment { grounding, quality, fallback_recommended, fallback_reasons }
    }

    /// Claim extraction, evidence matching and scoring without the quality pass.
    pub fn validate_claims(
        &self,
        response: &str,
        documents: &[EvidenceDocument],
    ) -> GroundingValidationResult {
        let mut claims = self.extractor.extract(response);
        claims.truncate(self.config.max_claims);

        for claim in &mut claims {
            claim.supporting_evidence = self.matcher.find_evidence(claim, documents);
            claim.validation_score = claim_score(claim);
            claim.validated = claim.validation_score >= self.config.min_citation_relevance;
        }

        let total_claims = claims.len();
        let validated_claims = claims.iter().filter(|claim| claim.validated).count();
        let grounding_score = if total_claims == 0 {
            0.0
        } else {
            clamp_unit(validated_claims as f64 / total_claims as f64)
        };
        let is_grounded = if total_claims == 0 {
            self.config.vacuous_grounding
        } else {
            grounding_score >= self.config.min_grounding_score
        };

        let citations = citations(&claims);
        let hallucination = if self.config.hallucination_detection_enabled {
            quality::detect_hallucination(
                response,
                &claims,
                citations.len(),
                self.config.hallucination_threshold,
            )
        } else {
            HallucinationReport::default()
        };

        GroundingValidationResult {
            is_grounded,
            grounding_score,
            claims,
            validated_claims,
            total_claims,
            citations,
            hallucination,
        }
    }
}

fn claim_score(claim: &FactualClaim) -> f64 {
    let exact = claim.supporting_evidence.iter().filter(|evidence| evidence.exact_match).count();
    if exact > 0 {
        let bonus = (EXACT_BONUS_PER_MATCH * (exact - 1) as f64).min(EXACT_BONUS_CAP);
        return clamp_unit(EXACT_BASE_SCORE + bonus);
    }

    let semantic: Vec<f64> = claim
        .supporting_evidence
        .iter()
        .filter(|evidence| evidence.semantic_match)
        .map(|evidence| evidence.relevance_score)
        .collect();
    if semantic.is_empty() {
        return 0.0;
    }
    clamp_unit(semantic.iter().sum::<f64>() / semantic.len() as f64 * SEMANTIC_SCALE)
}

fn citations(claims: &[FactualClaim]) -> Vec<String> {
    let mut citations: Vec<String> = Vec::new();
    for evidence in claims.iter().filter(|claim| claim.validated).flat_map(|claim| &claim.supporting_evidence) {
        if !citations.contains(&evidence.document_id) {
            citations.push(evidence.document_id.clone());
        }
    }
    citations
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ClaimExtractor, GroundingValidator, LexicalEvidenceMatcher};
    use crate::config::GroundingConfig;
    use crate::domain::grounding::{ClaimType, EvidenceDocument, FactualClaim};

    const RESPONSE: &str = "The Acme X200 has 16GB RAM and costs $499";

    fn acme_evidence() -> Vec<EvidenceDocument> {
        vec![EvidenceDocument::new("doc-acme", "Acme X200 features 16GB RAM and costs $499.")
            .with_relevance(0.92)]
    }

    #[test]
    fn matching_evidence_grounds_both_claims() {
        let assessment = GroundingValidator::default().validate_response_grounding(
            RESPONSE,
            &acme_evidence(),
            "how much ram does the acme x200 have",
        );
        let grounding = &assessment.grounding;

        assert_eq!(grounding.total_claims, 2);
        assert_eq!(grounding.validated_claims, 2);
        assert!(grounding.claims.iter().all(|claim| claim.supporting_evidence[0].exact_match));
        assert_eq!(grounding.grounding_score, 1.0);
        assert!(grounding.is_grounded);
        assert_eq!(grounding.citations, vec!["doc-acme"]);
        assert!(!grounding.hallucination.detected);
    }

    #[test]
    fn empty_evidence_fails_grounding_and_recommends_fallback() {
        let assessment =
            GroundingValidator::default().validate_response_grounding(RESPONSE, &[], "acme x200");

        assert_eq!(assessment.grounding.grounding_score, 0.0);
        assert!(!assessment.grounding.is_grounded);
        assert!(assessment.fallback_recommended);
        assert!(assessment.grounding.citations.is_empty());
    }

    #[test]
    fn hedged_uncited_answer_is_flagged_as_hallucination() {
        let assessment = GroundingValidator::default().validate_response_grounding(
            "I think the Acme X200 is probably the best choice for $499.",
            &[],
            "best laptop",
        );

        assert!(assessment.grounding.hallucination.detected);
        assert!(assessment.fallback_recommended);
    }

    #[test]
    fn zero_claims_follow_vacuous_grounding_policy() {
        let response = "Happy to help you find something you will enjoy using every single day.";

        let lenient = GroundingValidator::default().validate_response_grounding(response, &[], "help");
        assert_eq!(lenient.grounding.total_claims, 0);
        assert_eq!(lenient.grounding.grounding_score, 0.0);
        assert!(lenient.grounding.is_grounded);

        let strict = GroundingValidator::new(GroundingConfig {
            vacuous_grounding: false,
            ..GroundingConfig::default()
        })
        .validate_response_grounding(response, &[], "help");
        assert!(!strict.grounding.is_grounded);
        assert!(strict.fallback_recommended);
    }

    #[test]
    fn multiple_exact_matches_earn_a_capped_bonus() {
        let documents = vec![
            EvidenceDocument::new("a", "It costs $499."),
            EvidenceDocument::new("b", "Now it costs $499 everywhere."),
            EvidenceDocument::new("c", "Still costs $499 today."),
            EvidenceDocument::new("d", "Yes it costs $499."),
        ];
        let result = GroundingValidator::default().validate_claims("It costs $499.", &documents);

        assert_eq!(result.claims.len(), 1);
        assert!((result.claims[0].validation_score - 1.0).abs() < 1e-9);
        assert_eq!(result.citations.len(), 4);
    }

    #[test]
    fn disabled_detection_never_reports_hallucination() {
        let validator = GroundingValidator::new(GroundingConfig {
            hallucination_detection_enabled: false,
            ..GroundingConfig::default()
        });
        let assessment = validator.validate_response_grounding(
            "I think it might probably cost $499.",
            &[],
            "price",
        );
        assert!(!assessment.grounding.hallucination.detected);
        assert!(assessment.grounding.hallucination.indicators.is_empty());
    }

    struct FixedExtractor;

    impl ClaimExtractor for FixedExtractor {
        fn extract(&self, _response: &str) -> Vec<FactualClaim> {
            vec![FactualClaim::new("costs $499", ClaimType::Price, 0.9)]
        }
    }

    #[test]
    fn custom_extractor_is_used() {
        let config = GroundingConfig::default();
        let validator = GroundingValidator::with_strategies(
            config.clone(),
            Arc::new(FixedExtractor),
            Arc::new(LexicalEvidenceMatcher::from_config(&config)),
        );

        let result = validator.validate_claims("anything at all", &acme_evidence());
        assert_eq!(result.validated_claims, 1);
        assert!(result.is_grounded);
    }
}
