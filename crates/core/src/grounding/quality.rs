use std::sync::OnceLock;

use regex::Regex;

use crate::domain::grounding::{FactualClaim, HallucinationReport, QualityBreakdown};
use crate::domain::intent::clamp_unit;
use crate::grounding::claims::{compile, contains_specific_info, split_sentences};
use crate::grounding::matching::{key_tokens, tokens};

const HEDGE_WEIGHT: f64 = 0.2;
const UNVALIDATED_WEIGHT: f64 = 0.5;
const UNCITED_SPECIFICS_PENALTY: f64 = 0.3;
const HALLUCINATION_QUALITY_PENALTY: f64 = 0.7;

fn hedge_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            compile(
                r"(?i)\b(?:probably|might|possibly|perhaps|i think|i believe|it seems|likely|not sure|could be|may be)\b",
            )
        })
        .as_ref()
}

pub fn hedge_count(text: &str) -> usize {
    hedge_pattern().map(|pattern| pattern.find_iter(text).count()).unwrap_or(0)
}

/// Hedging, unvalidated claims and uncited specifics add up to a suspicion score.
pub fn detect_hallucination(
    response: &str,
    claims: &[FactualClaim],
    citation_count: usize,
    threshold: f64,
) -> HallucinationReport {
    let mut score = 0.0;
    let mut indicators = Vec::new();

    let hedges = hedge_count(response);
    if hedges > 0 {
        score += hedges as f64 * HEDGE_WEIGHT;
        indicators.push(format!("hedging language ({hedges} occurrences)"));
    }

    let unvalidated = claims.iter().filter(|claim| !claim.validated).count();
    if unvalidated > 0 {
        score += unvalidated as f64 / claims.len() as f64 * UNVALIDATED_WEIGHT;
        indicators.push(format!("{unvalidated} of {} claims lack supporting evidence", claims.len()));
    }

    if citation_count == 0 && contains_specific_info(response) {
        score += UNCITED_SPECIFICS_PENALTY;
        indicators.push("specific details without any citation".to_string());
    }

    HallucinationReport { detected: score > threshold, confidence: score.min(1.0), indicators }
}

pub fn query_relevance(response: &str, query: &str) -> f64 {
    let query_tokens = key_tokens(query);
    if query_tokens.is_empty() {
        return 0.5;
    }
    let response_tokens = tokens(response);
    query_tokens.iter().filter(|token| response_tokens.contains(*token)).count() as f64
        / query_tokens.len() as f64
}

pub fn completeness(response: &str, cited_documents: usize, total_documents: usize) -> f64 {
    let words = response.split_whitespace().count() as f64;
    let length_score = (words / 50.0).min(1.0) * 0.6;
    let reference_score = if total_documents == 0 {
        0.0
    } else {
        (cited_documents as f64 / total_documents as f64).min(1.0) * 0.4
    };
    length_score + reference_score
}

/// Average sentence length between 8 and 25 words reads best.
pub fn clarity(response: &str) -> f64 {
    let sentences = split_sentences(response);
    if sentences.is_empty() {
        return 0.0;
    }
    let words: usize = sentences.iter().map(|sentence| sentence.split_whitespace().count()).sum();
    let average = words as f64 / sentences.len() as f64;

    if average < 8.0 {
        0.7
    } else if average <= 25.0 {
        1.0
    } else {
        (1.0 - (average - 25.0) / 50.0).max(0.3)
    }
}

pub struct QualityInputs<'a> {
    pub response: &'a str,
    pub query: &'a str,
    pub grounding: f64,
    pub cited_documents: usize,
    pub total_documents: usize,
    pub hallucination_detected: bool,
}

pub fn assess_quality(inputs: &QualityInputs<'_>) -> QualityBreakdown {
    let factual_accuracy = clamp_unit(inputs.grounding);
    let query_relevance = query_relevance(inputs.response, inputs.query);
    let completeness = completeness(inputs.response, inputs.cited_documents, inputs.total_documents);
    let clarity = clarity(inputs.response);
    let groundedness = factual_accuracy;

    let mut overall = factual_accuracy * 0.3
        + query_relevance * 0.2
        + completeness * 0.2
        + clarity * 0.1
        + groundedness * 0.2;
    if inputs.hallucination_detected {
        overall *= HALLUCINATION_QUALITY_PENALTY;
    }

    QualityBreakdown {
        factual_accuracy,
        query_relevance,
        completeness,
        clarity,
        groundedness,
        overall: clamp_unit(overall),
    }
}
