use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::grounding::{ClaimType, FactualClaim};
use crate::grounding::matching::normalize;

pub const PATTERN_CLAIM_CONFIDENCE: f64 = 0.8;
pub const FALLBACK_CLAIM_CONFIDENCE: f64 = 0.6;

const SUBJECTIVE_MARKERS: [&str; 5] = ["i think", "in my opinion", "i believe", "i feel", "personally"];
const CLAUSE_SEPARATORS: [&str; 5] = [" and ", ", ", ";", " but ", " while "];
const MIN_CLAUSE_TOKENS: usize = 2;

/// Turns free response text into checkable claims.
pub trait ClaimExtractor: Send + Sync {
    fn extract(&self, response: &str) -> Vec<FactualClaim>;
}

struct ClaimPattern {
    claim_type: ClaimType,
    regex: Regex,
}

/// Ordered by precedence: the first matching pattern decides the claim type.
fn claim_patterns() -> &'static [ClaimPattern] {
    static PATTERNS: OnceLock<Vec<ClaimPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (ClaimType::Price, r"(?i)\$\s?\d[\d,]*(?:\.\d+)?|\b\d+(?:\.\d+)?\s?(?:dollars|usd|euros?|eur)\b"),
            (
                ClaimType::Availability,
                r"(?i)\b(?:in stock|out of stock|sold out|available|unavailable|back-?ordered|ships?\s+(?:in|within|today|tomorrow)|delivery)\b",
            ),
            (
                ClaimType::Specification,
                r"(?i)\b\d+(?:\.\d+)?\s?(?:gb|tb|mb|ghz|mhz|mah|wh|w|kg|g|lbs?|oz|mm|cm|inch(?:es)?|hz|hours?|hrs?|mp|fps|rpm)\b",
            ),
            (
                ClaimType::ProductFeature,
                r"(?i)\b(?:has|have|features?|includes?|comes with|supports?|offers?|provides?|equipped with)\b",
            ),
            (
                ClaimType::GeneralFact,
                r"(?i)\b(?:rated|rating|reviews?|\d(?:\.\d)?\s?(?:/\s?5|out of 5|stars?))\b",
            ),
        ]
        .into_iter()
        .filter_map(|(claim_type, source)| {
            compile(source).map(|regex| ClaimPattern { claim_type, regex })
        })
        .collect()
    })
}

fn specific_info_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\$\s?\d",
            r"(?i)\b\d+(?:\.\d+)?\s?(?:(?:gb|tb|mb|ghz|mhz|mah|wh|w|kg|g|lbs?|oz|mm|cm|inch(?:es)?|hz)\b|%)",
            r"\b[A-Za-z]{1,4}-?\d{2,}[A-Za-z0-9]*\b",
            r"(?i)\bv?\d+\.\d+(?:\.\d+)?\b",
        ]
        .into_iter()
        .filter_map(compile)
        .collect()
    })
}

pub(crate) fn compile(source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(regex) => Some(regex),
        Err(error) => {
            tracing::error!(
                event_name = "grounding.pattern.invalid",
                pattern = source,
                error = %error,
                "pattern failed to compile and is disabled"
            );
            None
        }
    }
}

/// Prices, measurements, model numbers or version strings.
pub fn contains_specific_info(text: &str) -> bool {
    specific_info_patterns().iter().any(|pattern| pattern.is_match(text))
}

/// Splits on `.`, `!` or `?` followed by whitespace or end of text, so `$4.99` stays whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        let boundary = matches!(ch, '.' | '!' | '?')
            && chars.peek().map(|next| next.is_whitespace()).unwrap_or(true);
        if boundary {
            push_trimmed(&mut sentences, &current);
            current.clear();
        }
    }
    push_trimmed(&mut sentences, &current);

    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}

pub fn is_subjective(sentence: &str) -> bool {
    let lowered = sentence.to_lowercase();
    SUBJECTIVE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

fn split_clauses(sentence: &str) -> Vec<String> {
    let body = sentence.trim_end_matches(['.', '!', '?']);
    let mut clauses = vec![body.to_string()];
    for separator in CLAUSE_SEPARATORS {
        clauses = clauses
            .iter()
            .flat_map(|clause| clause.split(separator).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }
    clauses
        .into_iter()
        .map(|clause| clause.trim().to_string())
        .filter(|clause| clause.split_whitespace().count() >= MIN_CLAUSE_TOKENS)
        .collect()
}

fn classify(text: &str) -> Option<ClaimType> {
    claim_patterns().iter().find(|pattern| pattern.regex.is_match(text)).map(|pattern| pattern.claim_type)
}

/// Regex-driven extractor with a whole-sentence fallback for sentences carrying specifics.
#[derive(Clone, Debug)]
pub struct PatternClaimExtractor {
    max_claims: usize,
}

impl PatternClaimExtractor {
    pub fn new(max_claims: usize) -> Self {
        Self { max_claims }
    }
}

impl ClaimExtractor for PatternClaimExtractor {
    fn extract(&self, response: &str) -> Vec<FactualClaim> {
        let mut claims = Vec::new();
        let mut seen = HashSet::new();

        for sentence in split_sentences(response) {
            if is_subjective(&sentence) {
                continue;
            }

            let mut matched_clause = false;
            for clause in split_clauses(&sentence) {
                if let Some(claim_type) = classify(&clause) {
                    matched_clause = true;
                    if seen.insert(normalize(&clause)) {
                        claims.push(FactualClaim::new(clause, claim_type, PATTERN_CLAIM_CONFIDENCE));
                    }
                }
            }

            if !matched_clause && contains_specific_info(&sentence) {
                let text = sentence.trim_end_matches(['.', '!', '?']).to_string();
                if seen.insert(normalize(&text)) {
                    claims.push(FactualClaim::new(text, ClaimType::GeneralFact, FALLBACK_CLAIM_CONFIDENCE));
                }
            }
        }

        claims.truncate(self.max_claims);
        claims
    }
}

#[cfg(test)]
mod tests {
    use super::{
        claim_patterns, contains_specific_info, specific_info_patterns, split_sentences,
        ClaimExtractor, PatternClaimExtractor,
    };
    use crate::domain::grounding::ClaimType;

    #[test]
    fn every_builtin_pattern_compiles() {
        assert_eq!(claim_patterns().len(), 5);
        assert_eq!(specific_info_patterns().len(), 4);
    }

    #[test]
    fn sentence_split_keeps_decimal_prices_intact() {
        let sentences = split_sentences("It costs $4.99 today. Ships free! Want one?");
        assert_eq!(sentences, vec!["It costs $4.99 today.", "Ships free!", "Want one?"]);
    }

    #[test]
    fn conjunction_splits_into_typed_claims() {
        let claims = PatternClaimExtractor::new(20).extract("The Acme X200 has 16GB RAM and costs $499");

        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].text, "The Acme X200 has 16GB RAM");
        assert_eq!(claims[0].claim_type, ClaimType::Specification);
        assert_eq!(claims[1].text, "costs $499");
        assert_eq!(claims[1].claim_type, ClaimType::Price);
    }

    #[test]
    fn subjective_sentences_are_dropped() {
        let claims = PatternClaimExtractor::new(20)
            .extract("I think the Acme X200 is probably the best choice for $499. It is in stock now.");

        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].claim_type, ClaimType::Availability);
    }

    #[test]
    fn specific_sentence_without_pattern_falls_back_to_whole_sentence() {
        let claims = PatternClaimExtractor::new(20).extract("The X200 replaced the X100 last year.");

        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].text, "The X200 replaced the X100 last year");
        assert_eq!(claims[0].claim_type, ClaimType::GeneralFact);
        assert!((claims[0].confidence - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicates_collapse_and_cap_applies() {
        let extractor = PatternClaimExtractor::new(2);
        let claims = extractor.extract(
            "It has Bluetooth. It has Bluetooth! It weighs 2kg. It is available in blue.",
        );
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].text, "It has Bluetooth");
        assert_eq!(claims[1].claim_type, ClaimType::Specification);
    }

    #[test]
    fn specific_info_detection_covers_prices_units_and_models() {
        assert!(contains_specific_info("only $20"));
        assert!(contains_specific_info("a 65W charger"));
        assert!(contains_specific_info("the WH-1000XM5"));
        assert!(contains_specific_info("firmware 2.1.4"));
        assert!(!contains_specific_info("a lovely pair of headphones"));
    }
}
