use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::GroundingConfig;
use crate::domain::grounding::{Evidence, EvidenceDocument, FactualClaim};
use crate::grounding::claims::split_sentences;

const SNIPPET_CHARS: usize = 200;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "it", "its", "this", "that",
    "these", "those", "and", "or", "of", "to", "in", "on", "for", "with", "at", "by", "from", "as",
    "has", "have", "had", "also", "very", "can", "will", "you", "your", "we", "our", "they",
    "their", "i", "me", "my", "do", "does", "what", "which", "how",
];

/// Finds the evidence backing one claim.
pub trait EvidenceMatcher: Send + Sync {
    fn find_evidence(&self, claim: &FactualClaim, documents: &[EvidenceDocument]) -> Vec<Evidence>;
}

/// Lowercases and strips punctuation, keeping `$`, `%` and decimal points inside numbers.
pub fn normalize(text: &str) -> String {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let mut cleaned = String::with_capacity(chars.len());

    for (position, ch) in chars.iter().enumerate() {
        let decimal_point = *ch == '.'
            && position > 0
            && chars[position - 1].is_ascii_digit()
            && chars.get(position + 1).map(char::is_ascii_digit).unwrap_or(false);
        let keep = ch.is_alphanumeric() || matches!(ch, '$' | '%') || decimal_point;
        cleaned.push(if keep { *ch } else { ' ' });
    }

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tokens(text: &str) -> HashSet<String> {
    normalize(text).split_whitespace().map(str::to_string).collect()
}

/// Tokens with stopwords removed.
pub fn key_tokens(text: &str) -> HashSet<String> {
    normalize(text)
        .split_whitespace()
        .filter(|token| !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

pub fn jaccard(left: &HashSet<String>, right: &HashSet<String>) -> f64 {
    if left.is_empty() && right.is_empty() {
        return 0.0;
    }
    let intersection = left.intersection(right).count() as f64;
    let union = left.union(right).count() as f64;
    intersection / union
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// Exact containment or key-token overlap, then token-set Jaccard against each
/// document's best sentence.
#[derive(Clone, Debug)]
pub struct LexicalEvidenceMatcher {
    key_phrase_overlap: f64,
    semantic_threshold: f64,
}

impl LexicalEvidenceMatcher {
    pub fn new(key_phrase_overlap: f64, semantic_threshold: f64) -> Self {
        Self { key_phrase_overlap, semantic_threshold }
    }

    pub fn from_config(config: &GroundingConfig) -> Self {
        Self::new(config.key_phrase_overlap, config.semantic_similarity_threshold)
    }

    fn match_document(&self, claim_text: &str, claim_keys: &HashSet<String>, document: &EvidenceDocument) -> Option<Evidence> {
        let normalized_claim = normalize(claim_text);
        let normalized_document = normalize(&document.content);
        if normalized_claim.is_empty() || normalized_document.is_empty() {
            return None;
        }

        let contained = format!(" {normalized_document} ").contains(&format!(" {normalized_claim} "));
        let overlap = if claim_keys.is_empty() {
            0.0
        } else {
            let document_tokens = tokens(&document.content);
            claim_keys.iter().filter(|token| document_tokens.contains(*token)).count() as f64
                / claim_keys.len() as f64
        };

        let (best_sentence, best_similarity) = split_sentences(&document.content)
            .into_iter()
            .map(|sentence| {
                let similarity = jaccard(claim_keys, &key_tokens(&sentence));
                (sentence, similarity)
            })
            .max_by(|left, right| left.1.partial_cmp(&right.1).unwrap_or(Ordering::Equal))?;

        let exact_match = contained || overlap >= self.key_phrase_overlap;
        let semantic_match = best_similarity > self.semantic_threshold;
        if !exact_match && !semantic_match {
            return None;
        }

        let relevance_score = if contained {
            1.0
        } else if exact_match {
            overlap
        } else {
            best_similarity
        };

        Some(Evidence {
            document_id: document.id.clone(),
            snippet: truncate_chars(&best_sentence, SNIPPET_CHARS),
            relevance_score,
            exact_match,
            semantic_match,
        })
    }
}

impl EvidenceMatcher for LexicalEvidenceMatcher {
    fn find_evidence(&self, claim: &FactualClaim, documents: &[EvidenceDocument]) -> Vec<Evidence> {
        let claim_keys = key_tokens(&claim.text);
        let mut matches: Vec<(Evidence, f64)> = documents
            .iter()
            .filter_map(|document| {
                self.match_document(&claim.text, &claim_keys, document)
                    .map(|evidence| (evidence, document.relevance_score))
            })
            .collect();

        matches.sort_by(|(left, left_doc), (right, right_doc)| {
            right
                .exact_match
                .cmp(&left.exact_match)
                .then_with(|| {
                    right.relevance_score.partial_cmp(&left.relevance_score).unwrap_or(Ordering::Equal)
                })
                .then_with(|| right_doc.partial_cmp(left_doc).unwrap_or(Ordering::Equal))
        });

        matches.into_iter().map(|(evidence, _)| evidence).collect()
    }
}
