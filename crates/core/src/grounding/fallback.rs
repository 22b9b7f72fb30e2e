use std::cmp::Ordering;

use crate::config::GroundingConfig;
use crate::domain::grounding::{EvidenceDocument, FallbackResponse};
use crate::grounding::matching::truncate_chars;

pub const EMERGENCY_CONFIDENCE: f64 = 0.1;
const CITED_FALLBACK_CONFIDENCE: f64 = 0.4;
const APOLOGY_CONFIDENCE: f64 = 0.2;
const SNIPPET_CHARS: usize = 160;

const APOLOGY_TEXT: &str = "I'm sorry, I couldn't find reliable information to answer that. \
Could you share a bit more detail, such as the product name or what you'd like to know about it?";

const EMERGENCY_TEXT: &str = "I'm sorry, something went wrong while answering your question. \
Please try again, or rephrase the request with a few more details.";

/// Conservative answers used when a composed response cannot be trusted.
#[derive(Clone, Debug)]
pub struct FallbackResponder {
    max_citations: usize,
}

impl Default for FallbackResponder {
    fn default() -> Self {
        Self { max_citations: 3 }
    }
}

impl FallbackResponder {
    pub fn new(max_citations: usize) -> Self {
        Self { max_citations }
    }

    pub fn from_config(config: &GroundingConfig) -> Self {
        Self::new(config.max_fallback_citations)
    }

    pub fn create_fallback_response(
        &self,
        query: &str,
        documents: &[EvidenceDocument],
        reason: &str,
    ) -> FallbackResponse {
        let mut ranked: Vec<&EvidenceDocument> =
            documents.iter().filter(|document| !document.content.trim().is_empty()).collect();
        ranked.sort_by(|left, right| {
            right.relevance_score.partial_cmp(&left.relevance_score).unwrap_or(Ordering::Equal)
        });
        ranked.truncate(self.max_citations);

        if ranked.is_empty() || self.max_citations == 0 {
            return FallbackResponse {
                text: APOLOGY_TEXT.to_string(),
                citations: Vec::new(),
                confidence: APOLOGY_CONFIDENCE,
                reason: reason.to_string(),
            };
        }

        let mut text = if query.trim().is_empty() {
            "I couldn't fully verify an answer, but these sources look relevant:".to_string()
        } else {
            format!(
                "I couldn't fully verify an answer to \"{}\", but these sources look relevant:",
                query.trim()
            )
        };
        for (position, document) in ranked.iter().enumerate() {
            let label = document.title.as_deref().unwrap_or(&document.id);
            let snippet = truncate_chars(document.content.trim(), SNIPPET_CHARS);
            text.push_str(&format!("\n[{}] {label}: {snippet}", position + 1));
        }

        FallbackResponse {
            text,
            citations: ranked.iter().map(|document| document.id.clone()).collect(),
            confidence: CITED_FALLBACK_CONFIDENCE,
            reason: reason.to_string(),
        }
    }

    /// The last-resort answer once every stage and fallback has failed.
    pub fn emergency_response(&self, reason: &str) -> FallbackResponse {
        FallbackResponse {
            text: EMERGENCY_TEXT.to_string(),
            citations: Vec::new(),
            confidence: EMERGENCY_CONFIDENCE,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FallbackResponder;
    use crate::domain::grounding::EvidenceDocument;

    #[test]
    fn cites_only_the_most_relevant_documents() {
        let documents = vec![
            EvidenceDocument::new("low", "Low relevance text.").with_relevance(0.1),
            EvidenceDocument::new("top", "Acme X200 ships with 16GB RAM.").with_relevance(0.9),
            EvidenceDocument::new("mid", "Acme X200 costs $499.").with_relevance(0.5),
            EvidenceDocument::new("next", "Acme X300 costs $699.").with_relevance(0.4),
        ];

        let response = FallbackResponder::new(3).create_fallback_response(
            "acme x200 specs",
            &documents,
            "grounding below threshold",
        );

        assert_eq!(response.citations, vec!["top", "mid", "next"]);
        assert!(response.text.contains("[1] top: Acme X200 ships with 16GB RAM."));
        assert!(!response.text.contains("Low relevance"));
        assert_eq!(response.reason, "grounding below threshold");
    }

    #[test]
    fn long_snippets_are_truncated() {
        let long = "word ".repeat(100);
        let response = FallbackResponder::default().create_fallback_response(
            "q",
            &[EvidenceDocument::new("doc", long)],
            "test",
        );
        assert!(response.text.ends_with("..."));
        assert!(response.text.len() < 300);
    }

    #[test]
    fn without_evidence_apologizes_and_asks_for_detail() {
        let response = FallbackResponder::default().create_fallback_response("anything", &[], "no evidence");
        assert!(response.citations.is_empty());
        assert!(response.text.starts_with("I'm sorry"));
        assert!(response.confidence < 0.4);
    }

    #[test]
    fn emergency_response_has_fixed_low_confidence() {
        let response = FallbackResponder::default().emergency_response("pipeline exhausted");
        assert_eq!(response.confidence, 0.1);
        assert!(response.citations.is_empty());
    }
}
