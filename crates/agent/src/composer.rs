use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use concierge_core::domain::grounding::EvidenceDocument;
use concierge_core::domain::intent::ParsedIntent;

use crate::llm::{complete_within, LlmClient};

const MAX_PROMPT_DOCUMENTS: usize = 8;
const MAX_SNIPPET_CHARS: usize = 600;

/// Turns evidence into the user-facing answer.
#[async_trait]
pub trait ResponseComposer: Send + Sync {
    async fn compose(
        &self,
        query: &str,
        intent: &ParsedIntent,
        evidence: &[EvidenceDocument],
    ) -> Result<String>;
}

pub struct LlmResponseComposer {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmResponseComposer {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }
}

#[async_trait]
impl ResponseComposer for LlmResponseComposer {
    async fn compose(
        &self,
        query: &str,
        intent: &ParsedIntent,
        evidence: &[EvidenceDocument],
    ) -> Result<String> {
        let prompt = composition_prompt(query, intent, evidence);
        let text = complete_within(self.llm.as_ref(), &prompt, self.timeout).await?;
        let text = text.trim();
        if text.is_empty() {
            bail!("llm returned an empty response");
        }
        Ok(text.to_string())
    }
}

pub fn composition_prompt(query: &str, intent: &ParsedIntent, evidence: &[EvidenceDocument]) -> String {
    let mut prompt = String::from(
        "You are a shopping assistant. Answer using only the numbered evidence below and cite \
         sources as [n]. If the evidence does not cover the question, say so plainly.\n\n",
    );
    let _ = writeln!(prompt, "Intent: {}", intent.intent.as_str());
    let _ = writeln!(prompt, "Question: {query}\n");

    if evidence.is_empty() {
        prompt.push_str("Evidence: none available.\n");
    } else {
        prompt.push_str("Evidence:\n");
        for (position, document) in evidence.iter().take(MAX_PROMPT_DOCUMENTS).enumerate() {
            let label = document.title.as_deref().unwrap_or(&document.id);
            let snippet: String = document.content.chars().take(MAX_SNIPPET_CHARS).collect();
            let _ = writeln!(prompt, "[{}] {label}: {snippet}", position + 1);
        }
    }

    prompt.push_str("\nAnswer:");
    prompt
}
