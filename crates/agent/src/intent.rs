//! Intent classification through an LLM collaborator.
//!
//! The model's reply is parsed strictly: a single JSON object must be present and
//! must match the intent schema. Anything else becomes an [`IntentParseError`],
//! which the classifier absorbs by returning the default `question` intent.

use std::sync::Arc;
use std::time::Duration;

use concierge_core::config::ClassifierConfig;
use concierge_core::domain::intent::{
    clamp_unit, IntentContext, IntentEntities, IntentKind, ParsedIntent,
};
use concierge_core::domain::plan::ToolId;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{complete_within, LlmClient};
use crate::tools::{evidence_from_output, ToolInvoker};

const KNOWLEDGE_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_KNOWLEDGE_CHARS: usize = 1_500;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IntentParseError {
    #[error("classifier output contains no JSON object")]
    NoJsonObject,
    #[error("classifier output does not match the intent schema: {0}")]
    Schema(String),
    #[error("classifier confidence is not a finite number")]
    NonFiniteConfidence,
}

#[derive(Deserialize)]
struct IntentWire {
    intent: String,
    confidence: f64,
    #[serde(default)]
    entities: IntentEntities,
    #[serde(default)]
    context: IntentContext,
    #[serde(default)]
    reasoning: String,
}

/// Returns the first balanced `{...}` block, ignoring braces inside strings.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

pub fn parse_intent_response(raw: &str) -> Result<ParsedIntent, IntentParseError> {
    let object = extract_json_object(raw).ok_or(IntentParseError::NoJsonObject)?;
    let wire: IntentWire =
        serde_json::from_str(object).map_err(|error| IntentParseError::Schema(error.to_string()))?;

    let intent = IntentKind::parse(&wire.intent)
        .ok_or_else(|| IntentParseError::Schema(format!("unknown intent `{}`", wire.intent)))?;
    if !wire.confidence.is_finite() {
        return Err(IntentParseError::NonFiniteConfidence);
    }

    Ok(ParsedIntent {
        intent,
        confidence: clamp_unit(wire.confidence),
        entities: wire.entities,
        context: wire.context,
        reasoning: wire.reasoning,
    })
}

/// Recent turns of the conversation, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationContext {
    pub history: Vec<String>,
}

impl ConversationContext {
    pub fn recent(&self, window: usize) -> &[String] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }
}

fn build_prompt(query: &str, history: &[String], knowledge: Option<&str>) -> String {
    let mut prompt = String::from(
        "Classify the shopping assistant query below. Reply with one JSON object:\n\
{\"intent\": \"search|recommend|purchase|question|compare|support\", \"confidence\": 0.0-1.0, \
\"entities\": {\"products\": [], \"categories\": [], \"priceRange\": {\"min\": null, \"max\": null}, \
\"brands\": [], \"features\": [], \"quantity\": null}, \
\"context\": {\"urgency\": \"low|medium|high\", \"complexity\": \"simple|moderate|complex\", \
\"userType\": \"new|returning|premium\"}, \"reasoning\": \"...\"}\n",
    );

    if !history.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for turn in history {
            prompt.push_str("- ");
            prompt.push_str(turn);
            prompt.push('\n');
        }
    }
    if let Some(knowledge) = knowledge {
        prompt.push_str("\nBackground knowledge:\n");
        prompt.push_str(knowledge);
        prompt.push('\n');
    }

    prompt.push_str("\nQuery: ");
    prompt.push_str(query);
    prompt
}

fn knowledge_text(output: &Value) -> Option<String> {
    let text = match output {
        Value::String(text) => text.clone(),
        other => evidence_from_output(ToolId::KNOWLEDGE_CONTEXT, other)
            .into_iter()
            .map(|document| document.content)
            .collect::<Vec<_>>()
            .join("\n"),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_KNOWLEDGE_CHARS).collect())
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolInvoker>,
    config: ClassifierConfig,
    llm_timeout: Duration,
}

impl IntentClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolInvoker>,
        config: ClassifierConfig,
        llm_timeout: Duration,
    ) -> Self {
        Self { llm, tools, config, llm_timeout }
    }

    /// Never fails: unusable classifier output degrades to the default intent.
    pub async fn parse_intent(&self, query: &str, context: &ConversationContext) -> ParsedIntent {
        let history = context.recent(self.config.context_window);
        let first = self.classify_once(query, history, None).await;
        if !self.needs_disambiguation(&first) {
            return first;
        }

        let Some(knowledge) = self.knowledge_context(query).await else {
            return first;
        };
        let second = self.classify_once(query, history, Some(&knowledge)).await;

        tracing::debug!(
            event_name = "classifier.disambiguated",
            first_intent = first.intent.as_str(),
            first_confidence = first.confidence,
            second_intent = second.intent.as_str(),
            second_confidence = second.confidence,
            "reclassified with knowledge context"
        );

        if second.confidence > first.confidence {
            second
        } else {
            first
        }
    }

    fn needs_disambiguation(&self, intent: &ParsedIntent) -> bool {
        intent.confidence < self.config.confidence_threshold
            || (intent.intent == IntentKind::Question && self.config.disambiguate_questions)
    }

    async fn classify_once(
        &self,
        query: &str,
        history: &[String],
        knowledge: Option<&str>,
    ) -> ParsedIntent {
        let prompt = build_prompt(query, history, knowledge);
        let raw = match complete_within(self.llm.as_ref(), &prompt, self.llm_timeout).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(
                    event_name = "classifier.llm.failed",
                    error = %error,
                    "classifier collaborator failed; using default intent"
                );
                return ParsedIntent::default_question(
                    "classifier unavailable; defaulted to question intent",
                );
            }
        };

        match parse_intent_response(&raw) {
            Ok(intent) => intent,
            Err(error) => {
                tracing::warn!(
                    event_name = "classifier.parse.failed",
                    error = %error,
                    "classifier output rejected; using default intent"
                );
                ParsedIntent::default_question(format!(
                    "classifier output unusable ({error}); defaulted to question intent"
                ))
            }
        }
    }

    async fn knowledge_context(&self, query: &str) -> Option<String> {
        let response = self
            .tools
            .invoke(&ToolId::knowledge_context(), &json!({ "query": query }), KNOWLEDGE_TIMEOUT)
            .await;
        if !response.success {
            tracing::debug!(
                event_name = "classifier.knowledge.unavailable",
                error = response.error.as_deref().unwrap_or("unknown"),
                "knowledge collaborator gave no context"
            );
            return None;
        }
        response.result.as_ref().and_then(knowledge_text)
    }
}
