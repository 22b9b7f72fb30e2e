use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use concierge_core::domain::grounding::EvidenceDocument;
use concierge_core::domain::plan::ToolId;
use concierge_core::grounding::GroundingValidator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, input: Value) -> Result<Value>;
}

/// Outcome of one bounded tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub latency_ms: u64,
    #[serde(default)]
    pub timed_out: bool,
}

impl ToolResponse {
    pub fn ok(result: Value, latency_ms: u64) -> Self {
        Self { success: true, result: Some(result), error: None, latency_ms, timed_out: false }
    }

    pub fn failed(error: impl Into<String>, latency_ms: u64) -> Self {
        Self { success: false, result: None, error: Some(error.into()), latency_ms, timed_out: false }
    }

    pub fn timeout(timeout: Duration, latency_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(format!("timed out after {}ms", timeout.as_millis())),
            latency_ms,
            timed_out: true,
        }
    }
}

/// The single contract the pipeline uses to reach collaborators.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool: &ToolId, parameters: &Value, timeout: Duration) -> ToolResponse;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn with_tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.register(tool);
        self
    }

    pub fn contains(&self, tool: &ToolId) -> bool {
        self.tools.contains_key(tool.as_str())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, tool: &ToolId, parameters: &Value, timeout: Duration) -> ToolResponse {
        let Some(handler) = self.tools.get(tool.as_str()).cloned() else {
            return ToolResponse::failed(format!("unknown tool `{tool}`"), 0);
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, handler.execute(parameters.clone())).await;
        let latency_ms = elapsed_ms(started);

        match outcome {
            Ok(Ok(result)) => ToolResponse::ok(result, latency_ms),
            Ok(Err(error)) => ToolResponse::failed(error.to_string(), latency_ms),
            Err(_) => ToolResponse::timeout(timeout, latency_ms),
        }
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Reads evidence documents out of a retrieval-style tool output.
///
/// Accepts a bare array of documents, an object carrying `documents`, `results` or
/// `evidence`, or a knowledge payload with a `context` string (attributed to
/// `source`). Items that do not decode as documents are ignored.
pub fn evidence_from_output(source: &str, output: &Value) -> Vec<EvidenceDocument> {
    let items = match output {
        Value::Array(items) => Some(items),
        Value::Object(map) => ["documents", "results", "evidence"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array)),
        _ => None,
    };

    let mut documents: Vec<EvidenceDocument> = items
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<EvidenceDocument>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    if let Some(context) = output.get("context").and_then(Value::as_str) {
        if !context.trim().is_empty() {
            documents.push(EvidenceDocument::new(source, context).with_relevance(0.5));
        }
    }

    documents
}

/// Merges documents from several sources, keeping the first copy of each id.
pub fn merge_evidence(sources: impl IntoIterator<Item = Vec<EvidenceDocument>>) -> Vec<EvidenceDocument> {
    let mut merged: Vec<EvidenceDocument> = Vec::new();
    for document in sources.into_iter().flatten() {
        if !merged.iter().any(|existing| existing.id == document.id) {
            merged.push(document);
        }
    }
    merged
}

/// The `grounding` step of a plan: consolidates upstream evidence and, when a
/// `draft_response` is supplied, validates it.
#[derive(Clone, Debug, Default)]
pub struct GroundingCheckpointTool {
    validator: GroundingValidator,
}

impl GroundingCheckpointTool {
    pub fn new(validator: GroundingValidator) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Tool for GroundingCheckpointTool {
    fn name(&self) -> &str {
        ToolId::GROUNDING
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let upstream = input.get("upstream").and_then(Value::as_object);
        let documents = merge_evidence(
            upstream
                .into_iter()
                .flatten()
                .map(|(step_id, output)| evidence_from_output(step_id, output)),
        );

        let document_count = documents.len();
        let mut output = json!({ "documents": &documents, "documentCount": document_count });

        if let Some(draft) = input.get("draft_response").and_then(Value::as_str) {
            let query = input.get("query").and_then(Value::as_str).unwrap_or_default();
            let assessment = self.validator.validate_response_grounding(draft, &documents, query);
            output["assessment"] = serde_json::to_value(assessment)?;
        }

        Ok(output)
    }
}
