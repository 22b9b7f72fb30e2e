//! Agent runtime: the asynchronous half of the concierge answer pipeline.
//!
//! This crate wires the pure planning and grounding logic from `concierge-core`
//! to external collaborators:
//! - an [`llm::LlmClient`] that classifies intent and composes answers
//! - named tools reached through the uniform [`tools::ToolInvoker`] contract
//!
//! # Architecture
//!
//! 1. **Intent** (`intent`) - query + history → `ParsedIntent`, strict JSON parsing
//! 2. **Guardrails** (`guardrails`) - side-effecting steps need policy approval
//! 3. **Coordination** (`coordinator`) - dependency-aware plan execution with
//!    bounded concurrency, per-step timeouts, retries and an overall deadline
//! 4. **Composition** (`composer`) - evidence → answer text
//! 5. **Runtime** (`runtime`) - the end-to-end pipeline with fallbacks
//!
//! # Safety Principle
//!
//! The LLM only writes text. Whether that text reaches the user is decided by the
//! deterministic grounding validator in the core crate.

pub mod composer;
pub mod coordinator;
pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod runtime;
pub mod tools;

pub use coordinator::{CallerContext, ToolCoordinator};
pub use runtime::{AgentResponse, AgentRuntime, QueryContext};
