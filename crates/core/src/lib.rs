pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod grounding;
pub mod planner;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::execution::{
    CoordinatedResult, FailureKind, PlanStatus, StepOutcome, StepResult, StepState,
};
pub use domain::grounding::{
    ClaimType, Evidence, EvidenceDocument, FactualClaim, FallbackResponse,
    GroundingValidationResult, HallucinationReport, QualityBreakdown, ResponseQualityAssessment,
};
pub use domain::intent::{IntentEntities, IntentKind, ParsedIntent};
pub use domain::plan::{ExecutionPlan, ExecutionStep, RetryPolicy, StepId, StepIndex, StepType, ToolId};
pub use errors::{ApplicationError, PlanStructureError};
pub use grounding::{FallbackResponder, GroundingValidator};
pub use planner::{
    can_parallelize, validate_plan, ExecutionPlanner, PlanConstraints, PlanGraph,
    PlanValidationResult, PlanValidator, PlanningContext,
};
