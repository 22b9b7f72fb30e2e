use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::plan::StepId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanStructureError {
    #[error("step id `{0}` is declared more than once")]
    DuplicateStepId(StepId),
    #[error("step `{step}` depends on unknown step `{dependency}`")]
    UnknownDependency { step: StepId, dependency: StepId },
    #[error("step `{0}` depends on itself")]
    SelfDependency(StepId),
    #[error("step `{step}` depends on `{dependency}`, which depends back on it")]
    Cycle { step: StepId, dependency: StepId },
    #[error("step `{step}` depends on `{dependency}`, which is not declared before it")]
    ForwardReference { step: StepId, dependency: StepId },
}

impl PlanStructureError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateStepId(_) => "DUPLICATE_STEP_ID",
            Self::UnknownDependency { .. } => "UNKNOWN_DEPENDENCY",
            Self::SelfDependency(_) | Self::Cycle { .. } => "DEPENDENCY_CYCLE",
            Self::ForwardReference { .. } => "FORWARD_REFERENCE",
        }
    }
}

/// Failures surfaced to operators by the command-line entry points.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("configuration issue: {0}")]
    Configuration(#[from] ConfigError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApplicationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config_validation",
            Self::InvalidInput(_) => "invalid_input",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Whether the caller can fix the failure by changing what they passed in.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidInput(_))
    }
}
