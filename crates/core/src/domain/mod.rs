pub mod execution;
pub mod grounding;
pub mod intent;
pub mod plan;
