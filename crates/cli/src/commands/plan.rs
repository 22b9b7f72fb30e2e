use std::path::Path;

use concierge_core::config::LoadOptions;
use concierge_core::domain::intent::ParsedIntent;
use concierge_core::domain::plan::ExecutionPlan;
use concierge_core::errors::ApplicationError;
use concierge_core::planner::{
    can_parallelize, validate_plan, ExecutionPlanner, PlanConstraints, PlanValidationResult,
    PlanningContext,
};
use serde::Serialize;

use crate::commands::{load_config, read_input, CommandResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanReport {
    intent: ParsedIntent,
    plan: ExecutionPlan,
    can_parallelize: bool,
    validation: PlanValidationResult,
}

pub fn run(options: &LoadOptions, intent_path: &Path, query: &str) -> CommandResult {
    CommandResult::payload("plan", build_report(options, intent_path, query))
}

fn build_report(options: &LoadOptions, intent_path: &Path, query: &str) -> Result<PlanReport, ApplicationError> {
    let config = load_config(options)?;
    let raw = read_input("intent file", intent_path)?;
    let mut intent = serde_json::from_str::<ParsedIntent>(&raw).map_err(|error| {
        ApplicationError::InvalidInput(format!("intent file is not a valid ParsedIntent: {error}"))
    })?;
    intent.confidence = intent.confidence.clamp(0.0, 1.0);

    let planner = ExecutionPlanner::new(config.planner.clone());
    let plan = planner.generate_execution_plan(&intent, &PlanningContext::for_query(query));
    let validation = validate_plan(&plan, &PlanConstraints::from(&config.planner));
    tracing::debug!(
        event_name = "cli.plan.built",
        steps = plan.steps.len(),
        valid = validation.valid,
        "plan preview built"
    );

    Ok(PlanReport { can_parallelize: can_parallelize(&plan), intent, plan, validation })
}
