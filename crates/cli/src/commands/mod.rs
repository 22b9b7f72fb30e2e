pub mod config;
pub mod ground;
pub mod plan;

use std::fs;
use std::path::Path;

use concierge_core::config::{AppConfig, LoadOptions};
use concierge_core::errors::ApplicationError;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Exit code 2 marks failures the operator can fix by changing inputs or config.
    pub fn from_error(command: &str, error: &ApplicationError) -> Self {
        tracing::warn!(
            event_name = "cli.command.failed",
            command,
            error_class = error.error_class(),
            error = %error,
            "command failed"
        );
        let exit_code = if error.is_caller_error() { 2 } else { 1 };
        Self::failure(command, error.error_class(), error.to_string(), exit_code)
    }

    /// A command whose output is a JSON document of its own.
    pub fn payload<T: Serialize>(command: &str, payload: Result<T, ApplicationError>) -> Self {
        match payload.and_then(|payload| Ok(serde_json::to_string_pretty(&payload)?)) {
            Ok(output) => Self { exit_code: 0, output },
            Err(error) => Self::from_error(command, &error),
        }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(options: &LoadOptions) -> Result<AppConfig, ApplicationError> {
    Ok(AppConfig::load(options.clone())?)
}

pub(crate) fn read_input(label: &str, path: &Path) -> Result<String, ApplicationError> {
    fs::read_to_string(path).map_err(|error| {
        ApplicationError::InvalidInput(format!("could not read {label} `{}`: {error}", path.display()))
    })
}
