use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::from_error("config", &error),
    };

    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    CommandResult { exit_code: 0, output: render(&config, &source) }
}

fn render(config: &AppConfig, source: &dyn Fn(&str, &[&str]) -> String) -> String {
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: String, env_keys: &[&str]| {
        lines.push(render_line(key, &value, source(key, env_keys)));
    };

    push("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["CONCIERGE_LLM_TIMEOUT_SECS"]);

    push(
        "classifier.confidence_threshold",
        config.classifier.confidence_threshold.to_string(),
        &["CONCIERGE_CLASSIFIER_CONFIDENCE_THRESHOLD"],
    );
    push("classifier.context_window", config.classifier.context_window.to_string(), &[]);

    push(
        "planner.require_grounding",
        config.planner.require_grounding.to_string(),
        &["CONCIERGE_PLANNER_REQUIRE_GROUNDING"],
    );
    push(
        "planner.max_latency_ms",
        config.planner.max_latency_ms.to_string(),
        &["CONCIERGE_PLANNER_MAX_LATENCY_MS"],
    );
    push("planner.max_cost", config.planner.max_cost.to_string(), &["CONCIERGE_PLANNER_MAX_COST"]);
    push("planner.abort_on_violation", config.planner.abort_on_violation.to_string(), &[]);

    push(
        "coordinator.max_concurrency",
        config.coordinator.max_concurrency.to_string(),
        &["CONCIERGE_COORDINATOR_MAX_CONCURRENCY"],
    );
    push("coordinator.deadline_floor_ms", config.coordinator.deadline_floor_ms.to_string(), &[]);

    push(
        "grounding.min_grounding_score",
        config.grounding.min_grounding_score.to_string(),
        &["CONCIERGE_GROUNDING_MIN_SCORE"],
    );
    push(
        "grounding.hallucination_detection_enabled",
        config.grounding.hallucination_detection_enabled.to_string(),
        &["CONCIERGE_GROUNDING_HALLUCINATION_DETECTION"],
    );
    push(
        "guardrails.checkout_enabled",
        config.guardrails.checkout_enabled.to_string(),
        &["CONCIERGE_GUARDRAILS_CHECKOUT_ENABLED"],
    );

    push(
        "logging.level",
        config.logging.level.clone(),
        &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
    );
    push(
        "logging.format",
        format!("{:?}", config.logging.format),
        &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
    );

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn nested_keys_are_found_in_toml_documents() {
        let doc: toml::Value = "[grounding]\nmin_grounding_score = 0.9\n".parse().expect("valid toml");
        assert!(contains_path(&doc, "grounding.min_grounding_score"));
        assert!(!contains_path(&doc, "grounding.max_claims"));
    }
}
