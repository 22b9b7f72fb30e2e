use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub classifier: ClassifierConfig,
    pub planner: PlannerConfig,
    pub coordinator: CoordinatorConfig,
    pub grounding: GroundingConfig,
    pub guardrails: GuardrailConfig,
    pub logging: LoggingConfig,
}

/// Settings for the language model collaborator handed to the runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct LlmConfig {
    /// Bound on every classification and composition call.
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassifierConfig {
    /// Below this confidence the classifier asks the knowledge collaborator for context.
    pub confidence_threshold: f64,
    /// Number of recent conversation turns passed to the classifier.
    pub context_window: usize,
    pub disambiguate_questions: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannerConfig {
    pub fallback_confidence_threshold: f64,
    pub require_grounding: bool,
    pub max_latency_ms: u64,
    pub max_cost: f64,
    pub abort_on_violation: bool,
    pub retrieval_top_k: u32,
    pub default_max_retries: u32,
    pub backoff_base_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CoordinatorConfig {
    pub max_concurrency: usize,
    /// Overall deadline is the plan's estimated latency times this factor.
    pub deadline_factor: f64,
    pub deadline_floor_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroundingConfig {
    pub min_grounding_score: f64,
    pub min_citation_relevance: f64,
    pub semantic_similarity_threshold: f64,
    pub key_phrase_overlap: f64,
    pub hallucination_threshold: f64,
    pub fallback_threshold: f64,
    pub max_claims: usize,
    pub hallucination_detection_enabled: bool,
    /// Treat a response with no checkable claims as grounded.
    pub vacuous_grounding: bool,
    pub max_fallback_citations: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GuardrailConfig {
    pub checkout_enabled: bool,
    pub min_checkout_confidence: f64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub llm_timeout_secs: Option<u64>,
    pub require_grounding: Option<bool>,
    pub max_concurrency: Option<usize>,
    pub min_grounding_score: Option<f64>,
    pub hallucination_detection_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { confidence_threshold: 0.7, context_window: 5, disambiguate_questions: true }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            fallback_confidence_threshold: 0.6,
            require_grounding: true,
            max_latency_ms: 5_000,
            max_cost: 0.05,
            abort_on_violation: false,
            retrieval_top_k: 10,
            default_max_retries: 2,
            backoff_base_ms: 100,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { max_concurrency: 4, deadline_factor: 4.0, deadline_floor_ms: 2_000 }
    }
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            min_grounding_score: 0.85,
            min_citation_relevance: 0.7,
            semantic_similarity_threshold: 0.6,
            key_phrase_overlap: 0.7,
            hallucination_threshold: 0.4,
            fallback_threshold: 0.6,
            max_claims: 20,
            hallucination_detection_enabled: true,
            vacuous_grounding: true,
            max_fallback_citations: 3,
        }
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self { checkout_enabled: true, min_checkout_confidence: 0.8 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            classifier: ClassifierConfig::default(),
            planner: PlannerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            grounding: GroundingConfig::default(),
            guardrails: GuardrailConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(classifier) = patch.classifier {
            if let Some(confidence_threshold) = classifier.confidence_threshold {
                self.classifier.confidence_threshold = confidence_threshold;
            }
            if let Some(context_window) = classifier.context_window {
                self.classifier.context_window = context_window;
            }
            if let Some(disambiguate_questions) = classifier.disambiguate_questions {
                self.classifier.disambiguate_questions = disambiguate_questions;
            }
        }

        if let Some(planner) = patch.planner {
            if let Some(value) = planner.fallback_confidence_threshold {
                self.planner.fallback_confidence_threshold = value;
            }
            if let Some(value) = planner.require_grounding {
                self.planner.require_grounding = value;
            }
            if let Some(value) = planner.max_latency_ms {
                self.planner.max_latency_ms = value;
            }
            if let Some(value) = planner.max_cost {
                self.planner.max_cost = value;
            }
            if let Some(value) = planner.abort_on_violation {
                self.planner.abort_on_violation = value;
            }
            if let Some(value) = planner.retrieval_top_k {
                self.planner.retrieval_top_k = value;
            }
            if let Some(value) = planner.default_max_retries {
                self.planner.default_max_retries = value;
            }
            if let Some(value) = planner.backoff_base_ms {
                self.planner.backoff_base_ms = value;
            }
        }

        if let Some(coordinator) = patch.coordinator {
            if let Some(max_concurrency) = coordinator.max_concurrency {
                self.coordinator.max_concurrency = max_concurrency;
            }
            if let Some(deadline_factor) = coordinator.deadline_factor {
                self.coordinator.deadline_factor = deadline_factor;
            }
            if let Some(deadline_floor_ms) = coordinator.deadline_floor_ms {
                self.coordinator.deadline_floor_ms = deadline_floor_ms;
            }
        }

        if let Some(grounding) = patch.grounding {
            if let Some(value) = grounding.min_grounding_score {
                self.grounding.min_grounding_score = value;
            }
            if let Some(value) = grounding.min_citation_relevance {
                self.grounding.min_citation_relevance = value;
            }
            if let Some(value) = grounding.semantic_similarity_threshold {
                self.grounding.semantic_similarity_threshold = value;
            }
            if let Some(value) = grounding.key_phrase_overlap {
                self.grounding.key_phrase_overlap = value;
            }
            if let Some(value) = grounding.hallucination_threshold {
                self.grounding.hallucination_threshold = value;
            }
            if let Some(value) = grounding.fallback_threshold {
                self.grounding.fallback_threshold = value;
            }
            if let Some(value) = grounding.max_claims {
                self.grounding.max_claims = value;
            }
            if let Some(value) = grounding.hallucination_detection_enabled {
                self.grounding.hallucination_detection_enabled = value;
            }
            if let Some(value) = grounding.vacuous_grounding {
                self.grounding.vacuous_grounding = value;
            }
            if let Some(value) = grounding.max_fallback_citations {
                self.grounding.max_fallback_citations = value;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(checkout_enabled) = guardrails.checkout_enabled {
                self.guardrails.checkout_enabled = checkout_enabled;
            }
            if let Some(min_checkout_confidence) = guardrails.min_checkout_confidence {
                self.guardrails.min_checkout_confidence = min_checkout_confidence;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_CLASSIFIER_CONFIDENCE_THRESHOLD") {
            self.classifier.confidence_threshold =
                parse_f64("CONCIERGE_CLASSIFIER_CONFIDENCE_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_PLANNER_REQUIRE_GROUNDING") {
            self.planner.require_grounding =
                parse_bool("CONCIERGE_PLANNER_REQUIRE_GROUNDING", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_PLANNER_MAX_LATENCY_MS") {
            self.planner.max_latency_ms = parse_u64("CONCIERGE_PLANNER_MAX_LATENCY_MS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_PLANNER_MAX_COST") {
            self.planner.max_cost = parse_f64("CONCIERGE_PLANNER_MAX_COST", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_COORDINATOR_MAX_CONCURRENCY") {
            self.coordinator.max_concurrency =
                parse_usize("CONCIERGE_COORDINATOR_MAX_CONCURRENCY", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_GROUNDING_MIN_SCORE") {
            self.grounding.min_grounding_score =
                parse_f64("CONCIERGE_GROUNDING_MIN_SCORE", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_GROUNDING_HALLUCINATION_DETECTION") {
            self.grounding.hallucination_detection_enabled =
                parse_bool("CONCIERGE_GROUNDING_HALLUCINATION_DETECTION", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_GUARDRAILS_CHECKOUT_ENABLED") {
            self.guardrails.checkout_enabled =
                parse_bool("CONCIERGE_GUARDRAILS_CHECKOUT_ENABLED", &value)?;
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(timeout_secs) = overrides.llm_timeout_secs {
            self.llm.timeout_secs = timeout_secs;
        }
        if let Some(require_grounding) = overrides.require_grounding {
            self.planner.require_grounding = require_grounding;
        }
        if let Some(max_concurrency) = overrides.max_concurrency {
            self.coordinator.max_concurrency = max_concurrency;
        }
        if let Some(min_grounding_score) = overrides.min_grounding_score {
            self.grounding.min_grounding_score = min_grounding_score;
        }
        if let Some(enabled) = overrides.hallucination_detection_enabled {
            self.grounding.hallucination_detection_enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_classifier(&self.classifier)?;
        validate_planner(&self.planner)?;
        validate_coordinator(&self.coordinator)?;
        validate_grounding(&self.grounding)?;
        validate_guardrails(&self.guardrails)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_unit(key: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must be in range 0.0..=1.0 (got {value})")))
    }
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_classifier(classifier: &ClassifierConfig) -> Result<(), ConfigError> {
    validate_unit("classifier.confidence_threshold", classifier.confidence_threshold)
}

fn validate_planner(planner: &PlannerConfig) -> Result<(), ConfigError> {
    validate_unit("planner.fallback_confidence_threshold", planner.fallback_confidence_threshold)?;

    if planner.max_latency_ms == 0 {
        return Err(ConfigError::Validation(
            "planner.max_latency_ms must be greater than zero".to_string(),
        ));
    }
    if !planner.max_cost.is_finite() || planner.max_cost <= 0.0 {
        return Err(ConfigError::Validation(
            "planner.max_cost must be a positive number".to_string(),
        ));
    }
    if planner.retrieval_top_k == 0 {
        return Err(ConfigError::Validation(
            "planner.retrieval_top_k must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_coordinator(coordinator: &CoordinatorConfig) -> Result<(), ConfigError> {
    if coordinator.max_concurrency == 0 {
        return Err(ConfigError::Validation(
            "coordinator.max_concurrency must be greater than zero".to_string(),
        ));
    }
    if !coordinator.deadline_factor.is_finite() || coordinator.deadline_factor < 1.0 {
        return Err(ConfigError::Validation(
            "coordinator.deadline_factor must be at least 1.0".to_string(),
        ));
    }
    if coordinator.deadline_floor_ms == 0 {
        return Err(ConfigError::Validation(
            "coordinator.deadline_floor_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_grounding(grounding: &GroundingConfig) -> Result<(), ConfigError> {
    validate_unit("grounding.min_grounding_score", grounding.min_grounding_score)?;
    validate_unit("grounding.min_citation_relevance", grounding.min_citation_relevance)?;
    validate_unit(
        "grounding.semantic_similarity_threshold",
        grounding.semantic_similarity_threshold,
    )?;
    validate_unit("grounding.key_phrase_overlap", grounding.key_phrase_overlap)?;
    validate_unit("grounding.hallucination_threshold", grounding.hallucination_threshold)?;
    validate_unit("grounding.fallback_threshold", grounding.fallback_threshold)?;

    if grounding.max_claims == 0 {
        return Err(ConfigError::Validation(
            "grounding.max_claims must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    validate_unit("guardrails.min_checkout_confidence", guardrails.min_checkout_confidence)
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    classifier: Option<ClassifierPatch>,
    planner: Option<PlannerPatch>,
    coordinator: Option<CoordinatorPatch>,
    grounding: Option<GroundingPatch>,
    guardrails: Option<GuardrailPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    confidence_threshold: Option<f64>,
    context_window: Option<usize>,
    disambiguate_questions: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerPatch {
    fallback_confidence_threshold: Option<f64>,
    require_grounding: Option<bool>,
    max_latency_ms: Option<u64>,
    max_cost: Option<f64>,
    abort_on_violation: Option<bool>,
    retrieval_top_k: Option<u32>,
    default_max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CoordinatorPatch {
    max_concurrency: Option<usize>,
    deadline_factor: Option<f64>,
    deadline_floor_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingPatch {
    min_grounding_score: Option<f64>,
    min_citation_relevance: Option<f64>,
    semantic_similarity_threshold: Option<f64>,
    key_phrase_overlap: Option<f64>,
    hallucination_threshold: Option<f64>,
    fallback_threshold: Option<f64>,
    max_claims: Option<usize>,
    hallucination_detection_enabled: Option<bool>,
    vacuous_grounding: Option<bool>,
    max_fallback_citations: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    checkout_enabled: Option<bool>,
    min_checkout_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_carry_documented_policy_thresholds() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.grounding.min_grounding_score == 0.85, "min grounding score default")?;
        ensure(config.grounding.min_citation_relevance == 0.7, "citation relevance default")?;
        ensure(config.grounding.semantic_similarity_threshold == 0.6, "jaccard default")?;
        ensure(config.grounding.hallucination_threshold == 0.4, "hallucination cutoff default")?;
        ensure(config.grounding.fallback_threshold == 0.6, "fallback threshold default")?;
        ensure(config.classifier.confidence_threshold == 0.7, "classifier threshold default")?;
        ensure(
            config.planner.fallback_confidence_threshold == 0.6,
            "fallback plan threshold default",
        )?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact log format default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CONCIERGE_LLM_TIMEOUT", "45");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[llm]
timeout_secs = ${TEST_CONCIERGE_LLM_TIMEOUT}

[grounding]
min_grounding_score = 0.9
max_claims = 8
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.timeout_secs == 45, "llm timeout should be interpolated from environment")?;
            ensure(config.grounding.min_grounding_score == 0.9, "grounding score from file")?;
            ensure(config.grounding.max_claims == 8, "max claims from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_CONCIERGE_LLM_TIMEOUT"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_LOG_LEVEL", "warn");
        env::set_var("CONCIERGE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CONCIERGE_LOG_LEVEL", "CONCIERGE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_COORDINATOR_MAX_CONCURRENCY", "6");
        env::set_var("CONCIERGE_GROUNDING_MIN_SCORE", "0.75");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[coordinator]
max_concurrency = 2

[grounding]
min_grounding_score = 0.95

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    min_grounding_score: Some(0.8),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.coordinator.max_concurrency == 6, "env should win over file")?;
            ensure(config.grounding.min_grounding_score == 0.8, "override should win over env")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["CONCIERGE_COORDINATOR_MAX_CONCURRENCY", "CONCIERGE_GROUNDING_MIN_SCORE"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_GROUNDING_MIN_SCORE", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("grounding.min_grounding_score")
            );
            ensure(has_message, "validation failure should name the offending key")
        })();

        clear_vars(&["CONCIERGE_GROUNDING_MIN_SCORE"]);
        result
    }

    #[test]
    fn malformed_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_COORDINATOR_MAX_CONCURRENCY", "many");

        let result = (|| -> Result<(), String> {
            let rejected = matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::InvalidEnvOverride { ref key, .. })
                    if key == "CONCIERGE_COORDINATOR_MAX_CONCURRENCY"
            );
            ensure(rejected, "non-numeric concurrency should be rejected")
        })();

        clear_vars(&["CONCIERGE_COORDINATOR_MAX_CONCURRENCY"]);
        result
    }

    #[test]
    fn llm_timeout_outside_range_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_LLM_TIMEOUT_SECS", "0");

        let result = (|| -> Result<(), String> {
            let rejected = matches!(
                AppConfig::load(LoadOptions::default()),
                Err(ConfigError::Validation(ref message)) if message.contains("llm.timeout_secs")
            );
            ensure(rejected, "zero llm timeout should fail validation")?;

            let overridden = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides { llm_timeout_secs: Some(12), ..ConfigOverrides::default() },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(overridden.llm.timeout_secs == 12, "override should win over env")
        })();

        clear_vars(&["CONCIERGE_LLM_TIMEOUT_SECS"]);
        result
    }
}
