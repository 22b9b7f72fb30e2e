use std::path::Path;

use concierge_core::config::LoadOptions;
use concierge_core::domain::grounding::{EvidenceDocument, FallbackResponse, ResponseQualityAssessment};
use concierge_core::errors::ApplicationError;
use concierge_core::grounding::{FallbackResponder, GroundingValidator};
use serde::{Deserialize, Serialize};

use crate::commands::{load_config, read_input, CommandResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum EvidenceFile {
    Bare(Vec<EvidenceDocument>),
    Wrapped { documents: Vec<EvidenceDocument> },
}

impl EvidenceFile {
    fn into_documents(self) -> Vec<EvidenceDocument> {
        match self {
            Self::Bare(documents) | Self::Wrapped { documents } => documents,
        }
    }
}

#[derive(Serialize)]
struct GroundReport {
    assessment: ResponseQualityAssessment,
    fallback: Option<FallbackResponse>,
}

pub fn run(options: &LoadOptions, response_path: &Path, evidence_path: &Path, query: &str) -> CommandResult {
    CommandResult::payload("ground", build_report(options, response_path, evidence_path, query))
}

fn build_report(
    options: &LoadOptions,
    response_path: &Path,
    evidence_path: &Path,
    query: &str,
) -> Result<GroundReport, ApplicationError> {
    let config = load_config(options)?;
    let response = read_input("response file", response_path)?;
    let raw_evidence = read_input("evidence file", evidence_path)?;
    let evidence = serde_json::from_str::<EvidenceFile>(&raw_evidence)
        .map_err(|error| {
            ApplicationError::InvalidInput(format!(
                "evidence file must hold an array of documents or {{\"documents\": [...]}}: {error}"
            ))
        })?
        .into_documents();

    let validator = GroundingValidator::new(config.grounding.clone());
    let assessment = validator.validate_response_grounding(response.trim(), &evidence, query);
    let fallback = assessment.fallback_recommended.then(|| {
        FallbackResponder::from_config(&config.grounding).create_fallback_response(
            query,
            &evidence,
            &assessment.fallback_reasons.join("; "),
        )
    });

    Ok(GroundReport { assessment, fallback })
}
