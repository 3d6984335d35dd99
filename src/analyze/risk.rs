//! Model-assisted risk assessment with rule-based fallback.
//!
//! One call to the text-generation capability per assessment. The model's
//! answer either passes validation and wins outright, or it is discarded and
//! the rule-based result is returned. There is no partial merge.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::analyze::ai_adapter::{complete_bounded, AiError, DynAiClient, Prompt};
use crate::analyze::extract::{parse_first_object, ExtractError};
use crate::assessment::{AssessmentOutcome, RiskAssessment, RiskLevel};
use crate::engine::{self, ScoringParams};
use crate::redact::anon_id;
use crate::snapshot::StudentSignalSnapshot;

const SYSTEM_PROMPT: &str = "You are an expert in higher-education student retention. \
Assess the dropout risk of one student from the data provided. \
Respond with a single JSON object and nothing else.";

/// Why a model answer was not used.
#[derive(Debug, Error)]
pub enum ModelAnswerError {
    #[error("model call failed: {0}")]
    Call(#[from] AiError),
    #[error("model output unusable: {0}")]
    Extract(#[from] ExtractError),
    #[error("model output invalid: {0}")]
    Invalid(String),
}

impl ModelAnswerError {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelAnswerError::Call(e) => e.kind(),
            ModelAnswerError::Extract(_) => "parse",
            ModelAnswerError::Invalid(_) => "invalid",
        }
    }
}

/// Shape the model is asked to return. Everything is required; numeric
/// fields are wide so range checks can reject instead of failing to parse.
#[derive(Debug, Deserialize)]
struct ModelRiskPayload {
    risk_score: f64,
    risk_level: String,
    confidence: f64,
    primary_factors: Vec<String>,
    protective_factors: Vec<String>,
    recommendations: Vec<String>,
    intervention_priority: f64,
    explanation: String,
}

pub struct RiskAssessor {
    ai: DynAiClient,
    params: ScoringParams,
    timeout: Duration,
}

impl RiskAssessor {
    pub fn new(ai: DynAiClient, params: ScoringParams, timeout: Duration) -> Self {
        Self {
            ai,
            params,
            timeout,
        }
    }

    /// Never fails: any problem with the model path yields the rule-based
    /// assessment with the degradation noted in its explanation.
    pub async fn assess(&self, snapshot: &StudentSignalSnapshot) -> AssessmentOutcome {
        match self.model_assessment(snapshot).await {
            Ok(assessment) => {
                debug!(student = %anon_id(&snapshot.student_id), score = assessment.risk_score, "model assessment accepted");
                AssessmentOutcome::from_model(assessment)
            }
            Err(e) => {
                warn!(
                    student = %anon_id(&snapshot.student_id),
                    provider = self.ai.provider_name(),
                    reason = e.kind(),
                    error = %e,
                    "model assessment discarded; using rule-based score"
                );
                crate::metrics::record_assessment_fallback(e.kind());
                let mut fallback = engine::score_with(snapshot, &self.params);
                fallback.explanation = format!(
                    "{} Model-assisted analysis was unavailable ({}), so this result comes from the rule-based scorer.",
                    fallback.explanation,
                    e.kind()
                );
                AssessmentOutcome::fallback(fallback, e.to_string())
            }
        }
    }

    async fn model_assessment(
        &self,
        snapshot: &StudentSignalSnapshot,
    ) -> Result<RiskAssessment, ModelAnswerError> {
        let prompt = build_prompt(snapshot);
        let text = complete_bounded(self.ai.as_ref(), &prompt, self.timeout).await?;
        parse_model_assessment(&text)
    }
}

/// Prompt embedding every snapshot field plus the required JSON schema.
pub fn build_prompt(snapshot: &StudentSignalSnapshot) -> Prompt {
    let grades = if snapshot.recent_grades.is_empty() {
        "none reported".to_string()
    } else {
        snapshot
            .recent_grades
            .iter()
            .map(|g| format!("{g:.2}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let indicators = if snapshot.behavioral_indicators.is_empty() {
        "none reported".to_string()
    } else {
        serde_json::to_string(&snapshot.behavioral_indicators).unwrap_or_else(|_| "{}".into())
    };

    let user = format!(
        "Student data:\n\
         - GPA (0-4 scale): {gpa:.2}\n\
         - Attendance rate: {att:.1}%\n\
         - Credits completed: {done}\n\
         - Credits currently enrolled: {enrolled}\n\
         - Current semester: {sem}\n\
         - Recent grades (most recent last): {grades}\n\
         - Behavioral indicators: {indicators}\n\n\
         Return JSON with exactly these fields:\n\
         {{\n  \
           \"risk_score\": integer 0-100,\n  \
           \"risk_level\": \"low\" | \"medium\" | \"high\" | \"critical\",\n  \
           \"confidence\": number 0-1,\n  \
           \"primary_factors\": [string],\n  \
           \"protective_factors\": [string],\n  \
           \"recommendations\": [string],\n  \
           \"intervention_priority\": integer 1-5,\n  \
           \"explanation\": string\n\
         }}",
        gpa = snapshot.gpa,
        att = snapshot.attendance_rate,
        done = snapshot.credits_completed,
        enrolled = snapshot.credits_enrolled,
        sem = snapshot.semester,
    );

    Prompt::new(SYSTEM_PROMPT).user(user).max_tokens(700).structured()
}

/// Extract + validate. Public so the parsing contract can be tested alone.
pub fn parse_model_assessment(text: &str) -> Result<RiskAssessment, ModelAnswerError> {
    let p: ModelRiskPayload = parse_first_object(text)?;

    if !p.risk_score.is_finite() || !(0.0..=100.0).contains(&p.risk_score) {
        return Err(ModelAnswerError::Invalid(format!(
            "risk_score {} outside 0-100",
            p.risk_score
        )));
    }
    if !p.confidence.is_finite() || !(0.0..=1.0).contains(&p.confidence) {
        return Err(ModelAnswerError::Invalid(format!(
            "confidence {} outside 0-1",
            p.confidence
        )));
    }
    if !p.intervention_priority.is_finite() || !(1.0..=5.0).contains(&p.intervention_priority) {
        return Err(ModelAnswerError::Invalid(format!(
            "intervention_priority {} outside 1-5",
            p.intervention_priority
        )));
    }
    let risk_level: RiskLevel = p.risk_level.parse().map_err(ModelAnswerError::Invalid)?;

    Ok(RiskAssessment {
        risk_score: p.risk_score.round() as u8,
        risk_level,
        confidence: p.confidence,
        primary_factors: p.primary_factors,
        protective_factors: p.protective_factors,
        recommendations: p.recommendations,
        intervention_priority: p.intervention_priority.round() as u8,
        explanation: p.explanation,
    })
}
