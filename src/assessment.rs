//! assessment.rs: output shape of a dropout-risk assessment.
//!
//! Both the model-assisted path and the rule-based fallback produce the same
//! `RiskAssessment`, so callers never need to know which one ran, except for
//! the model-version tag recorded on the persisted prediction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse risk bucket derived from the 0..=100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bands: >=80 critical, >=60 high, >=30 medium, else low.
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            30..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level '{other}'")),
        }
    }
}

/// Complete assessment as returned to callers and persisted as a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0..=100
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    /// 0.0..=1.0
    pub confidence: f64,
    pub primary_factors: Vec<String>,
    pub protective_factors: Vec<String>,
    pub recommendations: Vec<String>,
    /// 1..=5, 5 being the most urgent.
    pub intervention_priority: u8,
    pub explanation: String,
}

/// Which path produced an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentPath {
    ModelAssisted,
    RuleBased,
}

/// Result of the model-assisted assessor. `degraded` carries the reason the
/// model output was discarded, if it was.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentOutcome {
    pub assessment: RiskAssessment,
    pub path: AssessmentPath,
    pub degraded: Option<String>,
}

impl AssessmentOutcome {
    pub fn from_model(assessment: RiskAssessment) -> Self {
        Self {
            assessment,
            path: AssessmentPath::ModelAssisted,
            degraded: None,
        }
    }

    pub fn fallback(assessment: RiskAssessment, reason: impl Into<String>) -> Self {
        Self {
            assessment,
            path: AssessmentPath::RuleBased,
            degraded: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bands_match_thresholds() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(59), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(79), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(80), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<RiskLevel>(), Ok(RiskLevel::High));
        assert_eq!(" critical ".parse::<RiskLevel>(), Ok(RiskLevel::Critical));
        assert!("severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn level_serializes_lowercase() {
        let s = serde_json::to_string(&RiskLevel::Medium).unwrap();
        assert_eq!(s, "\"medium\"");
    }
}
