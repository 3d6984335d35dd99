//! # Rule-based Risk Scorer
//! Pure, testable logic that maps a `StudentSignalSnapshot` → `RiskAssessment`.
//! No I/O; this is the path every model-assisted assessment falls back to.
//!
//! Policy: three additive bands (GPA up to 40, attendance up to 30, credit
//! completion up to 30), capped at 100. Factors, recommendations and priority
//! are threshold-triggered from the same inputs.

use crate::assessment::{RiskAssessment, RiskLevel};
use crate::snapshot::StudentSignalSnapshot;

/// Confidence reported by the rule path. Fixed: the result is not probabilistic.
pub const RULE_CONFIDENCE: f64 = 0.7;

/// Credit-pace parameters. Defaults: 15 expected credits per semester,
/// 12 minimum before progress counts as slow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringParams {
    pub expected_credits_per_semester: u32,
    pub min_credits_per_semester: u32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            expected_credits_per_semester: 15,
            min_credits_per_semester: 12,
        }
    }
}

/// Score with default credit-pace parameters.
pub fn score(snapshot: &StudentSignalSnapshot) -> RiskAssessment {
    score_with(snapshot, &ScoringParams::default())
}

pub fn score_with(snapshot: &StudentSignalSnapshot, params: &ScoringParams) -> RiskAssessment {
    let semester = snapshot.semester.max(1);
    let expected_credits = f64::from(semester) * f64::from(params.expected_credits_per_semester.max(1));
    let completion_ratio = f64::from(snapshot.credits_completed) / expected_credits;

    let total = gpa_points(snapshot.gpa)
        + attendance_points(snapshot.attendance_rate)
        + completion_points(completion_ratio);
    let risk_score = total.min(100) as u8;
    let risk_level = RiskLevel::from_score(risk_score);

    let slow_progress = u64::from(snapshot.credits_completed)
        < u64::from(semester) * u64::from(params.min_credits_per_semester);
    let low_recent_grades = snapshot.recent_grades.iter().any(|g| *g < 2.0);

    // 1) Primary factors
    let mut primary_factors = Vec::new();
    if snapshot.gpa < 2.5 {
        primary_factors.push("low GPA".to_string());
    }
    if snapshot.attendance_rate < 70.0 {
        primary_factors.push("irregular attendance".to_string());
    }
    if slow_progress {
        primary_factors.push("slow academic progress".to_string());
    }
    if low_recent_grades {
        primary_factors.push("low recent grades".to_string());
    }

    // 2) Protective factors (inverse thresholds, checked independently)
    let mut protective_factors = Vec::new();
    if snapshot.gpa >= 3.0 {
        protective_factors.push("strong GPA".to_string());
    }
    if snapshot.attendance_rate >= 85.0 {
        protective_factors.push("consistent attendance".to_string());
    }
    if u64::from(snapshot.credits_completed)
        >= u64::from(semester) * u64::from(params.expected_credits_per_semester)
    {
        protective_factors.push("on-track credit progress".to_string());
    }

    // 3) Recommendations
    let mut recommendations = Vec::new();
    if snapshot.gpa < 2.5 {
        recommendations.push("Schedule academic tutoring and study-skills support".to_string());
    }
    if snapshot.attendance_rate < 70.0 {
        recommendations
            .push("Meet with the student to identify and address attendance barriers".to_string());
    }
    if slow_progress {
        recommendations
            .push("Review course load and degree plan with an academic advisor".to_string());
    }
    if low_recent_grades {
        recommendations
            .push("Arrange targeted support for courses with recent low grades".to_string());
    }
    if risk_score >= 60 {
        recommendations.push("Assign a counselor for weekly check-ins".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("Continue regular monitoring of academic progress".to_string());
    }

    let explanation = format!(
        "Rule-based assessment: score {risk_score}/100 from GPA {:.2}, attendance {:.0}% and credit completion {:.0}% of the expected pace.",
        snapshot.gpa,
        snapshot.attendance_rate,
        completion_ratio * 100.0
    );

    RiskAssessment {
        risk_score,
        risk_level,
        confidence: RULE_CONFIDENCE,
        primary_factors,
        protective_factors,
        recommendations,
        intervention_priority: intervention_priority(risk_score),
        explanation,
    }
}

fn gpa_points(gpa: f64) -> u32 {
    if gpa < 2.0 {
        40
    } else if gpa < 2.5 {
        30
    } else if gpa < 3.0 {
        15
    } else {
        0
    }
}

fn attendance_points(rate: f64) -> u32 {
    if rate < 60.0 {
        30
    } else if rate < 70.0 {
        20
    } else if rate < 80.0 {
        10
    } else {
        0
    }
}

fn completion_points(ratio: f64) -> u32 {
    if ratio < 0.6 {
        30
    } else if ratio < 0.8 {
        15
    } else {
        0
    }
}

/// >=80 → 5, >=60 → 4, >=40 → 3, >=20 → 2, else 1.
pub fn intervention_priority(score: u8) -> u8 {
    match score {
        80.. => 5,
        60..=79 => 4,
        40..=59 => 3,
        20..=39 => 2,
        _ => 1,
    }
}
