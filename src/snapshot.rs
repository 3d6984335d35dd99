//! Student signal snapshot: the normalized academic/behavioral inputs for one
//! student at one point in time, plus validation of the raw request shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Raw assessment request as it arrives over the wire. Numbers are kept wide
/// (`i64`/`f64`) so that out-of-range values produce a readable validation
/// error instead of an opaque deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentRequest {
    pub student_id: String,
    pub gpa: f64,
    pub attendance_rate: f64,
    pub credits_completed: i64,
    pub credits_enrolled: i64,
    pub semester: i64,
    #[serde(default)]
    pub recent_grades: Vec<f64>,
    #[serde(default)]
    pub behavioral_indicators: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("student_id must not be empty")]
    MissingStudentId,
    #[error("gpa must be between 0 and 4, got {0}")]
    GpaOutOfRange(f64),
    #[error("attendance_rate must be between 0 and 100, got {0}")]
    AttendanceOutOfRange(f64),
    #[error("{field} must be a non-negative integer, got {value}")]
    NegativeCredits { field: &'static str, value: i64 },
    #[error("semester must be at least 1, got {0}")]
    SemesterOutOfRange(i64),
    #[error("recent_grades[{index}] is not a finite number")]
    InvalidGrade { index: usize },
    #[error("message must not be empty")]
    EmptyMessage,
}

/// Immutable input to a single assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentSignalSnapshot {
    pub student_id: String,
    pub gpa: f64,
    pub attendance_rate: f64,
    pub credits_completed: u32,
    pub credits_enrolled: u32,
    pub semester: u32,
    pub recent_grades: Vec<f64>,
    pub behavioral_indicators: Map<String, Value>,
}

impl StudentSignalSnapshot {
    /// Convenience constructor used by tests and tools. No range checks.
    pub fn new(
        student_id: impl Into<String>,
        gpa: f64,
        attendance_rate: f64,
        credits_completed: u32,
        semester: u32,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            gpa,
            attendance_rate,
            credits_completed,
            credits_enrolled: 0,
            semester,
            recent_grades: Vec::new(),
            behavioral_indicators: Map::new(),
        }
    }

    pub fn with_recent_grades(mut self, grades: Vec<f64>) -> Self {
        self.recent_grades = grades;
        self
    }

    pub fn with_credits_enrolled(mut self, credits: u32) -> Self {
        self.credits_enrolled = credits;
        self
    }

    pub fn with_indicator(mut self, key: impl Into<String>, value: Value) -> Self {
        self.behavioral_indicators.insert(key.into(), value);
        self
    }
}

impl TryFrom<AssessmentRequest> for StudentSignalSnapshot {
    type Error = ValidationError;

    fn try_from(req: AssessmentRequest) -> Result<Self, Self::Error> {
        let student_id = req.student_id.trim().to_string();
        if student_id.is_empty() {
            return Err(ValidationError::MissingStudentId);
        }
        if !req.gpa.is_finite() || !(0.0..=4.0).contains(&req.gpa) {
            return Err(ValidationError::GpaOutOfRange(req.gpa));
        }
        if !req.attendance_rate.is_finite() || !(0.0..=100.0).contains(&req.attendance_rate) {
            return Err(ValidationError::AttendanceOutOfRange(req.attendance_rate));
        }
        let credits_completed = non_negative("credits_completed", req.credits_completed)?;
        let credits_enrolled = non_negative("credits_enrolled", req.credits_enrolled)?;
        if req.semester < 1 || req.semester > i64::from(u32::MAX) {
            return Err(ValidationError::SemesterOutOfRange(req.semester));
        }
        if let Some(index) = req.recent_grades.iter().position(|g| !g.is_finite()) {
            return Err(ValidationError::InvalidGrade { index });
        }

        Ok(Self {
            student_id,
            gpa: req.gpa,
            attendance_rate: req.attendance_rate,
            credits_completed,
            credits_enrolled,
            semester: req.semester as u32,
            recent_grades: req.recent_grades,
            behavioral_indicators: req.behavioral_indicators,
        })
    }
}

fn non_negative(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    u32::try_from(value).map_err(|_| ValidationError::NegativeCredits { field, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(v: serde_json::Value) -> AssessmentRequest {
        serde_json::from_value(v).expect("request shape")
    }

    #[test]
    fn valid_request_converts() {
        let req = request(json!({
            "student_id": " s-1 ",
            "gpa": 2.4,
            "attendance_rate": 71.5,
            "credits_completed": 30,
            "credits_enrolled": 15,
            "semester": 3,
            "recent_grades": [2.0, 3.1],
            "behavioral_indicators": {"library_visits": 2}
        }));
        let snap = StudentSignalSnapshot::try_from(req).unwrap();
        assert_eq!(snap.student_id, "s-1");
        assert_eq!(snap.semester, 3);
        assert_eq!(snap.recent_grades, vec![2.0, 3.1]);
        assert_eq!(snap.behavioral_indicators["library_visits"], json!(2));
    }

    #[test]
    fn optional_collections_default_to_empty() {
        let req = request(json!({
            "student_id": "s-2",
            "gpa": 3.0,
            "attendance_rate": 90,
            "credits_completed": 10,
            "credits_enrolled": 10,
            "semester": 1
        }));
        let snap = StudentSignalSnapshot::try_from(req).unwrap();
        assert!(snap.recent_grades.is_empty());
        assert!(snap.behavioral_indicators.is_empty());
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let base = json!({
            "student_id": "s-3",
            "gpa": 3.0,
            "attendance_rate": 90,
            "credits_completed": 10,
            "credits_enrolled": 10,
            "semester": 1
        });

        let mut bad_gpa = base.clone();
        bad_gpa["gpa"] = json!(4.5);
        assert_eq!(
            StudentSignalSnapshot::try_from(request(bad_gpa)),
            Err(ValidationError::GpaOutOfRange(4.5))
        );

        let mut bad_att = base.clone();
        bad_att["attendance_rate"] = json!(120);
        assert!(matches!(
            StudentSignalSnapshot::try_from(request(bad_att)),
            Err(ValidationError::AttendanceOutOfRange(_))
        ));

        let mut bad_credits = base.clone();
        bad_credits["credits_completed"] = json!(-3);
        assert_eq!(
            StudentSignalSnapshot::try_from(request(bad_credits)),
            Err(ValidationError::NegativeCredits {
                field: "credits_completed",
                value: -3
            })
        );

        let mut bad_sem = base.clone();
        bad_sem["semester"] = json!(0);
        assert_eq!(
            StudentSignalSnapshot::try_from(request(bad_sem)),
            Err(ValidationError::SemesterOutOfRange(0))
        );

        let mut no_id = base;
        no_id["student_id"] = json!("   ");
        assert_eq!(
            StudentSignalSnapshot::try_from(request(no_id)),
            Err(ValidationError::MissingStudentId)
        );
    }
}
