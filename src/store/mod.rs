// src/store/mod.rs
//! Storage contract for students, predictions, alerts and conversations.
//!
//! Two implementations: [`memory::MemoryStore`] (default, tests) and
//! [`postgres::PgStore`] against an externally managed schema. The only
//! shared mutable record is the per-student conversation, which both
//! implementations upsert atomically by student id.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::assessment::{RiskAssessment, RiskLevel};
use crate::conversation::ChatConversation;
use crate::snapshot::StudentSignalSnapshot;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Latest academic profile per student, upserted on every assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub gpa: f64,
    pub attendance_rate: f64,
    pub credits_completed: u32,
    pub credits_enrolled: u32,
    pub semester: u32,
    pub updated_at: DateTime<Utc>,
}

impl StudentRecord {
    pub fn from_snapshot(snapshot: &StudentSignalSnapshot) -> Self {
        Self {
            student_id: snapshot.student_id.clone(),
            gpa: snapshot.gpa,
            attendance_rate: snapshot.attendance_rate,
            credits_completed: snapshot.credits_completed,
            credits_enrolled: snapshot.credits_enrolled,
            semester: snapshot.semester,
            updated_at: Utc::now(),
        }
    }
}

/// Structured factor payload stored alongside a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub primary_factors: Vec<String>,
    pub protective_factors: Vec<String>,
    pub risk_level: RiskLevel,
    pub intervention_priority: u8,
}

/// Immutable, append-only record of one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub student_id: String,
    pub risk_score: u8,
    pub risk_factors: RiskFactors,
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    pub fn new(student_id: &str, assessment: &RiskAssessment, model_version: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: student_id.to_string(),
            risk_score: assessment.risk_score,
            risk_factors: RiskFactors {
                primary_factors: assessment.primary_factors.clone(),
                protective_factors: assessment.protective_factors.clone(),
                risk_level: assessment.risk_level,
                intervention_priority: assessment.intervention_priority,
            },
            recommendations: assessment.recommendations.clone(),
            confidence: assessment.confidence,
            model_version: model_version.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Academic,
    Attendance,
    Financial,
    Behavioral,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Academic => "academic",
            AlertType::Attendance => "attendance",
            AlertType::Financial => "financial",
            AlertType::Behavioral => "behavioral",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "academic" => Ok(AlertType::Academic),
            "attendance" => Ok(AlertType::Attendance),
            "financial" => Ok(AlertType::Financial),
            "behavioral" => Ok(AlertType::Behavioral),
            other => Err(StoreError::Corrupt(format!("unknown alert type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(StoreError::Corrupt(format!("unknown alert severity '{other}'"))),
        }
    }
}

/// Human-visible notice for staff. Resolution happens outside this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub student_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub metadata: Value,
    pub resolved: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace the profile keyed by student id.
    async fn upsert_student(&self, student: &StudentRecord) -> Result<(), StoreError>;
    async fn student(&self, student_id: &str) -> Result<Option<StudentRecord>, StoreError>;

    async fn insert_prediction(&self, prediction: &Prediction) -> Result<(), StoreError>;
    /// Newest first.
    async fn predictions_for(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError>;

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;
    /// Newest first.
    async fn alerts_for(&self, student_id: &str) -> Result<Vec<Alert>, StoreError>;

    async fn conversation_for(
        &self,
        student_id: &str,
    ) -> Result<Option<ChatConversation>, StoreError>;

    /// Atomic upsert keyed by student id. The full transcript of the caller
    /// replaces the stored one, an existing row keeps its id, and the
    /// escalation flag is OR-ed with the stored value. Returns the stored row.
    async fn upsert_conversation(
        &self,
        conversation: &ChatConversation,
    ) -> Result<ChatConversation, StoreError>;
}

pub type DynStore = Arc<dyn Store>;
