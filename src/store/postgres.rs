//! PostgreSQL store. Tables are created and migrated outside this service;
//! expected columns:
//!
//! * `students(student_id TEXT UNIQUE, gpa, attendance_rate, credits_completed,
//!   credits_enrolled, semester, updated_at)`
//! * `predictions(id UUID, student_id, risk_score, risk_factors JSONB,
//!   recommendations JSONB, confidence, model_version, created_at)`
//! * `alerts(id UUID, student_id, alert_type, severity, title, message,
//!   metadata JSONB, resolved, due_date, created_by, created_at)`
//! * `chat_conversations(id UUID, student_id TEXT UNIQUE, messages JSONB,
//!   sentiment_score, escalation_flag, last_activity)`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{Alert, Prediction, RiskFactors, Store, StoreError, StudentRecord};
use crate::conversation::{ChatConversation, ChatMessage};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }
}

fn to_u32(v: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("{column} is negative: {v}")))
}

fn student_from_row(row: &PgRow) -> Result<StudentRecord, StoreError> {
    Ok(StudentRecord {
        student_id: row.try_get("student_id")?,
        gpa: row.try_get("gpa")?,
        attendance_rate: row.try_get("attendance_rate")?,
        credits_completed: to_u32(row.try_get("credits_completed")?, "credits_completed")?,
        credits_enrolled: to_u32(row.try_get("credits_enrolled")?, "credits_enrolled")?,
        semester: to_u32(row.try_get("semester")?, "semester")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn prediction_from_row(row: &PgRow) -> Result<Prediction, StoreError> {
    let score: i32 = row.try_get("risk_score")?;
    let risk_score = u8::try_from(score)
        .ok()
        .filter(|s| *s <= 100)
        .ok_or_else(|| StoreError::Corrupt(format!("risk_score out of range: {score}")))?;
    let Json(risk_factors): Json<RiskFactors> = row.try_get("risk_factors")?;
    let Json(recommendations): Json<Vec<String>> = row.try_get("recommendations")?;
    Ok(Prediction {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        risk_score,
        risk_factors,
        recommendations,
        confidence: row.try_get("confidence")?,
        model_version: row.try_get("model_version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert, StoreError> {
    let alert_type: String = row.try_get("alert_type")?;
    let severity: String = row.try_get("severity")?;
    let Json(metadata): Json<serde_json::Value> = row.try_get("metadata")?;
    Ok(Alert {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        alert_type: alert_type.parse()?,
        severity: severity.parse()?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        metadata,
        resolved: row.try_get("resolved")?,
        due_date: row.try_get::<Option<DateTime<Utc>>, _>("due_date")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn conversation_from_row(row: &PgRow) -> Result<ChatConversation, StoreError> {
    let Json(messages): Json<Vec<ChatMessage>> = row.try_get("messages")?;
    Ok(ChatConversation {
        id: row.try_get::<Uuid, _>("id")?,
        student_id: row.try_get("student_id")?,
        messages,
        sentiment_score: row.try_get("sentiment_score")?,
        escalation_flag: row.try_get("escalation_flag")?,
        last_activity: row.try_get("last_activity")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_student(&self, s: &StudentRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO students
                (student_id, gpa, attendance_rate, credits_completed, credits_enrolled, semester, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (student_id) DO UPDATE
            SET gpa = EXCLUDED.gpa,
                attendance_rate = EXCLUDED.attendance_rate,
                credits_completed = EXCLUDED.credits_completed,
                credits_enrolled = EXCLUDED.credits_enrolled,
                semester = EXCLUDED.semester,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&s.student_id)
        .bind(s.gpa)
        .bind(s.attendance_rate)
        .bind(s.credits_completed as i32)
        .bind(s.credits_enrolled as i32)
        .bind(s.semester as i32)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn student(&self, student_id: &str) -> Result<Option<StudentRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT student_id, gpa, attendance_rate, credits_completed, credits_enrolled, semester, updated_at \
             FROM students WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(student_from_row).transpose()
    }

    async fn insert_prediction(&self, p: &Prediction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO predictions
                (id, student_id, risk_score, risk_factors, recommendations, confidence, model_version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(p.id)
        .bind(&p.student_id)
        .bind(i32::from(p.risk_score))
        .bind(Json(&p.risk_factors))
        .bind(Json(&p.recommendations))
        .bind(p.confidence)
        .bind(&p.model_version)
        .bind(p.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn predictions_for(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<Prediction>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, student_id, risk_score, risk_factors, recommendations, confidence, model_version, created_at \
             FROM predictions WHERE student_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(student_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(prediction_from_row).collect()
    }

    async fn insert_alert(&self, a: &Alert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, student_id, alert_type, severity, title, message, metadata, resolved, due_date, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(a.id)
        .bind(&a.student_id)
        .bind(a.alert_type.as_str())
        .bind(a.severity.as_str())
        .bind(&a.title)
        .bind(&a.message)
        .bind(Json(&a.metadata))
        .bind(a.resolved)
        .bind(a.due_date)
        .bind(&a.created_by)
        .bind(a.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn alerts_for(&self, student_id: &str) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, student_id, alert_type, severity, title, message, metadata, resolved, due_date, created_by, created_at \
             FROM alerts WHERE student_id = $1 ORDER BY created_at DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn conversation_for(
        &self,
        student_id: &str,
    ) -> Result<Option<ChatConversation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, student_id, messages, sentiment_score, escalation_flag, last_activity \
             FROM chat_conversations WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn upsert_conversation(
        &self,
        c: &ChatConversation,
    ) -> Result<ChatConversation, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO chat_conversations
                (id, student_id, messages, sentiment_score, escalation_flag, last_activity)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_id) DO UPDATE
            SET messages = EXCLUDED.messages,
                sentiment_score = EXCLUDED.sentiment_score,
                escalation_flag = chat_conversations.escalation_flag OR EXCLUDED.escalation_flag,
                last_activity = EXCLUDED.last_activity
            RETURNING id, student_id, messages, sentiment_score, escalation_flag, last_activity
            "#,
        )
        .bind(c.id)
        .bind(&c.student_id)
        .bind(Json(&c.messages))
        .bind(c.sentiment_score)
        .bind(c.escalation_flag)
        .bind(c.last_activity)
        .fetch_one(&self.pool)
        .await?;
        conversation_from_row(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::sentiment::SentimentAnalysis;

    /// Runs only against a prepared database: `TEST_DATABASE_URL=postgres://...`.
    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        PgStore::connect(&url, 1).await.ok()
    }

    #[tokio::test]
    async fn conversation_upsert_is_singleton_per_student() {
        let Some(store) = test_store().await else {
            return;
        };
        let student = format!("pg-test-{}", Uuid::new_v4());

        let mut first = ChatConversation::new(&student);
        let mut alarming = SentimentAnalysis::neutral();
        alarming.needs_escalation = true;
        first.record_turn("a", "b", &alarming);
        let stored = store.upsert_conversation(&first).await.unwrap();

        let mut second = ChatConversation::new(&student);
        second.record_turn("c", "d", &SentimentAnalysis::neutral());
        let merged = store.upsert_conversation(&second).await.unwrap();

        assert_eq!(merged.id, stored.id);
        assert!(merged.escalation_flag);
        assert_eq!(merged.messages.len(), 2);
    }
}
