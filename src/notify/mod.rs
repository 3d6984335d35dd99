// src/notify/mod.rs
//! Alert decisions shared by the assessment and chat flows.
//!
//! [`AlertDispatcher::evaluate`] decides and builds the alert without side
//! effects; [`AlertDispatcher::dispatch`] persists it and hands it to the
//! optional outbound notifier on a background task. Neither ever fails the
//! caller.

pub mod slack;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analyze::sentiment::SentimentAnalysis;
use crate::assessment::{RiskAssessment, RiskLevel};
use crate::config::engine::AlertConfig;
use crate::redact::anon_id;
use crate::store::{Alert, AlertSeverity, AlertType, DynStore};

pub use slack::SlackNotifier;

/// Outbound channel for newly created alerts.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// A result that may warrant a human-visible alert.
#[derive(Debug, Clone, Copy)]
pub enum AlertTrigger<'a> {
    Assessment {
        student_id: &'a str,
        prediction_id: Uuid,
        assessment: &'a RiskAssessment,
    },
    Sentiment {
        student_id: &'a str,
        conversation_id: Uuid,
        analysis: &'a SentimentAnalysis,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    NotTriggered,
    Created(Alert),
    /// The alert was warranted but could not be persisted.
    Failed { alert: Alert, reason: String },
}

impl DispatchOutcome {
    pub fn created(&self) -> bool {
        matches!(self, DispatchOutcome::Created(_))
    }
}

pub struct AlertDispatcher {
    store: DynStore,
    config: AlertConfig,
    notifier: Option<Arc<dyn Notifier>>,
}

impl AlertDispatcher {
    /// Wires Slack when a webhook URL is configured.
    pub fn new(store: DynStore, config: AlertConfig) -> Self {
        let notifier = config
            .slack_webhook_url
            .as_deref()
            .map(|url| Arc::new(SlackNotifier::new(url)) as Arc<dyn Notifier>);
        Self {
            store,
            config,
            notifier,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn evaluate(&self, trigger: &AlertTrigger<'_>) -> Option<Alert> {
        self.evaluate_at(trigger, Utc::now())
    }

    /// Deterministic for a given `now`.
    pub fn evaluate_at(&self, trigger: &AlertTrigger<'_>, now: DateTime<Utc>) -> Option<Alert> {
        match *trigger {
            AlertTrigger::Assessment {
                student_id,
                prediction_id,
                assessment,
            } => {
                if assessment.risk_score < self.config.risk_threshold {
                    return None;
                }
                let severity = if assessment.risk_level == RiskLevel::Critical {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::High
                };
                let title = format!("{} dropout risk detected", capitalized(severity.as_str()));
                let factors = if assessment.primary_factors.is_empty() {
                    "none reported".to_string()
                } else {
                    assessment.primary_factors.join(", ")
                };
                let mut message = format!(
                    "Risk score {}/100 ({}). Key factors: {}.",
                    assessment.risk_score, assessment.risk_level, factors
                );
                if let Some(first) = assessment.recommendations.first() {
                    message.push_str(&format!(" Suggested action: {first}"));
                }
                let metadata = json!({
                    "source": "risk_assessment",
                    "prediction_id": prediction_id,
                    "risk_score": assessment.risk_score,
                    "risk_level": assessment.risk_level,
                    "confidence": assessment.confidence,
                    "primary_factors": assessment.primary_factors,
                    "intervention_priority": assessment.intervention_priority,
                    "triggered_at": now,
                });
                Some(self.build(student_id, AlertType::Academic, severity, title, message, metadata, now))
            }
            AlertTrigger::Sentiment {
                student_id,
                conversation_id,
                analysis,
            } => {
                if !analysis.needs_escalation {
                    return None;
                }
                let reason = if analysis.escalation_reason.is_empty() {
                    "escalation flagged by sentiment analysis"
                } else {
                    analysis.escalation_reason.as_str()
                };
                let message = format!(
                    "Emotional state: {}. Reason: {}.",
                    analysis.emotional_state, reason
                );
                let metadata = json!({
                    "source": "chat_sentiment",
                    "conversation_id": conversation_id,
                    "sentiment_score": analysis.sentiment_score,
                    "emotional_state": analysis.emotional_state,
                    "risk_indicators": analysis.risk_indicators,
                    "escalation_reason": analysis.escalation_reason,
                    "triggered_at": now,
                });
                Some(self.build(
                    student_id,
                    AlertType::Behavioral,
                    AlertSeverity::Critical,
                    "Student wellbeing escalation".to_string(),
                    message,
                    metadata,
                    now,
                ))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        student_id: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        title: String,
        message: String,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Alert {
        let followup_days = match severity {
            AlertSeverity::Critical => self.config.followup_days_critical,
            _ => self.config.followup_days_high,
        };
        Alert {
            id: Uuid::new_v4(),
            student_id: student_id.to_string(),
            alert_type,
            severity,
            title,
            message,
            metadata,
            resolved: false,
            due_date: Some(now + Duration::days(followup_days)),
            created_by: self.config.created_by.clone(),
            created_at: now,
        }
    }

    /// Evaluate, persist, notify. Persistence failure is reported in the
    /// outcome. Notification runs detached from the caller and its failure
    /// is only logged.
    pub async fn dispatch(&self, trigger: &AlertTrigger<'_>) -> DispatchOutcome {
        let Some(alert) = self.evaluate(trigger) else {
            return DispatchOutcome::NotTriggered;
        };
        let kind = alert.alert_type.as_str();

        if let Err(e) = self.store.insert_alert(&alert).await {
            warn!(
                student = %anon_id(&alert.student_id),
                alert_type = kind,
                error = %e,
                "alert warranted but could not be stored"
            );
            crate::metrics::record_alert(kind, "failed");
            crate::metrics::record_store_failure("insert_alert");
            return DispatchOutcome::Failed {
                alert,
                reason: e.to_string(),
            };
        }

        info!(
            student = %anon_id(&alert.student_id),
            alert_id = %alert.id,
            alert_type = kind,
            severity = alert.severity.as_str(),
            "alert created"
        );
        crate::metrics::record_alert(kind, "created");

        if let Some(n) = self.notifier.clone() {
            let outbound = alert.clone();
            tokio::spawn(async move {
                match n.send(&outbound).await {
                    Ok(()) => crate::metrics::record_notification(n.channel(), true),
                    Err(e) => {
                        warn!(channel = n.channel(), alert_id = %outbound.id, error = ?e, "alert notification failed");
                        crate::metrics::record_notification(n.channel(), false);
                    }
                }
            });
        }

        DispatchOutcome::Created(alert)
    }
}

fn capitalized(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::sentiment::EmotionalState;
    use crate::snapshot::StudentSignalSnapshot;
    use crate::store::memory::MemoryStore;
    use crate::store::{Store, StoreError};
    use tokio::sync::mpsc;

    fn dispatcher(store: DynStore) -> AlertDispatcher {
        AlertDispatcher::new(store, AlertConfig::default())
    }

    fn assessment_with(score: u8) -> RiskAssessment {
        let mut a = crate::engine::score(&StudentSignalSnapshot::new("s", 1.8, 55.0, 40, 6));
        a.risk_score = score;
        a.risk_level = RiskLevel::from_score(score);
        a
    }

    fn escalating() -> SentimentAnalysis {
        SentimentAnalysis {
            sentiment_score: -0.9,
            emotional_state: EmotionalState::Crisis,
            risk_indicators: vec!["hopelessness".into()],
            needs_escalation: true,
            escalation_reason: "expressed hopelessness".into(),
        }
    }

    #[test]
    fn assessment_threshold_is_inclusive() {
        let d = dispatcher(Arc::new(MemoryStore::new()));
        for (score, expect) in [(69u8, false), (70, true), (100, true)] {
            let a = assessment_with(score);
            let t = AlertTrigger::Assessment {
                student_id: "s",
                prediction_id: Uuid::new_v4(),
                assessment: &a,
            };
            assert_eq!(d.evaluate(&t).is_some(), expect, "score {score}");
        }
    }

    #[test]
    fn assessment_alert_severity_follows_level() {
        let d = dispatcher(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let pid = Uuid::new_v4();

        let high = assessment_with(75);
        let alert = d
            .evaluate_at(
                &AlertTrigger::Assessment { student_id: "s", prediction_id: pid, assessment: &high },
                now,
            )
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.alert_type, AlertType::Academic);
        assert_eq!(alert.metadata["risk_score"], 75);
        assert_eq!(alert.metadata["prediction_id"], pid.to_string());
        assert_eq!(alert.due_date, Some(now + Duration::days(3)));
        assert_eq!(alert.created_by, "risk-engine");
        assert!(!alert.resolved);

        let critical = assessment_with(95);
        let alert = d
            .evaluate_at(
                &AlertTrigger::Assessment { student_id: "s", prediction_id: pid, assessment: &critical },
                now,
            )
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.title, "Critical dropout risk detected");
        assert_eq!(alert.due_date, Some(now + Duration::days(1)));
    }

    #[test]
    fn sentiment_alert_only_on_escalation_and_always_critical() {
        let d = dispatcher(Arc::new(MemoryStore::new()));
        let cid = Uuid::new_v4();
        let calm = SentimentAnalysis::neutral();
        assert!(d
            .evaluate(&AlertTrigger::Sentiment { student_id: "s", conversation_id: cid, analysis: &calm })
            .is_none());

        let bad = escalating();
        let alert = d
            .evaluate(&AlertTrigger::Sentiment { student_id: "s", conversation_id: cid, analysis: &bad })
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.alert_type, AlertType::Behavioral);
        assert!(alert.message.contains("crisis"));
        assert!(alert.message.contains("expressed hopelessness"));
        assert_eq!(alert.metadata["conversation_id"], cid.to_string());
        assert_eq!(alert.metadata["risk_indicators"][0], "hopelessness");
    }

    #[test]
    fn threshold_is_configurable() {
        let cfg = AlertConfig {
            risk_threshold: 50,
            ..AlertConfig::default()
        };
        let d = AlertDispatcher::new(Arc::new(MemoryStore::new()), cfg);
        let a = assessment_with(55);
        let t = AlertTrigger::Assessment { student_id: "s", prediction_id: Uuid::new_v4(), assessment: &a };
        assert!(d.evaluate(&t).is_some());
    }

    #[tokio::test]
    async fn single_dispatch_creates_single_alert() {
        let store = Arc::new(MemoryStore::new());
        let d = dispatcher(store.clone());
        let a = assessment_with(90);
        let outcome = d
            .dispatch(&AlertTrigger::Assessment { student_id: "s", prediction_id: Uuid::new_v4(), assessment: &a })
            .await;
        assert!(outcome.created());
        assert_eq!(store.alert_count().unwrap(), 1);
        assert_eq!(store.alerts_for("s").await.unwrap().len(), 1);

        let low = assessment_with(10);
        let outcome = d
            .dispatch(&AlertTrigger::Assessment { student_id: "s", prediction_id: Uuid::new_v4(), assessment: &low })
            .await;
        assert_eq!(outcome, DispatchOutcome::NotTriggered);
        assert_eq!(store.alert_count().unwrap(), 1);
    }

    struct RejectingAlerts(MemoryStore);

    #[async_trait::async_trait]
    impl Store for RejectingAlerts {
        async fn upsert_student(&self, s: &crate::store::StudentRecord) -> Result<(), StoreError> {
            self.0.upsert_student(s).await
        }
        async fn student(&self, id: &str) -> Result<Option<crate::store::StudentRecord>, StoreError> {
            self.0.student(id).await
        }
        async fn insert_prediction(&self, p: &crate::store::Prediction) -> Result<(), StoreError> {
            self.0.insert_prediction(p).await
        }
        async fn predictions_for(&self, id: &str, limit: usize) -> Result<Vec<crate::store::Prediction>, StoreError> {
            self.0.predictions_for(id, limit).await
        }
        async fn insert_alert(&self, _a: &Alert) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("alerts table offline".into()))
        }
        async fn alerts_for(&self, id: &str) -> Result<Vec<Alert>, StoreError> {
            self.0.alerts_for(id).await
        }
        async fn conversation_for(&self, id: &str) -> Result<Option<crate::conversation::ChatConversation>, StoreError> {
            self.0.conversation_for(id).await
        }
        async fn upsert_conversation(
            &self,
            c: &crate::conversation::ChatConversation,
        ) -> Result<crate::conversation::ChatConversation, StoreError> {
            self.0.upsert_conversation(c).await
        }
    }

    #[tokio::test]
    async fn persist_failure_is_reported_not_raised() {
        let d = dispatcher(Arc::new(RejectingAlerts(MemoryStore::new())));
        let bad = escalating();
        let outcome = d
            .dispatch(&AlertTrigger::Sentiment { student_id: "s", conversation_id: Uuid::new_v4(), analysis: &bad })
            .await;
        match outcome {
            DispatchOutcome::Failed { alert, reason } => {
                assert_eq!(alert.severity, AlertSeverity::Critical);
                assert!(reason.contains("offline"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    struct Recording(mpsc::UnboundedSender<Uuid>);

    #[async_trait::async_trait]
    impl Notifier for Recording {
        fn channel(&self) -> &'static str {
            "test"
        }
        async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
            self.0.send(alert.id)?;
            Ok(())
        }
    }

    /// Never finishes sending.
    struct Stalled;

    #[async_trait::async_trait]
    impl Notifier for Stalled {
        fn channel(&self) -> &'static str {
            "stalled"
        }
        async fn send(&self, _alert: &Alert) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn created_alerts_are_forwarded_to_notifier() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let d = dispatcher(Arc::new(MemoryStore::new())).with_notifier(Arc::new(Recording(tx)));
        let bad = escalating();
        let outcome = d
            .dispatch(&AlertTrigger::Sentiment { student_id: "s", conversation_id: Uuid::new_v4(), analysis: &bad })
            .await;
        let DispatchOutcome::Created(alert) = outcome else {
            panic!("expected Created");
        };
        let sent = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("notifier called")
            .expect("channel open");
        assert_eq!(sent, alert.id);
    }

    #[tokio::test]
    async fn slow_notifier_does_not_hold_up_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let d = dispatcher(store.clone()).with_notifier(Arc::new(Stalled));
        let bad = escalating();
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            d.dispatch(&AlertTrigger::Sentiment { student_id: "s", conversation_id: Uuid::new_v4(), analysis: &bad }),
        )
        .await
        .expect("dispatch returned before notification finished");
        assert!(outcome.created());
        assert_eq!(store.alert_count().unwrap(), 1);
    }
}
