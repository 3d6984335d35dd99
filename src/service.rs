// src/service.rs
//! The two request flows, wired end to end:
//!
//! * assessment: validate → assess (model or rules) → persist → alert
//! * chat turn: load conversation → sentiment + reply → persist → alert
//!
//! Persistence and alerting problems are logged and counted; the caller still
//! gets its result. Only invalid input is an error here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::analyze::{DynAiClient, ReplyGenerator, RiskAssessor, SentimentAnalysis, SentimentAnalyzer};
use crate::assessment::{AssessmentPath, RiskAssessment};
use crate::config::engine::{AssessmentConfig, EngineConfig};
use crate::conversation::{
    trailing_window, ChatConversation, ChatMessage, ChatRole, ConversationStateManager,
    ConversationTurn,
};
use crate::notify::{AlertDispatcher, AlertTrigger, DispatchOutcome};
use crate::redact::anon_id;
use crate::snapshot::{AssessmentRequest, StudentSignalSnapshot, ValidationError};
use crate::store::{Alert, DynStore, Prediction, StoreError, StudentRecord};

/// Assessment as returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResponse {
    #[serde(flatten)]
    pub assessment: RiskAssessment,
    /// `None` when the prediction could not be stored.
    pub prediction_id: Option<Uuid>,
    pub model_version: String,
    pub alert_created: bool,
}

/// One prior message as supplied by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub student_id: String,
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub sentiment_analysis: SentimentAnalysis,
    pub conversation_id: Uuid,
}

pub struct RiskEngine {
    store: DynStore,
    assessor: RiskAssessor,
    sentiment: SentimentAnalyzer,
    replies: ReplyGenerator,
    conversations: ConversationStateManager,
    alerts: AlertDispatcher,
    versions: AssessmentConfig,
    crisis_resources: String,
}

impl RiskEngine {
    pub fn new(config: &EngineConfig, ai: DynAiClient, ai_timeout: Duration, store: DynStore) -> Self {
        let alerts = AlertDispatcher::new(store.clone(), config.alerts.clone());
        Self::with_dispatcher(config, ai, ai_timeout, store, alerts)
    }

    /// Same as [`RiskEngine::new`] with a caller-built dispatcher (custom notifier).
    pub fn with_dispatcher(
        config: &EngineConfig,
        ai: DynAiClient,
        ai_timeout: Duration,
        store: DynStore,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            assessor: RiskAssessor::new(ai.clone(), config.assessment.scoring_params(), ai_timeout),
            sentiment: SentimentAnalyzer::new(ai.clone(), ai_timeout),
            replies: ReplyGenerator::new(ai, ai_timeout),
            conversations: ConversationStateManager::new(
                store.clone(),
                config.conversation.context_window,
            ),
            alerts,
            versions: config.assessment.clone(),
            crisis_resources: config.conversation.crisis_resources.clone(),
            store,
        }
    }

    pub async fn assess_student(
        &self,
        request: AssessmentRequest,
    ) -> Result<AssessmentResponse, ValidationError> {
        let snapshot = StudentSignalSnapshot::try_from(request)?;
        let student = anon_id(&snapshot.student_id);

        if let Err(e) = self
            .store
            .upsert_student(&StudentRecord::from_snapshot(&snapshot))
            .await
        {
            warn!(student = %student, error = %e, "student profile not stored");
            crate::metrics::record_store_failure("upsert_student");
        }

        let outcome = self.assessor.assess(&snapshot).await;
        let (model_version, path_label) = match outcome.path {
            AssessmentPath::ModelAssisted => (&self.versions.model_version, "model_assisted"),
            AssessmentPath::RuleBased => (&self.versions.fallback_model_version, "rule_based"),
        };
        crate::metrics::record_assessment(path_label);

        let assessment = outcome.assessment;
        let prediction = Prediction::new(&snapshot.student_id, &assessment, model_version);
        let prediction_id = match self.store.insert_prediction(&prediction).await {
            Ok(()) => Some(prediction.id),
            Err(e) => {
                warn!(student = %student, error = %e, "prediction not stored");
                crate::metrics::record_store_failure("insert_prediction");
                None
            }
        };

        // The alert references the prediction id even if storing it failed,
        // so staff can still correlate with logs.
        let dispatched = self
            .alerts
            .dispatch(&AlertTrigger::Assessment {
                student_id: &snapshot.student_id,
                prediction_id: prediction.id,
                assessment: &assessment,
            })
            .await;

        info!(
            student = %student,
            score = assessment.risk_score,
            level = %assessment.risk_level,
            path = path_label,
            alert = dispatched.created(),
            "assessment complete"
        );

        Ok(AssessmentResponse {
            prediction_id,
            model_version: model_version.clone(),
            alert_created: dispatched.created(),
            assessment,
        })
    }

    pub async fn chat_turn(&self, request: ChatRequest) -> Result<ChatResponse, ValidationError> {
        let student_id = request.student_id.trim();
        if student_id.is_empty() {
            return Err(ValidationError::MissingStudentId);
        }
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let student = anon_id(student_id);
        let history: Vec<ChatMessage> = request
            .conversation_history
            .into_iter()
            .map(|h| ChatMessage::new(h.role, h.content, chrono::Utc::now()))
            .collect();
        let window_size = self.conversations.window_size();

        let mut turn = match self.conversations.begin_turn(student_id).await {
            Ok(t) => t,
            Err(e) => {
                warn!(student = %student, error = %e, "conversation not loaded; using caller history");
                crate::metrics::record_store_failure("load_conversation");
                ConversationTurn::detached(student_id, &history, window_size)
            }
        };
        // A brand-new conversation may still have caller-side context.
        if turn.conversation.messages.is_empty() && turn.window.is_empty() {
            turn.window = trailing_window(&history, window_size).to_vec();
        }

        let (analysis, (reply, from_model)) = tokio::join!(
            self.sentiment.analyze(message, &turn.window),
            self.replies.reply(message, &turn.window),
        );

        let mut response = reply;
        if analysis.needs_escalation && !self.crisis_resources.is_empty() {
            response.push_str("\n\n");
            response.push_str(&self.crisis_resources);
        }

        let fallback_id = turn.conversation.id;
        let conversation_id = match self
            .conversations
            .complete_turn(turn, message, &response, &analysis)
            .await
        {
            Ok(stored) => stored.id,
            Err(e) => {
                warn!(student = %student, error = %e, "conversation not stored");
                crate::metrics::record_store_failure("upsert_conversation");
                fallback_id
            }
        };

        let dispatched = self
            .alerts
            .dispatch(&AlertTrigger::Sentiment {
                student_id,
                conversation_id,
                analysis: &analysis,
            })
            .await;
        if let DispatchOutcome::Failed { reason, .. } = &dispatched {
            warn!(student = %student, reason = %reason, "escalation alert not stored");
        }

        crate::metrics::record_chat_turn(analysis.needs_escalation);
        info!(
            student = %student,
            state = %analysis.emotional_state,
            escalate = analysis.needs_escalation,
            model_reply = from_model,
            "chat turn complete"
        );

        Ok(ChatResponse {
            response,
            sentiment_analysis: analysis,
            conversation_id,
        })
    }

    pub async fn predictions(&self, student_id: &str, limit: usize) -> Result<Vec<Prediction>, StoreError> {
        self.store.predictions_for(student_id, limit).await
    }

    pub async fn alerts(&self, student_id: &str) -> Result<Vec<Alert>, StoreError> {
        self.store.alerts_for(student_id).await
    }

    pub async fn conversation(&self, student_id: &str) -> Result<Option<ChatConversation>, StoreError> {
        self.store.conversation_for(student_id).await
    }
}
