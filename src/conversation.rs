//! conversation.rs: one ongoing support conversation per student.
//!
//! The transcript is append-only and chronological. Only the trailing window
//! is ever shown to the model; the full transcript is what gets persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyze::sentiment::SentimentAnalysis;
use crate::store::{DynStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content, Utc::now())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content, Utc::now())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConversation {
    pub id: Uuid,
    pub student_id: String,
    pub messages: Vec<ChatMessage>,
    pub sentiment_score: f64,
    /// Only ever goes false → true here; clearing it is a human decision.
    pub escalation_flag: bool,
    pub last_activity: DateTime<Utc>,
}

impl ChatConversation {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: student_id.into(),
            messages: Vec::new(),
            sentiment_score: 0.0,
            escalation_flag: false,
            last_activity: Utc::now(),
        }
    }

    /// Append the user message and the reply, stamped at append time with
    /// strictly increasing timestamps, and refresh sentiment state.
    pub fn record_turn(
        &mut self,
        user_message: &str,
        assistant_message: &str,
        sentiment: &SentimentAnalysis,
    ) {
        let user_ts = self.next_timestamp(Utc::now());
        self.messages
            .push(ChatMessage::new(ChatRole::User, user_message, user_ts));
        let reply_ts = self.next_timestamp(Utc::now());
        self.messages
            .push(ChatMessage::new(ChatRole::Assistant, assistant_message, reply_ts));

        self.sentiment_score = sentiment.sentiment_score;
        self.escalation_flag = self.escalation_flag || sentiment.needs_escalation;
        self.last_activity = reply_ts;
    }

    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.messages.last() {
            Some(last) if now <= last.timestamp => last.timestamp + Duration::microseconds(1),
            _ => now,
        }
    }
}

/// The last `n` messages, oldest first.
pub fn trailing_window(messages: &[ChatMessage], n: usize) -> &[ChatMessage] {
    &messages[messages.len().saturating_sub(n)..]
}

/// State loaded at the start of a chat turn.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub conversation: ChatConversation,
    /// Trailing window of the messages that existed before this turn.
    pub window: Vec<ChatMessage>,
    /// The stored transcript could not be read, so `conversation` is not the
    /// canonical state and must not be written back.
    pub detached: bool,
}

impl ConversationTurn {
    /// A turn not backed by stored state, seeded from caller-supplied history.
    /// Used when the store cannot be read.
    pub fn detached(student_id: &str, history: &[ChatMessage], window: usize) -> Self {
        Self {
            conversation: ChatConversation::new(student_id),
            window: trailing_window(history, window).to_vec(),
            detached: true,
        }
    }
}

pub struct ConversationStateManager {
    store: DynStore,
    window: usize,
}

impl ConversationStateManager {
    pub fn new(store: DynStore, window: usize) -> Self {
        Self {
            store,
            window: window.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window
    }

    /// Load the student's conversation (or start an empty one) and cut the
    /// context window from it.
    pub async fn begin_turn(&self, student_id: &str) -> Result<ConversationTurn, StoreError> {
        let conversation = self
            .store
            .conversation_for(student_id)
            .await?
            .unwrap_or_else(|| ChatConversation::new(student_id));
        let window = trailing_window(&conversation.messages, self.window).to_vec();
        Ok(ConversationTurn {
            conversation,
            window,
            detached: false,
        })
    }

    /// Append both messages and persist the full transcript. The store
    /// upserts by student id, so this never creates a second row.
    ///
    /// A detached turn is never persisted: writing it would replace the stored
    /// transcript with a partial one.
    pub async fn complete_turn(
        &self,
        turn: ConversationTurn,
        user_message: &str,
        assistant_message: &str,
        sentiment: &SentimentAnalysis,
    ) -> Result<ChatConversation, StoreError> {
        let mut conversation = turn.conversation;
        conversation.record_turn(user_message, assistant_message, sentiment);
        if turn.detached {
            return Err(StoreError::Unavailable(
                "conversation was not loaded; stored transcript left untouched".into(),
            ));
        }
        self.store.upsert_conversation(&conversation).await
    }
}
