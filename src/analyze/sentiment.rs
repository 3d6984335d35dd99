//! Sentiment & escalation classification of a single chat message.
//!
//! The model's judgment is trusted for *whether* to escalate; this module only
//! enforces the output contract. Anything unusable collapses to the neutral,
//! non-escalating result: absence of signal is treated as absence of risk.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analyze::ai_adapter::{complete_bounded, DynAiClient, Prompt};
use crate::analyze::extract::parse_first_object;
use crate::conversation::{ChatMessage, ChatRole};

const SYSTEM_PROMPT: &str = "You assess the emotional wellbeing of university students chatting with a support assistant. \
Classify ONLY the latest student message, using earlier messages as context. \
Set needs_escalation to true only for concrete danger: self-harm or suicidal ideation, severe crisis, \
substance abuse, a severe emergency, or a severe depressive state. \
Respond with a single JSON object and nothing else.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalState {
    Positive,
    Neutral,
    Concerning,
    Crisis,
}

impl EmotionalState {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "concerning" => Some(Self::Concerning),
            "crisis" => Some(Self::Crisis),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Concerning => "concerning",
            Self::Crisis => "crisis",
        }
    }
}

impl fmt::Display for EmotionalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    /// -1.0 (very negative) ..= 1.0 (very positive)
    pub sentiment_score: f64,
    pub emotional_state: EmotionalState,
    pub risk_indicators: Vec<String>,
    pub needs_escalation: bool,
    pub escalation_reason: String,
}

impl SentimentAnalysis {
    /// `{0, "neutral", [], false, ""}`
    pub fn neutral() -> Self {
        Self {
            sentiment_score: 0.0,
            emotional_state: EmotionalState::Neutral,
            risk_indicators: Vec::new(),
            needs_escalation: false,
            escalation_reason: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelSentimentPayload {
    sentiment_score: f64,
    emotional_state: String,
    #[serde(default)]
    risk_indicators: Vec<String>,
    needs_escalation: bool,
    #[serde(default)]
    escalation_reason: String,
}

pub struct SentimentAnalyzer {
    ai: DynAiClient,
    timeout: Duration,
}

impl SentimentAnalyzer {
    pub fn new(ai: DynAiClient, timeout: Duration) -> Self {
        Self { ai, timeout }
    }

    pub async fn analyze(&self, message: &str, context: &[ChatMessage]) -> SentimentAnalysis {
        let prompt = build_prompt(message, context);
        let text = match complete_bounded(self.ai.as_ref(), &prompt, self.timeout).await {
            Ok(t) => t,
            Err(e) => {
                warn!(reason = e.kind(), error = %e, "sentiment call failed; neutral fallback");
                crate::metrics::record_sentiment_fallback(e.kind());
                return SentimentAnalysis::neutral();
            }
        };
        match parse_sentiment(&text) {
            Some(analysis) => {
                debug!(
                    state = %analysis.emotional_state,
                    score = analysis.sentiment_score,
                    escalate = analysis.needs_escalation,
                    "sentiment classified"
                );
                analysis
            }
            None => {
                warn!("sentiment output unusable; neutral fallback");
                crate::metrics::record_sentiment_fallback("parse");
                SentimentAnalysis::neutral()
            }
        }
    }
}

pub fn build_prompt(message: &str, context: &[ChatMessage]) -> Prompt {
    let history = if context.is_empty() {
        "(no earlier messages)".to_string()
    } else {
        context
            .iter()
            .map(|m| {
                let who = match m.role {
                    ChatRole::User => "Student",
                    ChatRole::Assistant => "Assistant",
                };
                format!("{who}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user = format!(
        "Earlier conversation:\n{history}\n\n\
         Latest student message:\n\"{message}\"\n\n\
         Return JSON with exactly these fields:\n\
         {{\n  \
           \"sentiment_score\": number from -1 to 1,\n  \
           \"emotional_state\": \"positive\" | \"neutral\" | \"concerning\" | \"crisis\",\n  \
           \"risk_indicators\": [string],\n  \
           \"needs_escalation\": boolean,\n  \
           \"escalation_reason\": string (empty when not escalating)\n\
         }}"
    );

    Prompt::new(SYSTEM_PROMPT).user(user).max_tokens(300).structured()
}

/// Extract + enforce the contract. `None` means "use the neutral fallback".
pub fn parse_sentiment(text: &str) -> Option<SentimentAnalysis> {
    let p: ModelSentimentPayload = parse_first_object(text).ok()?;
    if !p.sentiment_score.is_finite() {
        return None;
    }
    let emotional_state = EmotionalState::parse(&p.emotional_state)?;
    Some(SentimentAnalysis {
        sentiment_score: p.sentiment_score.clamp(-1.0, 1.0),
        emotional_state,
        risk_indicators: p.risk_indicators,
        needs_escalation: p.needs_escalation,
        escalation_reason: p.escalation_reason.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{AiError, BudgetedClient, DisabledClient, FailingClient, MockProvider};
    use std::sync::Arc;

    fn analyzer(ai: DynAiClient) -> SentimentAnalyzer {
        SentimentAnalyzer::new(ai, Duration::from_secs(5))
    }

    fn mock(text: &str) -> DynAiClient {
        Arc::new(BudgetedClient::new(MockProvider::new(text), 100))
    }

    #[test]
    fn parses_and_clamps() {
        let a = parse_sentiment(
            r#"```json
            {"sentiment_score": -1.4, "emotional_state": "Crisis",
             "risk_indicators": ["hopelessness"], "needs_escalation": true,
             "escalation_reason": " expressed hopelessness "}
            ```"#,
        )
        .unwrap();
        assert_eq!(a.sentiment_score, -1.0);
        assert_eq!(a.emotional_state, EmotionalState::Crisis);
        assert!(a.needs_escalation);
        assert_eq!(a.escalation_reason, "expressed hopelessness");
    }

    #[test]
    fn optional_fields_default() {
        let a = parse_sentiment(
            r#"{"sentiment_score": 0.4, "emotional_state": "positive", "needs_escalation": false}"#,
        )
        .unwrap();
        assert!(a.risk_indicators.is_empty());
        assert_eq!(a.escalation_reason, "");
    }

    #[test]
    fn contract_violations_are_rejected() {
        assert!(parse_sentiment("not json").is_none());
        assert!(parse_sentiment(r#"{"sentiment_score": 0.1, "emotional_state": "meh", "needs_escalation": false}"#).is_none());
        assert!(parse_sentiment(r#"{"sentiment_score": 0.1, "emotional_state": "neutral"}"#).is_none());
    }

    #[tokio::test]
    async fn unparsable_output_is_exactly_neutral_every_time() {
        let a = analyzer(mock("I'm sorry, I can't classify this."));
        for _ in 0..3 {
            let r = a.analyze("whatever", &[]).await;
            assert_eq!(r, SentimentAnalysis::neutral());
            assert_eq!(r.sentiment_score, 0.0);
            assert_eq!(r.emotional_state, EmotionalState::Neutral);
            assert!(r.risk_indicators.is_empty());
            assert!(!r.needs_escalation);
            assert!(r.escalation_reason.is_empty());
        }
    }

    #[tokio::test]
    async fn call_errors_never_escalate() {
        for ai in [
            Arc::new(DisabledClient) as DynAiClient,
            Arc::new(FailingClient(AiError::Transport("reset".into()))),
        ] {
            let r = analyzer(ai).analyze("I feel awful", &[]).await;
            assert_eq!(r, SentimentAnalysis::neutral());
        }
    }

    #[tokio::test]
    async fn escalation_is_taken_from_model() {
        let a = analyzer(mock(
            r#"{"sentiment_score": -0.9, "emotional_state": "crisis", "risk_indicators": ["self-harm"], "needs_escalation": true, "escalation_reason": "self-harm ideation"}"#,
        ));
        let r = a.analyze("...", &[]).await;
        assert!(r.needs_escalation);
        assert_eq!(r.risk_indicators, vec!["self-harm".to_string()]);
    }

    #[test]
    fn prompt_includes_window_and_message() {
        let ctx = vec![
            ChatMessage::user("exams are close"),
            ChatMessage::assistant("how are you feeling about them?"),
        ];
        let p = build_prompt("I can't sleep", &ctx);
        let body = &p.turns[0].content;
        assert!(body.contains("Student: exams are close"));
        assert!(body.contains("Assistant: how are you feeling"));
        assert!(body.contains("I can't sleep"));
    }

    #[test]
    fn serializes_state_lowercase() {
        let v = serde_json::to_value(SentimentAnalysis::neutral()).unwrap();
        assert_eq!(v["emotional_state"], "neutral");
        assert_eq!(v["needs_escalation"], false);
    }
}
