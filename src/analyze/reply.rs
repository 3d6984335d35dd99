//! Assistant replies for the support chat.

use std::time::Duration;

use tracing::warn;

use crate::analyze::ai_adapter::{complete_bounded, DynAiClient, Prompt};
use crate::conversation::{ChatMessage, ChatRole};

const SYSTEM_PROMPT: &str = "You are a warm, supportive assistant for university students. \
Listen carefully, validate feelings, and offer practical next steps such as study strategies, \
campus resources, or talking to an advisor or counselor. Keep replies short and conversational. \
Never diagnose. If the student mentions danger to themselves or others, encourage them to contact \
emergency services or a crisis line immediately.";

/// Used when the model is unavailable. Also the base of every chat error response.
pub const FALLBACK_REPLY: &str = "Thank you for sharing this with me. I'm having trouble responding right now, \
but what you're going through matters. Please consider reaching out to your student counseling service, \
and if you feel unsafe, contact your local emergency number or a crisis line right away.";

pub struct ReplyGenerator {
    ai: DynAiClient,
    timeout: Duration,
}

impl ReplyGenerator {
    pub fn new(ai: DynAiClient, timeout: Duration) -> Self {
        Self { ai, timeout }
    }

    /// Reply text plus whether it came from the model.
    pub async fn reply(&self, message: &str, context: &[ChatMessage]) -> (String, bool) {
        let prompt = build_prompt(message, context);
        match complete_bounded(self.ai.as_ref(), &prompt, self.timeout).await {
            Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), true),
            Ok(_) => {
                warn!("model returned a blank reply; fallback reply");
                (FALLBACK_REPLY.to_string(), false)
            }
            Err(e) => {
                warn!(reason = e.kind(), error = %e, "reply generation failed; fallback reply");
                (FALLBACK_REPLY.to_string(), false)
            }
        }
    }
}

pub fn build_prompt(message: &str, context: &[ChatMessage]) -> Prompt {
    let mut prompt = Prompt::new(SYSTEM_PROMPT).max_tokens(400);
    for m in context {
        prompt = match m.role {
            ChatRole::User => prompt.user(m.content.clone()),
            ChatRole::Assistant => prompt.assistant(m.content.clone()),
        };
    }
    prompt.user(message)
}
