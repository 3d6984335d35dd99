//! AI adapter: provider abstraction + daily call budget + single-attempt timeout.
//!
//! The external text-generation capability is a black box: a prompt goes in,
//! free text comes out. Every structural guarantee is imposed by callers
//! (`analyze::extract`). Nothing here retries.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ai::AiConfig;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTurn {
    pub role: PromptRole,
    pub content: String,
}

/// What we send to the capability: a system instruction plus ordered turns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prompt {
    pub system: String,
    pub turns: Vec<PromptTurn>,
    pub max_tokens: u32,
    /// The caller parses the completion as a JSON object.
    pub structured: bool,
}

impl Prompt {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            turns: Vec::new(),
            max_tokens: 600,
            structured: false,
        }
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.turns.push(PromptTurn {
            role: PromptRole::User,
            content: content.into(),
        });
        self
    }

    pub fn assistant(mut self, content: impl Into<String>) -> Self {
        self.turns.push(PromptTurn {
            role: PromptRole::Assistant,
            content: content.into(),
        });
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    #[error("text generation is disabled")]
    Disabled,
    #[error("no API key configured")]
    MissingApiKey,
    #[error("daily call limit reached")]
    DailyLimit,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("provider returned an empty completion")]
    EmptyCompletion,
    #[error("call exceeded {0:?}")]
    Timeout(Duration),
}

impl AiError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AiError::Disabled => "disabled",
            AiError::MissingApiKey => "missing-key",
            AiError::DailyLimit => "daily-limit",
            AiError::Transport(_) => "transport",
            AiError::Status(_) => "status",
            AiError::EmptyCompletion => "empty",
            AiError::Timeout(_) => "timeout",
        }
    }
}

pub type AiFuture<'a> = Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>>;

/// Trait object used by the assessors and the chat flow.
pub trait AiClient: Send + Sync {
    /// Single completion attempt.
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> AiFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynAiClient = Arc<dyn AiClient>;

/// Run one completion bounded by `limit`. A slow provider becomes
/// `AiError::Timeout` instead of blocking the request.
pub async fn complete_bounded(
    client: &dyn AiClient,
    prompt: &Prompt,
    limit: Duration,
) -> Result<String, AiError> {
    let started = Instant::now();
    let result = match tokio::time::timeout(limit, client.complete(prompt)).await {
        Ok(r) => r,
        Err(_) => Err(AiError::Timeout(limit)),
    };
    crate::metrics::record_ai_call(
        client.provider_name(),
        started.elapsed(),
        result.as_ref().err(),
    );
    result
}

/// Factory: build a client according to config and environment variables.
///
/// * `AI_TEST_MODE=mock` returns a mock client that answers structured
///   prompts with `{}` and chat prompts with [`MOCK_CHAT_REPLY`].
/// * `AI_TEST_MODE=error` returns a client that always fails.
/// * Else if `config.enabled == false`, returns a disabled client.
/// * Else builds the real provider wrapped with the daily budget.
pub fn build_client_from_config(config: &AiConfig) -> DynAiClient {
    match std::env::var("AI_TEST_MODE").ok().as_deref() {
        Some("mock") => {
            let mock = MockProvider::new("{}").with_chat_reply(MOCK_CHAT_REPLY);
            return Arc::new(BudgetedClient::new(mock, config.daily_limit));
        }
        Some("error") => return Arc::new(FailingClient(AiError::Status(503))),
        _ => {}
    }

    if !config.enabled {
        return Arc::new(DisabledClient);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiProvider::new(config) {
            Ok(provider) => Arc::new(BudgetedClient::new(provider, config.daily_limit)),
            Err(e) => {
                tracing::warn!(error = %e, "AI provider init failed; model calls disabled");
                Arc::new(DisabledClient)
            }
        },
        other => {
            tracing::warn!(provider = other, "unsupported AI provider; model calls disabled");
            Arc::new(DisabledClient)
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does a *real* remote call. Separated so the same
/// budget wrapper serves production and tests.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(&'a self, prompt: &'a Prompt) -> AiFuture<'a>;
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible Chat Completions provider.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("student-risk-engine/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            temperature: config.temperature,
        })
    }
}

impl Provider for OpenAiProvider {
    fn fetch<'a>(&'a self, prompt: &'a Prompt) -> AiFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(AiError::MissingApiKey);
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                #[serde(default)]
                content: Option<String>,
            }

            let mut messages = Vec::with_capacity(prompt.turns.len() + 1);
            messages.push(Msg {
                role: "system",
                content: &prompt.system,
            });
            for turn in &prompt.turns {
                messages.push(Msg {
                    role: match turn.role {
                        PromptRole::User => "user",
                        PromptRole::Assistant => "assistant",
                    },
                    content: &turn.content,
                });
            }

            let req = Req {
                model: &self.model,
                messages,
                temperature: self.temperature,
                max_tokens: prompt.max_tokens,
            };

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        AiError::Timeout(Duration::ZERO)
                    } else {
                        AiError::Transport(e.to_string())
                    }
                })?;

            if !resp.status().is_success() {
                return Err(AiError::Status(resp.status().as_u16()));
            }
            let body: Resp = resp
                .json()
                .await
                .map_err(|e| AiError::Transport(e.to_string()))?;
            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            if content.trim().is_empty() {
                Err(AiError::EmptyCompletion)
            } else {
                Ok(content)
            }
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Always fails with `AiError::Disabled`; used when AI is off.
pub struct DisabledClient;

impl AiClient for DisabledClient {
    fn complete<'a>(&'a self, _prompt: &'a Prompt) -> AiFuture<'a> {
        Box::pin(async { Err(AiError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Always fails with the given error. Handy for exercising fallbacks.
pub struct FailingClient(pub AiError);

impl AiClient for FailingClient {
    fn complete<'a>(&'a self, _prompt: &'a Prompt) -> AiFuture<'a> {
        let err = self.0.clone();
        Box::pin(async move { Err(err) })
    }
    fn provider_name(&self) -> &'static str {
        "failing"
    }
}

/// Chat reply of the `AI_TEST_MODE=mock` client.
pub const MOCK_CHAT_REPLY: &str = "Thanks for telling me. That sounds like a lot to carry. \
What feels most pressing for you right now?";

/// Simple mock provider for tests/local runs: returns a fixed completion,
/// optionally a different one for unstructured (chat) prompts.
pub struct MockProvider {
    pub fixed: String,
    pub chat: Option<String>,
}

impl MockProvider {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
            chat: None,
        }
    }

    pub fn with_chat_reply(mut self, reply: impl Into<String>) -> Self {
        self.chat = Some(reply.into());
        self
    }
}

impl Provider for MockProvider {
    fn fetch<'a>(&'a self, prompt: &'a Prompt) -> AiFuture<'a> {
        let out = match &self.chat {
            Some(reply) if !prompt.structured => reply.clone(),
            _ => self.fixed.clone(),
        };
        Box::pin(async move { Ok(out) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Daily budget wrapper
// ------------------------------------------------------------

/// Counts real calls per UTC day and refuses once the limit is reached.
/// Only successful calls are counted.
pub struct BudgetedClient<P: Provider> {
    inner: P,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<P: Provider> BudgetedClient<P> {
    pub fn new(inner: P, daily_limit: u32) -> Self {
        Self {
            inner,
            daily_limit,
            counter: Mutex::new(DailyCounter::default()),
        }
    }

    /// Calls made today.
    pub fn used_today(&self) -> u32 {
        match self.counter.lock() {
            Ok(mut g) => {
                g.roll_over(today());
                g.count
            }
            Err(_) => 0,
        }
    }

    async fn complete_impl(&self, prompt: &Prompt) -> Result<String, AiError> {
        {
            let mut g = self
                .counter
                .lock()
                .map_err(|_| AiError::Transport("budget counter poisoned".into()))?;
            g.roll_over(today());
            if g.count >= self.daily_limit {
                return Err(AiError::DailyLimit);
            }
        }

        let text = self.inner.fetch(prompt).await?;

        if let Ok(mut g) = self.counter.lock() {
            g.count = g.count.saturating_add(1);
        }
        Ok(text)
    }
}

impl<P: Provider> AiClient for BudgetedClient<P> {
    fn complete<'a>(&'a self, prompt: &'a Prompt) -> AiFuture<'a> {
        Box::pin(self.complete_impl(prompt))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

#[derive(Debug, Clone)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn roll_over(&mut self, now: NaiveDate) {
        if self.date != now {
            self.date = now;
            self.count = 0;
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    impl Provider for SlowProvider {
        fn fetch<'a>(&'a self, _prompt: &'a Prompt) -> AiFuture<'a> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("late".to_string())
            })
        }
        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn disabled_client_fails_with_disabled() {
        let res = DisabledClient.complete(&Prompt::new("sys")).await;
        assert_eq!(res, Err(AiError::Disabled));
    }

    #[tokio::test]
    async fn budget_blocks_after_limit() {
        let client = BudgetedClient::new(MockProvider::new("ok"), 2);
        let p = Prompt::new("sys").user("hi");
        assert_eq!(client.complete(&p).await.as_deref(), Ok("ok"));
        assert_eq!(client.complete(&p).await.as_deref(), Ok("ok"));
        assert_eq!(client.complete(&p).await, Err(AiError::DailyLimit));
        assert_eq!(client.used_today(), 2);
    }

    #[tokio::test]
    async fn mock_answers_chat_prompts_with_plain_text() {
        let client = BudgetedClient::new(MockProvider::new("{}").with_chat_reply(MOCK_CHAT_REPLY), 10);
        let chat = Prompt::new("sys").user("rough week");
        let verdict = Prompt::new("sys").user("classify").structured();
        assert_eq!(client.complete(&chat).await.as_deref(), Ok(MOCK_CHAT_REPLY));
        assert_eq!(client.complete(&verdict).await.as_deref(), Ok("{}"));
    }

    #[tokio::test]
    async fn budget_counter_rolls_over() {
        let mut c = DailyCounter {
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            count: 9,
        };
        c.roll_over(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(c.count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_call_times_out() {
        let client = BudgetedClient::new(SlowProvider, 10);
        let res = complete_bounded(&client, &Prompt::new("sys"), Duration::from_secs(2)).await;
        assert_eq!(res, Err(AiError::Timeout(Duration::from_secs(2))));
        // Timed-out calls do not consume budget.
        assert_eq!(client.used_today(), 0);
    }

    #[tokio::test]
    async fn missing_key_short_circuits() {
        let cfg = AiConfig {
            enabled: true,
            ..AiConfig::default()
        };
        let provider = OpenAiProvider::new(&cfg).unwrap();
        let res = provider.fetch(&Prompt::new("sys")).await;
        assert_eq!(res, Err(AiError::MissingApiKey));
    }

    #[test]
    fn prompt_builder_keeps_turn_order() {
        let p = Prompt::new("sys").user("a").assistant("b").user("c");
        let roles: Vec<_> = p.turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![PromptRole::User, PromptRole::Assistant, PromptRole::User]
        );
    }
}
