// src/config/engine.rs
//! Engine settings: server binding, assessment thresholds and version tags,
//! conversation window, alert defaults. Loaded from TOML with env overrides.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::engine::ScoringParams;

pub const DEFAULT_ENGINE_CONFIG_PATH: &str = "config/engine.toml";
pub const ENV_ENGINE_CONFIG_PATH: &str = "ENGINE_CONFIG_PATH";
pub const ENV_PORT: &str = "PORT";
pub const ENV_ALERT_RISK_THRESHOLD: &str = "ALERT_RISK_THRESHOLD";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub assessment: AssessmentConfig,
    pub conversation: ConversationConfig,
    pub alerts: AlertConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Tag stored on predictions produced by the model-assisted path.
    pub model_version: String,
    /// Tag stored on predictions produced by the rule-based path.
    pub fallback_model_version: String,
    pub expected_credits_per_semester: u32,
    pub min_credits_per_semester: u32,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            model_version: "llm-risk-v1".to_string(),
            fallback_model_version: "rules-v1".to_string(),
            expected_credits_per_semester: 15,
            min_credits_per_semester: 12,
        }
    }
}

impl AssessmentConfig {
    pub fn scoring_params(&self) -> ScoringParams {
        ScoringParams {
            expected_credits_per_semester: self.expected_credits_per_semester,
            min_credits_per_semester: self.min_credits_per_semester,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Prior messages handed to the model as context.
    pub context_window: usize,
    /// Appended to the reply when a turn escalates.
    pub crisis_resources: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            context_window: 10,
            crisis_resources: "A member of our counseling team has been notified and will reach out to you soon. If you are in immediate danger, please call your local emergency number or a crisis line right away.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Assessments scoring at or above this create an academic alert.
    pub risk_threshold: u8,
    /// Identity recorded as the creator of engine-generated alerts.
    pub created_by: String,
    pub followup_days_high: i64,
    pub followup_days_critical: i64,
    /// Optional Slack incoming-webhook for new alerts.
    pub slack_webhook_url: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            risk_threshold: 70,
            created_by: "risk-engine".to_string(),
            followup_days_high: 3,
            followup_days_critical: 1,
            slack_webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Unset means the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl EngineConfig {
    /// Resolve path from `$ENGINE_CONFIG_PATH` (must exist) or the default
    /// path (optional), then apply env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var(ENV_ENGINE_CONFIG_PATH) {
            Ok(p) => Self::from_path(&PathBuf::from(p))?,
            Err(_) => {
                let p = Path::new(DEFAULT_ENGINE_CONFIG_PATH);
                if p.exists() {
                    Self::from_path(p)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing engine config at {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut cfg: EngineConfig = toml::from_str(s)?;
        if cfg.conversation.context_window == 0 {
            cfg.conversation.context_window = ConversationConfig::default().context_window;
        }
        if cfg.assessment.expected_credits_per_semester == 0 {
            cfg.assessment.expected_credits_per_semester =
                AssessmentConfig::default().expected_credits_per_semester;
        }
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parse::<u16>(ENV_PORT) {
            self.server.port = port;
        }
        if let Some(t) = env_parse::<u8>(ENV_ALERT_RISK_THRESHOLD) {
            self.alerts.risk_threshold = t.min(100);
        }
        if let Some(url) = env_nonempty(ENV_DATABASE_URL) {
            self.database.url = Some(url);
        }
        if let Some(url) = env_nonempty(ENV_SLACK_WEBHOOK_URL) {
            self.alerts.slack_webhook_url = Some(url);
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_nonempty(name).and_then(|v| v.parse().ok())
}
