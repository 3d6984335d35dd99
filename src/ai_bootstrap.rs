// src/ai_bootstrap.rs
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::analyze::ai_adapter::{build_client_from_config, complete_bounded, AiClient, Prompt};
use crate::config::ai::AiConfig;

/// Loaded AI settings plus the client built from them.
pub struct AiRuntime {
    pub cfg: AiConfig,
    pub client: Arc<dyn AiClient>,
}

impl AiRuntime {
    pub fn from_config(cfg: AiConfig) -> Self {
        // Safe diagnostics: only provider + enabled + key length
        info!(
            provider = %cfg.provider,
            model = %cfg.model,
            enabled = cfg.enabled,
            key_len = cfg.api_key.len(),
            "AI config loaded"
        );
        let client = build_client_from_config(&cfg);
        Self { cfg, client }
    }

    /// `$AI_CONFIG_PATH` or `config/ai.json`; missing file means disabled.
    pub fn load_default() -> anyhow::Result<Self> {
        Ok(Self::from_config(AiConfig::load_default()?))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.timeout_secs)
    }

    /// One tiny completion to confirm credentials and connectivity at startup.
    /// Never fails; the result is only logged.
    pub async fn quick_probe(&self) {
        if !self.cfg.enabled {
            warn!("AI quick probe skipped: AI is disabled in config");
            return;
        }
        let prompt = Prompt::new("Reply with the single word: ready.")
            .user("Are you available?")
            .max_tokens(5);
        match complete_bounded(self.client.as_ref(), &prompt, self.timeout()).await {
            Ok(text) => info!(provider = self.client.provider_name(), reply = %text.trim(), "AI quick probe ok"),
            Err(e) => warn!(provider = self.client.provider_name(), reason = e.kind(), error = %e, "AI quick probe failed"),
        }
    }
}
