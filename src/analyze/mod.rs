// src/analyze/mod.rs
//! Everything that talks to the external text-generation capability:
//! the provider adapter, JSON extraction from free text, and the three
//! consumers (risk assessment, sentiment classification, support replies).

pub mod ai_adapter;
pub mod extract;
pub mod reply;
pub mod risk;
pub mod sentiment;

pub use ai_adapter::{AiClient, AiError, DynAiClient, Prompt};
pub use reply::ReplyGenerator;
pub use risk::RiskAssessor;
pub use sentiment::{EmotionalState, SentimentAnalysis, SentimentAnalyzer};
