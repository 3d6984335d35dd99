// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod assessment;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod metrics;
pub mod redact;
pub mod service;
pub mod snapshot;
pub mod store;

// Model-backed analysis (adapter, extraction, risk, sentiment, replies)
pub mod analyze;

// Alert decisions and outbound notifications
pub mod notify;

pub mod ai_bootstrap;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::api::create_router;
pub use crate::service::RiskEngine;
