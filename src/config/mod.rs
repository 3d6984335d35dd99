pub mod ai;
pub mod engine;

pub use ai::AiConfig;
pub use engine::EngineConfig;
