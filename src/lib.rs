pub mod api;
pub mod config;
pub mod database;
pub mod ingest;
pub mod scoring;

// Re-export the main error types for convenience
pub use api::completion::JudgmentError;
pub use api::ofapi::FetchError;
pub use api::telegram::NotifyError;

// Re-export API clients and trait seams
pub use api::completion::{ChatCompletionClient, JudgmentProvider};
pub use api::ofapi::{AccountId, ApiToken, ChatSource, ChatSummary, OfapiClient, RawMessage};
pub use api::telegram::TelegramNotifier;

// Re-export scoring core
pub use scoring::engine::{BatchSummary, ScoringEngine, ScoringOptions};
pub use scoring::types::{
    Archetype, AttributedMessage, AttributionConfidence, ScoringResult, ScoringWindow,
};

// Re-export database modules
pub use database::{ChatterProfile, CreatorAccount, HourlyScoreRecord, ScoreDatabase, ShiftRecord};
