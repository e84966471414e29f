//! Chatter Performance Scoring Engine
//!
//! シフト記録から採点ウィンドウを組み立て、チャットAPIから取得した
//! 会話をチャッター/ファンに帰属させ、決定的スコアとAI判定を合成して
//! 時間別スコアを永続化する。長期プロフィール（EMA）の更新と
//! Telegram通知までがこのモジュールの範囲。

pub mod deterministic;
pub mod engine;
pub mod fetch;
pub mod judge;
pub mod notify;
pub mod profile;
pub mod story;
pub mod transcript;
pub mod types;
pub mod window;

pub use engine::{BatchSummary, ScoringEngine, ScoringOptions};
pub use types::{
    Archetype, AttributedMessage, AttributionConfidence, ScoringResult, ScoringWindow,
};
