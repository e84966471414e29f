use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ofapi::{AccountId, ApiToken};
use crate::scoring::judge::NotableQuote;
use crate::scoring::transcript::{ConversationSnapshot, CopyPasteBlast};

/// クリエイターアカウントモデル
///
/// 外部サービス側のアカウントIDとAPIトークンを持たないレコードは
/// メッセージを取得できないため採点対象外になる。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatorAccount {
    pub id: String,
    pub name: Option<String>,
    pub account_id: Option<AccountId>,
    pub api_token: Option<ApiToken>,
    pub telegram_group_id: Option<String>,
    pub telegram_id: Option<String>,
}

impl CreatorAccount {
    /// メッセージ取得に必要な認証情報が揃っているか
    pub fn has_credentials(&self) -> bool {
        self.account_id.is_some() && self.api_token.is_some()
    }

    /// 通知の宛先チャットID（グループ優先）
    pub fn notify_chat_id(&self) -> Option<&str> {
        self.telegram_group_id
            .as_deref()
            .or(self.telegram_id.as_deref())
    }
}

/// シフト記録モデル
///
/// クロックイン/アウトの区間。clock_outがNoneのシフトは勤務中。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftRecord {
    pub id: String,
    pub chatter_email: String,
    pub chatter_name: Option<String>,
    pub creator_id: String,
    pub clock_in: DateTime<Utc>,
    pub clock_out: Option<DateTime<Utc>>,
}

/// 取引モデル（外部サービスから同期されたもの）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: String,
    pub creator_id: String,
    pub fan_id: Option<String>,
    pub fan_name: Option<String>,
    pub fan_username: Option<String>,
    pub amount: f64,
    pub tx_type: Option<String>,
    pub date: DateTime<Utc>,
}

/// 時間別スコアの永続化レコード
///
/// (chatter_email, creator_id, window_start) の組で一意。
/// 一度書いたら上書きしない。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyScoreRecord {
    pub id: String,
    pub chatter_email: String,
    pub creator_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sla_score: i32,
    pub followup_score: i32,
    pub trigger_score: i32,
    pub quality_score: i32,
    pub revenue_score: i32,
    pub copy_paste_penalty: i32,
    pub missed_trigger_penalty: i32,
    pub spam_penalty: i32,
    pub total_score: i32,
    pub attribution_confidence: String,
    pub detected_archetype: Option<String>,
    pub conversations_scanned: i64,
    pub messages_analyzed: i64,
    pub robot_phrase_count: i64,
    pub creative_phrase_count: i64,
    pub ai_notes: Option<String>,
    pub mistake_tags: Vec<String>,
    pub strength_tags: Vec<String>,
    pub notable_quotes: Vec<NotableQuote>,
    pub conversation_snapshot: Option<ConversationSnapshot>,
    pub copy_paste_blasts: Vec<CopyPasteBlast>,
    pub created_at: DateTime<Utc>,
}

/// チャッタープロフィールモデル
///
/// (chatter_email, creator_id) ごとの長期集計。指数移動平均と
/// 直近10件のスコア履歴を保持する。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatterProfile {
    pub chatter_email: String,
    pub creator_id: String,
    pub chatter_name: Option<String>,
    pub avg_total_score: f64,
    pub avg_sla_score: f64,
    pub avg_followup_score: f64,
    pub avg_trigger_score: f64,
    pub avg_quality_score: f64,
    pub avg_revenue_score: f64,
    pub dominant_archetype: Option<String>,
    /// アーキタイプ出現回数（初出順を保持するためペアの配列で持つ）
    pub archetype_counts: Vec<(String, u32)>,
    /// 直近の合計スコア（最大10件、古いものから追い出す）
    pub recent_scores: Vec<i32>,
    pub improvement_index: f64,
    pub total_scoring_sessions: i64,
    pub top_strengths: Vec<String>,
    pub top_weaknesses: Vec<String>,
    pub updated_at: DateTime<Utc>,
}
