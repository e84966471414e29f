use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ofapi::{AccountId, ApiToken};

/// 帰属の確度
///
/// 同じ(チャッター, クリエイター)の組にウィンドウ内で複数のシフトが
/// 重なっていた場合、どのメッセージを誰が送ったか判別できないためlow。
/// 現状は記録のみでスコアには影響させない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributionConfidence {
    High,
    Low,
}

impl AttributionConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

/// 採点ウィンドウ
///
/// (チャッター, クリエイター, 1時間) が採点の1単位。
/// ウィンドウ境界はUTCで `[window_start, window_end)`。
#[derive(Debug, Clone)]
pub struct ScoringWindow {
    pub chatter_email: String,
    pub creator_id: String,
    pub creator_name: String,
    pub account_id: AccountId,
    pub api_token: ApiToken,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub attribution_confidence: AttributionConfidence,
}

/// 帰属済みメッセージ
///
/// ウィンドウ単位で組み立てる一時データ。永続化されるのは
/// 派生した集計とスナップショットのみ。
#[derive(Debug, Clone)]
pub struct AttributedMessage {
    pub text: String,
    /// true = 送信（チャッター側）、false = 受信（ファン側）
    pub is_chatter: bool,
    pub created_at: DateTime<Utc>,
    pub chat_id: String,
    pub fan_name: Option<String>,
}

/// チャッターのアーキタイプ
///
/// AI判定は自由文字列を返すため、境界で既知の集合に正規化する。
/// 未知の値は `Unrecognized` に落とし、プロフィール集計に
/// 任意文字列が入り込まないようにする。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archetype {
    /// 「yes babe」の繰り返し、自動操縦状態
    YesBabeRobot,
    /// 質問攻めで空気を壊す
    InterviewBot,
    /// 全肯定で緊張感がない
    Doormat,
    /// 押しが強すぎて空気が読めない
    Commander,
    /// 焦らしは上手いがクローズしない
    Tease,
    /// ファンごとにスタイルを変える理想形
    Chameleon,
    /// 既知の集合に正規化できなかった値
    Unrecognized,
}

impl Archetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YesBabeRobot => "yes_babe_robot",
            Self::InterviewBot => "interview_bot",
            Self::Doormat => "doormat",
            Self::Commander => "commander",
            Self::Tease => "tease",
            Self::Chameleon => "chameleon",
            Self::Unrecognized => "unrecognized",
        }
    }

    /// 通知カードに出す表示名
    pub fn display_label(&self) -> &'static str {
        match self {
            Self::YesBabeRobot => "Yes Babe Robot",
            Self::InterviewBot => "The Interview Bot",
            Self::Doormat => "The Doormat",
            Self::Commander => "The Commander",
            Self::Tease => "The Tease",
            Self::Chameleon => "The Chameleon (Gold Standard)",
            Self::Unrecognized => "Unrecognized",
        }
    }

    /// AI出力の自由文字列を正規化する
    ///
    /// 空文字・"null"・"none" はアーキタイプ未検出としてNone。
    /// 未知の非空文字列は `Unrecognized`。
    pub fn from_raw(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "" | "null" | "none" => None,
            "yes_babe_robot" => Some(Self::YesBabeRobot),
            "interview_bot" => Some(Self::InterviewBot),
            "doormat" => Some(Self::Doormat),
            "commander" => Some(Self::Commander),
            "tease" => Some(Self::Tease),
            "chameleon" => Some(Self::Chameleon),
            _ => Some(Self::Unrecognized),
        }
    }
}

/// 1ウィンドウの採点結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResult {
    pub chatter_email: String,
    pub creator_id: String,
    pub creator_name: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub attribution_confidence: AttributionConfidence,
    /// SLA（応答速度）: 0-25
    pub sla_score: i32,
    /// フォローアップ: 0-20
    pub followup_score: i32,
    /// 購買シグナル対応: 0-20
    pub trigger_score: i32,
    /// 品質・パーソナライズ: 0-20
    pub quality_score: i32,
    /// 収益: 0-15
    pub revenue_score: i32,
    /// コピペペナルティ: 0 または -10
    pub copy_paste_penalty: i32,
    /// シグナル無視ペナルティ: 0 または -10
    pub missed_trigger_penalty: i32,
    /// スパムペナルティ: 0 または -10
    pub spam_penalty: i32,
    /// 合計: [0, 100] にクランプ済み
    pub total_score: i32,
    pub detected_archetype: Option<Archetype>,
    pub conversations_scanned: usize,
    pub messages_analyzed: usize,
    pub robot_phrase_count: usize,
    pub creative_phrase_count: usize,
    pub ai_notes: Option<String>,
    pub mistake_tags: Vec<String>,
    pub strength_tags: Vec<String>,
}

/// タグ文字列の境界サニタイズ
///
/// 前後空白を除去し、空要素を捨て、長さと件数を抑える。
pub fn sanitize_tags(raw: Vec<String>) -> Vec<String> {
    raw.into_iter()
        .map(|t| t.trim().chars().take(60).collect::<String>())
        .filter(|t| !t.is_empty())
        .take(12)
        .collect()
}
