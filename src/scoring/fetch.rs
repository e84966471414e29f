//! メッセージ取得と帰属
//!
//! チャットAPIから直近の会話を取得し、ウィンドウ内のメッセージを
//! チャッター/ファンに帰属させ、応答遅延サンプルを集める。
//! チャット単位の取得失敗はスキップ、ソース全体の失敗は空の結果を
//! 返すだけで、呼び出し側にエラーは伝播させない。

use regex::Regex;
use std::sync::LazyLock;

use crate::api::ofapi::ChatSource;
use crate::scoring::types::{AttributedMessage, ScoringWindow};

/// ファンからの応答とみなす最大遅延（秒）。これを超える間隔は
/// 別の会話の再開として無視する。
const MAX_RESPONSE_DELAY_SECS: f64 = 7200.0;

/// 1会話あたりの取得メッセージ数上限
const MESSAGES_PER_CHAT: usize = 50;

/// 帰属処理の結果
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// チャッター送信メッセージの本文（検出器用）
    pub chatter_messages: Vec<String>,
    /// ファン送信メッセージの本文
    pub fan_messages: Vec<String>,
    /// ウィンドウ内の全メッセージ（時系列・会話単位）
    pub all_messages: Vec<AttributedMessage>,
    /// 応答遅延サンプル（秒）
    pub response_delays: Vec<f64>,
}

static TAG_BR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static TAG_ANY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// HTMLマークアップを落として素のテキストにする
pub fn strip_markup(html: &str) -> String {
    let text = TAG_BR.replace_all(html, "\n");
    let text = TAG_ANY.replace_all(&text, "");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

/// ウィンドウのメッセージを取得して帰属させる
///
/// 最近アクティブな最大 `max_chats` 件の会話を走査する。
/// 送信者IDが会話相手のIDと異なるメッセージをチャッター送信とみなす。
pub async fn fetch_and_attribute(
    source: &dyn ChatSource,
    window: &ScoringWindow,
    max_chats: usize,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();

    let chats = match source
        .list_chats(&window.account_id, &window.api_token, max_chats)
        .await
    {
        Ok(chats) => chats,
        Err(e) => {
            tracing::warn!(
                "Chat list fetch failed for {} ({}): {}",
                window.creator_name,
                window.account_id,
                e
            );
            return outcome;
        }
    };

    for chat in chats.iter().take(max_chats) {
        let raw_messages = match source
            .chat_messages(
                &window.account_id,
                &window.api_token,
                &chat.chat_id,
                MESSAGES_PER_CHAT,
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                // 個別チャットの失敗はスキップして続行
                tracing::warn!("Chat {} fetch failed, skipping: {}", chat.chat_id, e);
                continue;
            }
        };

        let mut sorted = raw_messages;
        sorted.sort_by_key(|m| m.created_at);

        let mut last_fan_msg_time: Option<chrono::DateTime<chrono::Utc>> = None;

        for msg in sorted {
            if msg.created_at < window.window_start || msg.created_at > window.window_end {
                continue;
            }

            let is_chatter = msg.sender_id != chat.chat_id;
            let text = strip_markup(&msg.text);
            if text.chars().count() < 3 {
                continue;
            }

            outcome.all_messages.push(AttributedMessage {
                text: text.clone(),
                is_chatter,
                created_at: msg.created_at,
                chat_id: chat.chat_id.clone(),
                fan_name: chat.fan_name.clone(),
            });

            if is_chatter {
                outcome.chatter_messages.push(text);
                if let Some(fan_time) = last_fan_msg_time {
                    let delay_sec = (msg.created_at - fan_time).num_milliseconds() as f64 / 1000.0;
                    if delay_sec > 0.0 && delay_sec < MAX_RESPONSE_DELAY_SECS {
                        outcome.response_delays.push(delay_sec);
                    }
                }
                last_fan_msg_time = None;
            } else {
                outcome.fan_messages.push(text);
                last_fan_msg_time = Some(msg.created_at);
            }
        }
    }

    outcome
}
