//! 会話の整形と派生アーティファクト
//!
//! AI判定に渡すトランスクリプト整形、永続化する会話スナップショット、
//! コピペ一斉送信（同一文面を複数の会話へ送る行為）の検出。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::scoring::story::StoryAnalysis;
use crate::scoring::types::AttributedMessage;

/// AI判定に渡すトランスクリプトの上限文字数
const TRANSCRIPT_CHAR_CAP: usize = 6_000;
/// 1会話あたりのトランスクリプト行数上限
const TRANSCRIPT_LINES_PER_CHAT: usize = 30;
/// トランスクリプト1行の本文上限
const TRANSCRIPT_TEXT_CAP: usize = 200;

/// スナップショットに残す会話数上限
const SNAPSHOT_MAX_CHATS: usize = 10;
/// スナップショット1会話あたりのメッセージ数上限
const SNAPSHOT_MAX_MESSAGES: usize = 20;
/// スナップショット1メッセージの本文上限
const SNAPSHOT_TEXT_CAP: usize = 500;

/// 一斉送信とみなす最小本文長
const BLAST_MIN_CHARS: usize = 20;
/// 保存する一斉送信の上限件数
const BLAST_MAX_KEPT: usize = 10;
/// 一斉送信1件の本文上限
const BLAST_TEXT_CAP: usize = 300;

fn truncate_chars(s: &str, cap: usize) -> String {
    s.chars().take(cap).collect()
}

/// メッセージを会話単位にまとめる（出現順を保持）
fn group_by_chat(messages: &[AttributedMessage]) -> Vec<(String, Vec<&AttributedMessage>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&AttributedMessage>> = HashMap::new();

    for msg in messages {
        if !groups.contains_key(&msg.chat_id) {
            order.push(msg.chat_id.clone());
        }
        groups.entry(msg.chat_id.clone()).or_default().push(msg);
    }

    order
        .into_iter()
        .map(|chat_id| {
            let msgs = groups.remove(&chat_id).unwrap_or_default();
            (chat_id, msgs)
        })
        .collect()
}

/// AI判定用にトランスクリプトを整形する
///
/// 会話ごとに相手の表示名を見出しにし、各行を
/// `[HH:MM] [ROLE]: text` で並べる。コンテキスト上限を守るため
/// 会話あたり30行・本文200文字・全体6000文字で切り詰める。
pub fn format_conversations(messages: &[AttributedMessage]) -> String {
    if messages.is_empty() {
        return "(no messages in window)".to_string();
    }

    let mut parts: Vec<String> = Vec::new();

    for (chat_num, (_chat_id, msgs)) in group_by_chat(messages).iter().enumerate() {
        let fan_name = msgs
            .first()
            .and_then(|m| m.fan_name.clone())
            .unwrap_or_else(|| format!("Fan #{}", chat_num + 1));
        parts.push(format!("--- Chat with {} ---", fan_name));

        for m in msgs.iter().take(TRANSCRIPT_LINES_PER_CHAT) {
            let role = if m.is_chatter { "CHATTER" } else { "FAN" };
            let time = m.created_at.format("%H:%M");
            parts.push(format!(
                "[{}] [{}]: {}",
                time,
                role,
                truncate_chars(&m.text, TRANSCRIPT_TEXT_CAP)
            ));
        }
        parts.push(String::new());
    }

    truncate_chars(&parts.join("\n"), TRANSCRIPT_CHAR_CAP)
}

/// スナップショット内の1メッセージ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMessage {
    pub text: String,
    pub is_chatter: bool,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

/// スナップショット内の1会話
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationDigest {
    pub chat_id: String,
    pub fan_name: Option<String>,
    pub messages: Vec<SnapshotMessage>,
}

/// 永続化する会話スナップショット
///
/// ストーリー分析の結果が得られた場合は `story_analysis` として
/// 添付する。スナップショット本体を置き換えることはしない。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSnapshot {
    pub conversations: Vec<ConversationDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_analysis: Option<StoryAnalysis>,
}

/// 会話スナップショットを組み立てる
///
/// 会話10件・会話あたり20メッセージ・本文500文字に制限する。
pub fn build_conversation_snapshot(messages: &[AttributedMessage]) -> ConversationSnapshot {
    let conversations = group_by_chat(messages)
        .into_iter()
        .take(SNAPSHOT_MAX_CHATS)
        .map(|(chat_id, msgs)| ConversationDigest {
            chat_id,
            fan_name: msgs.first().and_then(|m| m.fan_name.clone()),
            messages: msgs
                .iter()
                .take(SNAPSHOT_MAX_MESSAGES)
                .map(|m| SnapshotMessage {
                    text: truncate_chars(&m.text, SNAPSHOT_TEXT_CAP),
                    is_chatter: m.is_chatter,
                    sent_at: m.created_at,
                })
                .collect(),
        })
        .collect();

    ConversationSnapshot {
        conversations,
        story_analysis: None,
    }
}

/// コピペ一斉送信の検出結果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopyPasteBlast {
    pub text: String,
    /// 同一文面を受け取った会話の数
    pub recipient_count: usize,
}

/// コピペ一斉送信を検出する
///
/// チャッター送信かつ20文字以上のメッセージで、同一文面が
/// 2つ以上の会話に送られたものを拾う。受信会話数の多い順に
/// 上位10件、本文は300文字に切り詰める。
pub fn detect_copy_paste_blasts(messages: &[AttributedMessage]) -> Vec<CopyPasteBlast> {
    let mut recipients: HashMap<String, std::collections::HashSet<String>> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();

    for msg in messages {
        if !msg.is_chatter {
            continue;
        }
        let text = msg.text.trim();
        if text.chars().count() < BLAST_MIN_CHARS {
            continue;
        }
        if !recipients.contains_key(text) {
            first_seen.push(text.to_string());
        }
        recipients
            .entry(text.to_string())
            .or_default()
            .insert(msg.chat_id.clone());
    }

    let mut blasts: Vec<CopyPasteBlast> = first_seen
        .into_iter()
        .filter_map(|text| {
            let count = recipients.get(&text).map(|set| set.len()).unwrap_or(0);
            (count >= 2).then(|| CopyPasteBlast {
                text: truncate_chars(&text, BLAST_TEXT_CAP),
                recipient_count: count,
            })
        })
        .collect();

    blasts.sort_by(|a, b| b.recipient_count.cmp(&a.recipient_count));
    blasts.truncate(BLAST_MAX_KEPT);
    blasts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn msg(text: &str, is_chatter: bool, chat_id: &str, min: u32) -> AttributedMessage {
        AttributedMessage {
            text: text.to_string(),
            is_chatter,
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 13, min, 0).unwrap(),
            chat_id: chat_id.to_string(),
            fan_name: None,
        }
    }

    fn named_msg(text: &str, is_chatter: bool, chat_id: &str, fan: &str) -> AttributedMessage {
        AttributedMessage {
            fan_name: Some(fan.to_string()),
            ..msg(text, is_chatter, chat_id, 0)
        }
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_conversations(&[]), "(no messages in window)");
    }

    #[test]
    fn test_format_roles_and_names() {
        let messages = vec![
            named_msg("hey cutie", false, "fan1", "Rick"),
            named_msg("hey you, miss me?", true, "fan1", "Rick"),
        ];
        let formatted = format_conversations(&messages);
        assert!(formatted.contains("--- Chat with Rick ---"));
        assert!(formatted.contains("[FAN]: hey cutie"));
        assert!(formatted.contains("[CHATTER]: hey you, miss me?"));
        assert!(formatted.contains("[13:00]"));
    }

    #[test]
    fn test_format_fan_number_fallback() {
        let messages = vec![
            msg("first conversation msg", false, "fan1", 1),
            msg("second conversation msg", false, "fan2", 2),
        ];
        let formatted = format_conversations(&messages);
        assert!(formatted.contains("--- Chat with Fan #1 ---"));
        assert!(formatted.contains("--- Chat with Fan #2 ---"));
    }

    #[test]
    fn test_format_line_and_text_caps() {
        // 40行ある会話は30行で切られる
        let messages: Vec<AttributedMessage> = (0..40)
            .map(|i| msg(&format!("message number {}", i), true, "fan1", (i % 60) as u32))
            .collect();
        let formatted = format_conversations(&messages);
        assert!(formatted.contains("message number 29"));
        assert!(!formatted.contains("message number 30"));

        // 本文は200文字で切られる
        let long = "x".repeat(400);
        let formatted = format_conversations(&[msg(&long, true, "fan1", 0)]);
        assert!(formatted.contains(&"x".repeat(200)));
        assert!(!formatted.contains(&"x".repeat(201)));
    }

    #[test]
    fn test_format_total_cap() {
        let long = "y".repeat(200);
        let mut messages = Vec::new();
        for chat in 0..10 {
            for i in 0..30 {
                messages.push(msg(&long, true, &format!("fan{}", chat), (i % 60) as u32));
            }
        }
        let formatted = format_conversations(&messages);
        assert!(formatted.chars().count() <= 6_000);
    }

    #[test]
    fn test_snapshot_caps() {
        let messages: Vec<AttributedMessage> = (0..12)
            .flat_map(|chat| {
                (0..25).map(move |i| {
                    msg(
                        &format!("chat {} msg {}", chat, i),
                        i % 2 == 0,
                        &format!("fan{}", chat),
                        (i % 60) as u32,
                    )
                })
            })
            .collect();

        let snapshot = build_conversation_snapshot(&messages);
        assert_eq!(snapshot.conversations.len(), 10);
        assert!(snapshot
            .conversations
            .iter()
            .all(|c| c.messages.len() <= 20));
        assert!(snapshot.story_analysis.is_none());
    }

    #[test]
    fn test_snapshot_text_truncation() {
        let long = "z".repeat(900);
        let snapshot = build_conversation_snapshot(&[msg(&long, true, "fan1", 0)]);
        assert_eq!(
            snapshot.conversations[0].messages[0].text.chars().count(),
            500
        );
    }

    #[test]
    fn test_blast_detection() {
        let blast_text = "special offer tonight only, check your messages";
        let messages = vec![
            msg(blast_text, true, "fan1", 1),
            msg(blast_text, true, "fan2", 2),
            msg(blast_text, true, "fan3", 3),
            // 1会話にしか送られていないものは対象外
            msg("unique long message for a single fan", true, "fan1", 4),
            // ファン側のメッセージは対象外
            msg(blast_text, false, "fan4", 5),
            // 20文字未満は対象外
            msg("short but repeated", true, "fan1", 6),
            msg("short but repeated", true, "fan2", 7),
        ];

        let blasts = detect_copy_paste_blasts(&messages);
        assert_eq!(blasts.len(), 1);
        assert_eq!(blasts[0].recipient_count, 3);
        assert_eq!(blasts[0].text, blast_text);
    }

    #[test]
    fn test_blast_same_chat_not_counted_twice() {
        let text = "hello darling how was your day today?";
        let messages = vec![msg(text, true, "fan1", 1), msg(text, true, "fan1", 2)];
        assert!(detect_copy_paste_blasts(&messages).is_empty());
    }

    #[test]
    fn test_blast_top_ten_by_recipients() {
        let mut messages = Vec::new();
        for i in 0..12 {
            let text = format!("blast message number {} with enough length", i);
            // i番目のブラストは (i % 3) + 2 会話に送られる
            for chat in 0..((i % 3) + 2) {
                messages.push(msg(&text, true, &format!("fan{}", chat), (i % 60) as u32));
            }
        }

        let blasts = detect_copy_paste_blasts(&messages);
        assert_eq!(blasts.len(), 10);
        // 受信会話数の多い順
        assert!(blasts.windows(2).all(|w| w[0].recipient_count >= w[1].recipient_count));
    }

    #[test]
    fn test_blast_text_truncated() {
        let text = format!("{} tail", "b".repeat(400));
        let messages = vec![msg(&text, true, "fan1", 1), msg(&text, true, "fan2", 2)];
        let blasts = detect_copy_paste_blasts(&messages);
        assert_eq!(blasts[0].text.chars().count(), 300);
    }
}
