//! スコア通知
//!
//! 採点結果をスコアカードに整形してTelegramへ送る。毎時の全スコアを
//! 流すとノイズになるため頻度制御を入れる: 極端なスコア、シフト最初の
//! スコア、アーキタイプの変化のいずれかに該当するときだけ通知する。
//! 送信はベストエフォートで、失敗しても採点パイプラインには影響しない。

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration as StdDuration, Instant};

use crate::database::ScoreDatabase;
use crate::scoring::judge::{NotableQuote, QuoteKind};
use crate::scoring::types::ScoringResult;

/// 赤信号とみなすスコア（未満）
const RED_ALERT_BELOW: i32 = 50;
/// 優秀とみなすスコア（以上）
const EXCELLENT_AT: i32 = 85;
/// 「シフト最初のスコア」判定に使う遡り時間
const SHIFT_GAP_HOURS: i64 = 2;

/// プロセス内の重複送信を抑える短TTLキャッシュ
///
/// 同じ(チャッター, クリエイター)の組への送信をTTL内で1回に抑える。
/// プロセス再起動で消えてよい一時状態。
pub struct NotificationGate {
    entries: Mutex<HashMap<(String, String), Instant>>,
    ttl: StdDuration,
}

impl NotificationGate {
    pub fn new(ttl: StdDuration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// 送信してよければtrueを返し、その組を記録する
    pub fn permit(&self, chatter_email: &str, creator_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, sent_at| now.duration_since(*sent_at) < self.ttl);

        let key = (chatter_email.to_string(), creator_id.to_string());
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, now);
        true
    }
}

impl Default for NotificationGate {
    fn default() -> Self {
        // 毎時バッチの2周分
        Self::new(StdDuration::from_secs(45 * 60))
    }
}

/// 通知すべきか判定する
///
/// 通知する条件:
/// - スコアが50未満（赤信号）または85以上（優秀）
/// - 直近2時間にこの組のスコアが1件以下（今回の分を含む = シフト最初）
/// - 検出アーキタイプがプロフィールの最頻値と異なる
pub fn should_notify(
    db: &ScoreDatabase,
    result: &ScoringResult,
    now: DateTime<Utc>,
) -> Result<bool> {
    if result.total_score < RED_ALERT_BELOW {
        return Ok(true);
    }
    if result.total_score >= EXCELLENT_AT {
        return Ok(true);
    }

    let two_hours_ago = now - Duration::hours(SHIFT_GAP_HOURS);
    let recent = db.recent_score_count(&result.chatter_email, &result.creator_id, two_hours_ago)?;
    if recent <= 1 {
        return Ok(true);
    }

    if let Some(archetype) = result.detected_archetype {
        let profile = db.get_profile(&result.chatter_email, &result.creator_id)?;
        if let Some(dominant) = profile.and_then(|p| p.dominant_archetype) {
            if dominant != archetype.as_str() {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

fn score_emoji(total: i32) -> &'static str {
    if total >= EXCELLENT_AT {
        "🟢"
    } else if total >= RED_ALERT_BELOW {
        "🟡"
    } else {
        "🔴"
    }
}

fn quote_emoji(kind: QuoteKind) -> &'static str {
    match kind {
        QuoteKind::Great => "⭐",
        QuoteKind::Good => "✅",
        QuoteKind::Bad => "⚠️",
        QuoteKind::Ugly => "💀",
    }
}

/// スコアカードを整形する
pub fn format_score_card(
    result: &ScoringResult,
    chatter_name: Option<&str>,
    notable_quotes: &[NotableQuote],
) -> String {
    let display_name = chatter_name
        .map(|n| n.to_string())
        .unwrap_or_else(|| {
            result
                .chatter_email
                .split('@')
                .next()
                .unwrap_or(&result.chatter_email)
                .to_string()
        });

    let mut msg = format!(
        "{} CHATTER SCORE: {}\n",
        score_emoji(result.total_score),
        display_name
    );
    msg += &format!("Model: {}\n", result.creator_name);
    msg += &format!("Score: {}/100\n\n", result.total_score);

    msg += &format!(
        "SLA: {}/25 | Follow-up: {}/20\n",
        result.sla_score, result.followup_score
    );
    msg += &format!(
        "Triggers: {}/20 | Quality: {}/20\n",
        result.trigger_score, result.quality_score
    );
    msg += &format!("Revenue: {}/15\n", result.revenue_score);

    if let Some(archetype) = result.detected_archetype {
        msg += &format!("\nStyle: {}", archetype.display_label());
    }

    if !result.strength_tags.is_empty() {
        msg += &format!("\nStrengths: {}", result.strength_tags.join(", "));
    }

    if !result.mistake_tags.is_empty() {
        msg += &format!("\nImprove: {}", result.mistake_tags.join(", "));
    }

    if let Some(notes) = &result.ai_notes {
        msg += &format!("\n\nNotes: {}", notes);
    }

    if !notable_quotes.is_empty() {
        msg += "\n\nQuotes:";
        for q in notable_quotes.iter().take(3) {
            msg += &format!("\n{} \"{}\"", quote_emoji(q.kind), q.text);
            if !q.context.is_empty() {
                msg += &format!(" — {}", q.context);
            }
        }
    }

    msg += &format!(
        "\n\nMsgs: {} | Chats: {}",
        result.messages_analyzed, result.conversations_scanned
    );
    msg += &format!(
        " | Robot: {} | Creative: {}",
        result.robot_phrase_count, result.creative_phrase_count
    );

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::types::{Archetype, AttributionConfidence};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 14, 0, 0).unwrap()
    }

    fn result(total: i32) -> ScoringResult {
        ScoringResult {
            chatter_email: "ann@agency.test".to_string(),
            creator_id: "c1".to_string(),
            creator_name: "Luna".to_string(),
            window_start: now() - Duration::hours(1),
            window_end: now(),
            attribution_confidence: AttributionConfidence::High,
            sla_score: 20,
            followup_score: 10,
            trigger_score: 12,
            quality_score: 14,
            revenue_score: 10,
            copy_paste_penalty: 0,
            missed_trigger_penalty: 0,
            spam_penalty: 0,
            total_score: total,
            detected_archetype: Some(Archetype::Tease),
            conversations_scanned: 3,
            messages_analyzed: 18,
            robot_phrase_count: 2,
            creative_phrase_count: 6,
            ai_notes: Some("Good tension building.".to_string()),
            mistake_tags: vec!["no_cta".to_string()],
            strength_tags: vec!["built_tension".to_string()],
        }
    }

    #[test]
    fn test_extreme_scores_always_notify() {
        let db = ScoreDatabase::new_in_memory().unwrap();
        assert!(should_notify(&db, &result(40), now()).unwrap());
        assert!(should_notify(&db, &result(90), now()).unwrap());
    }

    #[test]
    fn test_first_score_of_shift_notifies() {
        let db = ScoreDatabase::new_in_memory().unwrap();
        // スコア履歴なし → シフト最初
        assert!(should_notify(&db, &result(70), now()).unwrap());
    }

    #[test]
    fn test_mid_shift_ordinary_score_suppressed() {
        let mut db = ScoreDatabase::new_in_memory().unwrap();
        // 直近2時間に2件のスコアを作る
        for (i, offset_min) in [30i64, 90].iter().enumerate() {
            let window_start = now() - Duration::minutes(*offset_min) - Duration::hours(1);
            db.insert_hourly_score(&crate::database::HourlyScoreRecord {
                id: format!("id{}", i),
                chatter_email: "ann@agency.test".to_string(),
                creator_id: "c1".to_string(),
                window_start,
                window_end: window_start + Duration::hours(1),
                sla_score: 20,
                followup_score: 10,
                trigger_score: 10,
                quality_score: 10,
                revenue_score: 5,
                copy_paste_penalty: 0,
                missed_trigger_penalty: 0,
                spam_penalty: 0,
                total_score: 55,
                attribution_confidence: "high".to_string(),
                detected_archetype: Some("tease".to_string()),
                conversations_scanned: 1,
                messages_analyzed: 5,
                robot_phrase_count: 0,
                creative_phrase_count: 0,
                ai_notes: None,
                mistake_tags: vec![],
                strength_tags: vec![],
                notable_quotes: vec![],
                conversation_snapshot: None,
                copy_paste_blasts: vec![],
                created_at: now() - Duration::minutes(*offset_min),
            })
            .unwrap();
        }
        // プロフィールの最頻値も一致させる
        db.upsert_profile(&crate::database::ChatterProfile {
            chatter_email: "ann@agency.test".to_string(),
            creator_id: "c1".to_string(),
            chatter_name: None,
            avg_total_score: 60.0,
            avg_sla_score: 20.0,
            avg_followup_score: 10.0,
            avg_trigger_score: 10.0,
            avg_quality_score: 10.0,
            avg_revenue_score: 5.0,
            dominant_archetype: Some("tease".to_string()),
            archetype_counts: vec![("tease".to_string(), 3)],
            recent_scores: vec![55, 60],
            improvement_index: 0.0,
            total_scoring_sessions: 3,
            top_strengths: vec![],
            top_weaknesses: vec![],
            updated_at: now(),
        })
        .unwrap();

        assert!(!should_notify(&db, &result(70), now()).unwrap());

        // アーキタイプが最頻値から変わったら通知
        let mut changed = result(70);
        changed.detected_archetype = Some(Archetype::Chameleon);
        assert!(should_notify(&db, &changed, now()).unwrap());
    }

    #[test]
    fn test_score_card_format() {
        let quotes = vec![NotableQuote {
            text: "earn it first babe".to_string(),
            kind: QuoteKind::Great,
            context: "push-pull".to_string(),
        }];
        let card = format_score_card(&result(71), Some("Ann"), &quotes);

        assert!(card.starts_with("🟡 CHATTER SCORE: Ann"));
        assert!(card.contains("Model: Luna"));
        assert!(card.contains("Score: 71/100"));
        assert!(card.contains("SLA: 20/25 | Follow-up: 10/20"));
        assert!(card.contains("Triggers: 12/20 | Quality: 14/20"));
        assert!(card.contains("Revenue: 10/15"));
        assert!(card.contains("Style: The Tease"));
        assert!(card.contains("Strengths: built_tension"));
        assert!(card.contains("Improve: no_cta"));
        assert!(card.contains("Notes: Good tension building."));
        assert!(card.contains("⭐ \"earn it first babe\" — push-pull"));
        assert!(card.contains("Msgs: 18 | Chats: 3"));
        assert!(card.contains("Robot: 2 | Creative: 6"));
    }

    #[test]
    fn test_score_card_name_falls_back_to_email_local_part() {
        let card = format_score_card(&result(90), None, &[]);
        assert!(card.starts_with("🟢 CHATTER SCORE: ann"));
    }

    #[test]
    fn test_score_card_red_emoji() {
        let card = format_score_card(&result(30), Some("Ann"), &[]);
        assert!(card.starts_with("🔴"));
    }

    #[test]
    fn test_notification_gate_ttl() {
        let gate = NotificationGate::new(StdDuration::from_millis(50));
        assert!(gate.permit("ann@agency.test", "c1"));
        assert!(!gate.permit("ann@agency.test", "c1"));
        // 別の組は独立
        assert!(gate.permit("bob@agency.test", "c1"));

        std::thread::sleep(StdDuration::from_millis(60));
        assert!(gate.permit("ann@agency.test", "c1"));
    }
}
