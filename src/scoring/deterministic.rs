//! 決定的スコアリング
//!
//! SLA・収益・コピペ検出・スパム検出・ロボットフレーズ検出。
//! どれも外部呼び出しなしの純関数で、同じ入力には必ず同じ出力を返す。

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// SLAスコアを応答遅延から計算する
///
/// 平均遅延（分）の閾値: <2分→25, <5分→20, <10分→15, <15分→10, それ以上→5。
/// 応答サンプルがなければ0。
pub fn compute_sla_score(response_delays: &[f64]) -> i32 {
    if response_delays.is_empty() {
        return 0;
    }

    let avg_delay_sec: f64 = response_delays.iter().sum::<f64>() / response_delays.len() as f64;
    let avg_delay_min = avg_delay_sec / 60.0;

    if avg_delay_min < 2.0 {
        25
    } else if avg_delay_min < 5.0 {
        20
    } else if avg_delay_min < 10.0 {
        15
    } else if avg_delay_min < 15.0 {
        10
    } else {
        5
    }
}

/// 収益スコアをウィンドウ内の取引合計から計算する
pub fn compute_revenue_score(revenue_in_window: f64) -> i32 {
    if revenue_in_window >= 100.0 {
        15
    } else if revenue_in_window >= 25.0 {
        10
    } else if revenue_in_window >= 1.0 {
        5
    } else {
        0
    }
}

/// コピペ検出
///
/// 正規化（小文字化＋トリム）後の重複率が0.3を超えたらtrue。
/// サンプル不足（5件未満）は常にfalse。
pub fn detect_copy_paste(messages: &[String]) -> bool {
    if messages.len() < 5 {
        return false;
    }
    let normalized: Vec<String> = messages
        .iter()
        .map(|m| m.to_lowercase().trim().to_string())
        .collect();
    let unique: HashSet<&String> = normalized.iter().collect();
    let dupe_ratio = 1.0 - unique.len() as f64 / normalized.len() as f64;
    dupe_ratio > 0.3
}

/// スパム検出（正規化後に同一のメッセージが3連続）
pub fn detect_spam(messages: &[String]) -> bool {
    if messages.len() < 3 {
        return false;
    }
    for window in messages.windows(3) {
        let a = window[0].to_lowercase().trim().to_string();
        let b = window[1].to_lowercase().trim().to_string();
        let c = window[2].to_lowercase().trim().to_string();
        if a == b && b == c {
            return true;
        }
    }
    false
}

// --- Robot phrase detection ---

/// 会話を機械的に感じさせる定型フレーズ
const ROBOT_PHRASES: &[&str] = &[
    "yes babe",
    "aww thanks",
    "sounds good",
    "that's so sweet",
    "thanks babe",
    "love that",
    "omg really",
    "haha yes",
    "that's hot",
    "you're so sweet",
    "thanks hun",
    "lol thanks",
    "aw babe",
    "you're the best",
    "miss you too",
    "love you too",
    "hey babe",
    "hi babe",
    "good morning babe",
    "good night babe",
    "xo",
    "xoxo",
    "muah",
    "😘😘😘",
];

/// 実際のエンゲージメントを示すパターン
static CREATIVE_INDICATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // 関心を示す質問
        r"\?",
        // 個別の言及（名前や具体的なディテール）
        r"(?i)\b(remember|told me|you said|last time)\b",
        // 感情的な関与
        r"(?i)\b(honestly|actually|really want|can't stop|thinking about)\b",
        // 先の展開づくり
        r"(?i)\b(imagine|picture this|what if|between us|just for you|special)\b",
        // プッシュプル
        r"(?i)\b(maybe|might|if you're good|earn it|deserve|patience)\b",
        // CTAと緊急性
        r"(?i)\b(limited|only|tonight|right now|before|don't miss)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// ロボットフレーズ検出の結果
#[derive(Debug, Clone, Default)]
pub struct RobotDetectorResult {
    pub robot_count: usize,
    pub creative_count: usize,
    pub robot_examples: Vec<String>,
    pub creative_examples: Vec<String>,
}

/// チャッターのメッセージ群をロボットフレーズ/創造的表現に分類する
pub fn detect_robot_phrases(chatter_messages: &[String]) -> RobotDetectorResult {
    let mut result = RobotDetectorResult::default();

    for msg in chatter_messages {
        let lower = msg.to_lowercase().trim().to_string();

        let is_robot = ROBOT_PHRASES.iter().any(|phrase| {
            lower == *phrase
                || lower.starts_with(&format!("{} ", phrase))
                || lower.ends_with(&format!(" {}", phrase))
        });

        if is_robot {
            result.robot_count += 1;
            if result.robot_examples.len() < 5 {
                result.robot_examples.push(msg.chars().take(60).collect());
            }
            continue;
        }

        let creative_matches = CREATIVE_INDICATORS
            .iter()
            .filter(|pattern| pattern.is_match(msg))
            .count();
        if creative_matches >= 2 || (msg.chars().count() > 40 && creative_matches >= 1) {
            result.creative_count += 1;
            if result.creative_examples.len() < 3 {
                result
                    .creative_examples
                    .push(msg.chars().take(80).collect());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_sla_score_empty_input() {
        assert_eq!(compute_sla_score(&[]), 0);
    }

    #[test]
    fn test_sla_score_monotonic_steps() {
        // 平均遅延が小さいほどスコアは下がらない
        assert_eq!(compute_sla_score(&[60.0]), 25); // 1分
        assert_eq!(compute_sla_score(&[90.0]), 25); // 1.5分
        assert_eq!(compute_sla_score(&[180.0]), 20); // 3分
        assert_eq!(compute_sla_score(&[400.0]), 15); // ~6.7分
        assert_eq!(compute_sla_score(&[540.0]), 15); // 9分
        assert_eq!(compute_sla_score(&[700.0]), 10); // ~11.7分
        assert_eq!(compute_sla_score(&[1000.0]), 5); // ~16.7分
        assert_eq!(compute_sla_score(&[3600.0]), 5); // 1時間
    }

    #[test]
    fn test_sla_score_uses_average() {
        // 30秒と90秒 → 平均60秒 → 25点
        assert_eq!(compute_sla_score(&[30.0, 90.0]), 25);
        // 60秒と540秒 → 平均300秒(5分) → 15点
        assert_eq!(compute_sla_score(&[60.0, 540.0]), 15);
    }

    #[test]
    fn test_revenue_score_thresholds() {
        assert_eq!(compute_revenue_score(0.0), 0);
        assert_eq!(compute_revenue_score(0.5), 0);
        assert_eq!(compute_revenue_score(1.0), 5);
        assert_eq!(compute_revenue_score(24.99), 5);
        assert_eq!(compute_revenue_score(25.0), 10);
        assert_eq!(compute_revenue_score(30.0), 10);
        assert_eq!(compute_revenue_score(100.0), 15);
        assert_eq!(compute_revenue_score(500.0), 15);
    }

    #[test]
    fn test_copy_paste_above_threshold() {
        // 10件中4件が重複 → 重複率0.4 > 0.3
        let messages = msgs(&[
            "hey there", "hey there", "hey there", "hey there", "hey there", "unique 1",
            "unique 2", "unique 3", "unique 4", "unique 5",
        ]);
        assert!(detect_copy_paste(&messages));
    }

    #[test]
    fn test_copy_paste_below_threshold() {
        // 10件中2件が重複 → 重複率0.2
        let messages = msgs(&[
            "hey there", "hey there", "hey there", "unique 1", "unique 2", "unique 3",
            "unique 4", "unique 5", "unique 6", "unique 7",
        ]);
        assert!(!detect_copy_paste(&messages));
    }

    #[test]
    fn test_copy_paste_small_sample_always_false() {
        let messages = msgs(&["same", "same", "same", "same"]);
        assert!(!detect_copy_paste(&messages));
    }

    #[test]
    fn test_copy_paste_normalization() {
        // 大文字小文字と前後空白は同一視する
        let messages = msgs(&[
            "Hey Babe", "hey babe", "  HEY BABE  ", "hey babe", "unique 1", "unique 2",
        ]);
        assert!(detect_copy_paste(&messages));
    }

    #[test]
    fn test_spam_three_in_a_row() {
        let messages = msgs(&["check my feed", "Check My Feed", " check my feed "]);
        assert!(detect_spam(&messages));
    }

    #[test]
    fn test_spam_broken_run() {
        // 真ん中が1文字違うだけで連続ではなくなる
        let messages = msgs(&["check my feed", "check my feeD!", "check my feed"]);
        assert!(!detect_spam(&messages));
    }

    #[test]
    fn test_spam_needs_three_messages() {
        let messages = msgs(&["same", "same"]);
        assert!(!detect_spam(&messages));
    }

    #[test]
    fn test_spam_run_in_longer_sequence() {
        let messages = msgs(&["a", "b", "buy now", "buy now", "buy now", "c"]);
        assert!(detect_spam(&messages));
    }

    #[test]
    fn test_robot_phrases_counted() {
        let messages = msgs(&[
            "yes babe",
            "hey babe what's up",
            "I was thinking about what you said last time... remember?",
        ]);
        let result = detect_robot_phrases(&messages);
        assert_eq!(result.robot_count, 2);
        assert_eq!(result.creative_count, 1);
        assert_eq!(result.robot_examples.len(), 2);
    }

    #[test]
    fn test_robot_phrase_suffix_match() {
        let messages = msgs(&["ok thanks babe"]);
        let result = detect_robot_phrases(&messages);
        assert_eq!(result.robot_count, 1);
    }

    #[test]
    fn test_creative_long_message_single_indicator() {
        // 40文字超かつ指標1つでも創造的と数える
        let messages = msgs(&[
            "imagine us walking along the beach at sunset with nobody else around",
        ]);
        let result = detect_robot_phrases(&messages);
        assert_eq!(result.creative_count, 1);
        assert_eq!(result.robot_count, 0);
    }

    #[test]
    fn test_plain_message_counts_neither() {
        let messages = msgs(&["ok"]);
        let result = detect_robot_phrases(&messages);
        assert_eq!(result.robot_count, 0);
        assert_eq!(result.creative_count, 0);
    }
}
