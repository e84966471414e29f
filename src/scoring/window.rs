//! 採点ウィンドウの組み立て
//!
//! シフト記録のうちウィンドウと重なるものを(チャッター, クリエイター)で
//! まとめ、組ごとに1つのScoringWindowを作る。副作用なしの読み取りのみ。

use anyhow::Result;
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::HashMap;

use crate::database::ScoreDatabase;
use crate::scoring::types::{AttributionConfidence, ScoringWindow};

/// 直近の完了した1時間のUTC境界を返す
///
/// 例: 14:12なら `[13:00, 14:00)`。
pub fn last_completed_hour(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let window_end = now
        .duration_trunc(Duration::hours(1))
        .unwrap_or(now);
    (window_end - Duration::hours(1), window_end)
}

/// ウィンドウと重なるシフトから採点ウィンドウを組み立てる
///
/// 同じ組に複数のシフトが重なっていた場合は誰がどのメッセージを
/// 送ったか判別できないため confidence を low にする。
/// 外部アカウントIDまたはAPIトークンを欠くクリエイターは
/// メッセージを取得できないためスキップする。
pub fn build_scoring_windows(
    db: &ScoreDatabase,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<ScoringWindow>> {
    let sessions = db.shifts_overlapping(window_start, window_end)?;

    // (chatter_email, creator_id) でまとめて重なりを検出
    let mut pair_order: Vec<(String, String)> = Vec::new();
    let mut pair_map: HashMap<(String, String), Vec<usize>> = HashMap::new();

    for (index, (shift, creator)) in sessions.iter().enumerate() {
        if !creator.has_credentials() {
            continue;
        }
        let key = (shift.chatter_email.clone(), shift.creator_id.clone());
        if !pair_map.contains_key(&key) {
            pair_order.push(key.clone());
        }
        pair_map.entry(key).or_default().push(index);
    }

    let mut windows = Vec::new();

    for key in pair_order {
        let indices = &pair_map[&key];
        let (shift, creator) = &sessions[indices[0]];
        let has_overlap = indices.len() > 1;

        let (Some(account_id), Some(api_token)) = (&creator.account_id, &creator.api_token) else {
            continue;
        };

        windows.push(ScoringWindow {
            chatter_email: shift.chatter_email.clone(),
            creator_id: shift.creator_id.clone(),
            creator_name: creator.name.clone().unwrap_or_else(|| "Unknown".to_string()),
            account_id: account_id.clone(),
            api_token: api_token.clone(),
            window_start,
            window_end,
            attribution_confidence: if has_overlap {
                AttributionConfidence::Low
            } else {
                AttributionConfidence::High
            },
        });
    }

    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ofapi::{AccountId, ApiToken};
    use crate::database::{CreatorAccount, ShiftRecord};
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, m, 0).unwrap()
    }

    fn creator(id: &str, with_credentials: bool) -> CreatorAccount {
        CreatorAccount {
            id: id.to_string(),
            name: Some(format!("Creator {}", id)),
            account_id: with_credentials.then(|| AccountId(format!("acct_{}", id))),
            api_token: with_credentials.then(|| ApiToken::new(format!("token_{}", id))),
            telegram_group_id: None,
            telegram_id: None,
        }
    }

    fn shift(id: &str, email: &str, creator_id: &str, clock_in: DateTime<Utc>) -> ShiftRecord {
        ShiftRecord {
            id: id.to_string(),
            chatter_email: email.to_string(),
            chatter_name: None,
            creator_id: creator_id.to_string(),
            clock_in,
            clock_out: None,
        }
    }

    #[test]
    fn test_last_completed_hour() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 14, 12, 33).unwrap();
        let (start, end) = last_completed_hour(now);
        assert_eq!(start, ts(13, 0));
        assert_eq!(end, ts(14, 0));
    }

    #[test]
    fn test_last_completed_hour_on_boundary() {
        let now = ts(14, 0);
        let (start, end) = last_completed_hour(now);
        assert_eq!(start, ts(13, 0));
        assert_eq!(end, ts(14, 0));
    }

    #[test]
    fn test_single_shift_high_confidence() {
        let mut db = ScoreDatabase::new_in_memory().unwrap();
        db.upsert_creator(&creator("c1", true)).unwrap();
        db.insert_shift(&shift("s1", "ann@agency.test", "c1", ts(12, 0)))
            .unwrap();

        let windows = build_scoring_windows(&db, ts(13, 0), ts(14, 0)).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].chatter_email, "ann@agency.test");
        assert_eq!(
            windows[0].attribution_confidence,
            AttributionConfidence::High
        );
        assert_eq!(windows[0].creator_name, "Creator c1");
    }

    #[test]
    fn test_overlapping_shifts_low_confidence() {
        let mut db = ScoreDatabase::new_in_memory().unwrap();
        db.upsert_creator(&creator("c1", true)).unwrap();
        db.insert_shift(&shift("s1", "ann@agency.test", "c1", ts(12, 0)))
            .unwrap();
        db.insert_shift(&shift("s2", "ann@agency.test", "c1", ts(13, 30)))
            .unwrap();

        let windows = build_scoring_windows(&db, ts(13, 0), ts(14, 0)).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(
            windows[0].attribution_confidence,
            AttributionConfidence::Low
        );
    }

    #[test]
    fn test_distinct_pairs_get_distinct_windows() {
        let mut db = ScoreDatabase::new_in_memory().unwrap();
        db.upsert_creator(&creator("c1", true)).unwrap();
        db.upsert_creator(&creator("c2", true)).unwrap();
        db.insert_shift(&shift("s1", "ann@agency.test", "c1", ts(12, 0)))
            .unwrap();
        db.insert_shift(&shift("s2", "ann@agency.test", "c2", ts(12, 0)))
            .unwrap();
        db.insert_shift(&shift("s3", "bob@agency.test", "c1", ts(12, 0)))
            .unwrap();

        let windows = build_scoring_windows(&db, ts(13, 0), ts(14, 0)).unwrap();
        assert_eq!(windows.len(), 3);
        assert!(windows
            .iter()
            .all(|w| w.attribution_confidence == AttributionConfidence::High));
    }

    #[test]
    fn test_creator_without_credentials_skipped() {
        let mut db = ScoreDatabase::new_in_memory().unwrap();
        db.upsert_creator(&creator("c1", false)).unwrap();
        db.insert_shift(&shift("s1", "ann@agency.test", "c1", ts(12, 0)))
            .unwrap();

        let windows = build_scoring_windows(&db, ts(13, 0), ts(14, 0)).unwrap();
        assert!(windows.is_empty());
    }

    #[test]
    fn test_non_overlapping_shift_excluded() {
        let mut db = ScoreDatabase::new_in_memory().unwrap();
        db.upsert_creator(&creator("c1", true)).unwrap();
        // ウィンドウ前に終了
        db.insert_shift(&ShiftRecord {
            clock_out: Some(ts(12, 30)),
            ..shift("s1", "ann@agency.test", "c1", ts(9, 0))
        })
        .unwrap();
        // ウィンドウ後に開始
        db.insert_shift(&shift("s2", "bob@agency.test", "c1", ts(15, 0)))
            .unwrap();

        let windows = build_scoring_windows(&db, ts(13, 0), ts(14, 0)).unwrap();
        assert!(windows.is_empty());
    }
}
