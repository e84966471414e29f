//! プロフィール更新（EMA）
//!
//! (チャッター, クリエイター) ごとの長期プロフィールを指数移動平均で
//! 更新する。EMAの各成分は更新前のスナップショット1つから計算する。
//! 純粋な計算とDB書き込みを分離してあり、計算部分は単体でテストできる。

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::database::{ChatterProfile, ScoreDatabase};
use crate::scoring::types::ScoringResult;

/// EMA平滑化係数
const EMA_ALPHA: f64 = 0.3;

/// スコア履歴の保持件数
const RECENT_SCORES_CAP: usize = 10;

/// 改善指標の計算に必要な最小履歴数
const IMPROVEMENT_MIN_HISTORY: usize = 4;

/// 「トップ」として保持するタグ数
const TOP_TAGS: usize = 5;

fn ema(prev: f64, curr: f64) -> f64 {
    EMA_ALPHA * curr + (1.0 - EMA_ALPHA) * prev
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[i32]) -> f64 {
    values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
}

/// 更新後のプロフィールを計算する（純関数）
///
/// 初回はEMAを現在値そのものでシードする。履歴が4件以上になったら
/// 古い半分と新しい半分の平均差を改善指標とする（奇数件なら古い側が
/// 小さい方）。トップの強み/弱みは今回の結果の先頭5件のスナップ
/// ショットで、累積ではない。
pub fn apply_score(
    existing: Option<&ChatterProfile>,
    score: &ScoringResult,
    chatter_name: Option<String>,
    now: DateTime<Utc>,
) -> ChatterProfile {
    let ema_or_seed = |prev: Option<f64>, curr: i32| match prev {
        Some(prev) => round1(ema(prev, curr as f64)),
        None => curr as f64,
    };

    let avg_total_score = ema_or_seed(existing.map(|e| e.avg_total_score), score.total_score);
    let avg_sla_score = ema_or_seed(existing.map(|e| e.avg_sla_score), score.sla_score);
    let avg_followup_score =
        ema_or_seed(existing.map(|e| e.avg_followup_score), score.followup_score);
    let avg_trigger_score =
        ema_or_seed(existing.map(|e| e.avg_trigger_score), score.trigger_score);
    let avg_quality_score =
        ema_or_seed(existing.map(|e| e.avg_quality_score), score.quality_score);
    let avg_revenue_score =
        ema_or_seed(existing.map(|e| e.avg_revenue_score), score.revenue_score);

    // 直近スコア履歴: 最大10件、古いものから追い出す
    let mut recent_scores = existing.map(|e| e.recent_scores.clone()).unwrap_or_default();
    recent_scores.push(score.total_score);
    while recent_scores.len() > RECENT_SCORES_CAP {
        recent_scores.remove(0);
    }

    let improvement_index = if recent_scores.len() >= IMPROVEMENT_MIN_HISTORY {
        let mid = recent_scores.len() / 2;
        let older = &recent_scores[..mid];
        let newer = &recent_scores[mid..];
        round1(mean(newer) - mean(older))
    } else {
        // 履歴不足の間は既存値を維持（新規プロフィールは0）
        existing.map(|e| e.improvement_index).unwrap_or(0.0)
    };

    // アーキタイプ出現回数（初出順を維持）
    let mut archetype_counts = existing
        .map(|e| e.archetype_counts.clone())
        .unwrap_or_default();
    if let Some(archetype) = score.detected_archetype {
        let key = archetype.as_str().to_string();
        match archetype_counts.iter_mut().find(|(name, _)| *name == key) {
            Some((_, count)) => *count += 1,
            None => archetype_counts.push((key, 1)),
        }
    }
    // 最頻値。同数の場合は先に現れたものが勝つ
    let mut dominant_archetype: Option<(String, u32)> = None;
    for (name, count) in &archetype_counts {
        if dominant_archetype
            .as_ref()
            .map_or(true, |(_, best)| *count > *best)
        {
            dominant_archetype = Some((name.clone(), *count));
        }
    }
    let dominant_archetype = dominant_archetype.map(|(name, _)| name);

    let top_strengths: Vec<String> = score.strength_tags.iter().take(TOP_TAGS).cloned().collect();
    let top_weaknesses: Vec<String> = score.mistake_tags.iter().take(TOP_TAGS).cloned().collect();

    ChatterProfile {
        chatter_email: score.chatter_email.clone(),
        creator_id: score.creator_id.clone(),
        chatter_name: chatter_name.or_else(|| existing.and_then(|e| e.chatter_name.clone())),
        avg_total_score,
        avg_sla_score,
        avg_followup_score,
        avg_trigger_score,
        avg_quality_score,
        avg_revenue_score,
        dominant_archetype,
        archetype_counts,
        recent_scores,
        improvement_index,
        total_scoring_sessions: existing.map(|e| e.total_scoring_sessions).unwrap_or(0) + 1,
        top_strengths,
        top_weaknesses,
        updated_at: now,
    }
}

/// プロフィールを読み込み、更新し、書き戻す
pub fn update_chatter_profile(
    db: &mut ScoreDatabase,
    score: &ScoringResult,
    now: DateTime<Utc>,
) -> Result<ChatterProfile> {
    let existing = db.get_profile(&score.chatter_email, &score.creator_id)?;
    let chatter_name = db.chatter_name_for(&score.chatter_email)?;

    let updated = apply_score(existing.as_ref(), score, chatter_name, now);
    db.upsert_profile(&updated)?;
    Ok(updated)
}
