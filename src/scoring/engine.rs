//! スコア集約と永続化
//!
//! 1ウィンドウの採点を最初から最後まで進めるオーケストレーター:
//! 冪等性チェック → 取得/帰属 → 決定的スコア → AI判定 → 合成 →
//! 永続化 → プロフィール更新 → 通知。ウィンドウ内のどの失敗も
//! バッチの他のウィンドウを止めない。

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use crate::api::completion::JudgmentProvider;
use crate::api::ofapi::ChatSource;
use crate::api::telegram::TelegramNotifier;
use crate::database::{HourlyScoreRecord, ScoreDatabase};
use crate::scoring::deterministic::{
    compute_revenue_score, compute_sla_score, detect_copy_paste, detect_robot_phrases, detect_spam,
};
use crate::scoring::fetch::fetch_and_attribute;
use crate::scoring::judge::{run_ai_scoring, JudgmentContext, NotableQuote, JUDGE_MIN_MESSAGES};
use crate::scoring::notify::{format_score_card, should_notify, NotificationGate};
use crate::scoring::profile::update_chatter_profile;
use crate::scoring::story::run_story_analysis;
use crate::scoring::transcript::{
    build_conversation_snapshot, detect_copy_paste_blasts, format_conversations,
};
use crate::scoring::types::{ScoringResult, ScoringWindow};

/// ペナルティ1件の重み
const PENALTY: i32 = -10;

/// 採点の動作オプション
#[derive(Debug, Clone)]
pub struct ScoringOptions {
    /// 1ウィンドウあたりの走査チャット数上限
    pub max_chats: usize,
    /// AI判定の有効化
    pub use_ai: bool,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            max_chats: 5,
            use_ai: true,
        }
    }
}

/// バッチ実行の集計
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total_pairs: usize,
    pub attempted: usize,
    pub scored: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// 採点エンジン
///
/// DB接続は1本をMutexで直列化する。ロックをawaitをまたいで
/// 保持しないこと。
pub struct ScoringEngine {
    db: Arc<Mutex<ScoreDatabase>>,
    chat_source: Arc<dyn ChatSource>,
    judge: Option<Arc<dyn JudgmentProvider>>,
    story: Option<Arc<dyn JudgmentProvider>>,
    notifier: Option<TelegramNotifier>,
    gate: NotificationGate,
    options: ScoringOptions,
}

impl ScoringEngine {
    pub fn new(
        db: ScoreDatabase,
        chat_source: Arc<dyn ChatSource>,
        options: ScoringOptions,
    ) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            chat_source,
            judge: None,
            story: None,
            notifier: None,
            gate: NotificationGate::default(),
            options,
        }
    }

    /// 採点用AI判定プロバイダーを設定
    pub fn with_judge(mut self, judge: Arc<dyn JudgmentProvider>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// ストーリー分析プロバイダーを設定
    pub fn with_story_analyzer(mut self, story: Arc<dyn JudgmentProvider>) -> Self {
        self.story = Some(story);
        self
    }

    /// Telegram通知を設定
    pub fn with_notifier(mut self, notifier: TelegramNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// 共有DBハンドル（CLIの照会用）
    pub fn db(&self) -> Arc<Mutex<ScoreDatabase>> {
        Arc::clone(&self.db)
    }

    /// 1ウィンドウを採点する
    ///
    /// スキップ条件（採点済み・メッセージなし）とエラーはどちらもNone。
    /// エラーはウィンドウの識別情報付きでログに残る。
    pub async fn score_window(&self, window: &ScoringWindow) -> Option<ScoringResult> {
        match self.score_window_inner(window).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    "Error scoring {} @ {}: {:#}",
                    window.chatter_email,
                    window.creator_name,
                    e
                );
                None
            }
        }
    }

    async fn score_window_inner(&self, window: &ScoringWindow) -> Result<Option<ScoringResult>> {
        // 冪等性チェック: 同じ組は一度しか採点しない
        {
            let db = self.db.lock();
            if db.hourly_score_exists(
                &window.chatter_email,
                &window.creator_id,
                window.window_start,
            )? {
                tracing::info!(
                    "Score already exists for {} @ {}",
                    window.chatter_email,
                    window.creator_name
                );
                return Ok(None);
            }
        }

        // メッセージ取得と帰属
        let outcome =
            fetch_and_attribute(self.chat_source.as_ref(), window, self.options.max_chats).await;

        if outcome.all_messages.is_empty() {
            tracing::info!(
                "No messages for {} @ {}",
                window.chatter_email,
                window.creator_name
            );
            return Ok(None);
        }

        // 決定的スコア
        let sla_score_det = compute_sla_score(&outcome.response_delays);
        let robot_result = detect_robot_phrases(&outcome.chatter_messages);
        let copy_paste_detected = detect_copy_paste(&outcome.chatter_messages);
        let spam_detected = detect_spam(&outcome.chatter_messages);
        let revenue = {
            let db = self.db.lock();
            db.revenue_in_window(&window.creator_id, window.window_start, window.window_end)?
        };
        let revenue_score = compute_revenue_score(revenue);

        // AI判定（ベストエフォート）
        let formatted = format_conversations(&outcome.all_messages);
        let ai_result = match (&self.judge, self.options.use_ai) {
            (Some(judge), true) if outcome.all_messages.len() >= JUDGE_MIN_MESSAGES => {
                let avg_response_time_sec = (!outcome.response_delays.is_empty()).then(|| {
                    outcome.response_delays.iter().sum::<f64>()
                        / outcome.response_delays.len() as f64
                });
                run_ai_scoring(
                    judge.as_ref(),
                    &formatted,
                    &JudgmentContext {
                        chatter_email: window.chatter_email.clone(),
                        creator_name: window.creator_name.clone(),
                        avg_response_time_sec,
                        robot_phrase_count: robot_result.robot_count,
                        creative_phrase_count: robot_result.creative_count,
                        total_messages: outcome.all_messages.len(),
                    },
                )
                .await
            }
            _ => None,
        };

        // 合成: SLAはAIが走れば上書き、AIサブスコアは無ければ0。
        // コピペ/スパムは決定的検出とAI検出のORでペナルティ、
        // シグナル無視はAI検出のみ。
        let sla_score = ai_result
            .as_ref()
            .map(|ai| ai.sla_score)
            .unwrap_or(sla_score_det);
        let followup_score = ai_result.as_ref().map(|ai| ai.followup_score).unwrap_or(0);
        let trigger_score = ai_result.as_ref().map(|ai| ai.trigger_score).unwrap_or(0);
        let quality_score = ai_result.as_ref().map(|ai| ai.quality_score).unwrap_or(0);

        let ai_copy_paste = ai_result
            .as_ref()
            .map(|ai| ai.copy_paste_detected)
            .unwrap_or(false);
        let ai_spam = ai_result
            .as_ref()
            .map(|ai| ai.spam_detected)
            .unwrap_or(false);
        let ai_missed = ai_result
            .as_ref()
            .map(|ai| ai.missed_high_intent)
            .unwrap_or(false);

        let copy_paste_penalty = if copy_paste_detected || ai_copy_paste {
            PENALTY
        } else {
            0
        };
        let missed_trigger_penalty = if ai_missed { PENALTY } else { 0 };
        let spam_penalty = if spam_detected || ai_spam { PENALTY } else { 0 };

        let raw_total = sla_score
            + followup_score
            + trigger_score
            + quality_score
            + revenue_score
            + copy_paste_penalty
            + missed_trigger_penalty
            + spam_penalty;
        let total_score = raw_total.clamp(0, 100);

        let conversations_scanned = {
            let mut chat_ids: Vec<&str> = outcome
                .all_messages
                .iter()
                .map(|m| m.chat_id.as_str())
                .collect();
            chat_ids.sort_unstable();
            chat_ids.dedup();
            chat_ids.len()
        };

        let result = ScoringResult {
            chatter_email: window.chatter_email.clone(),
            creator_id: window.creator_id.clone(),
            creator_name: window.creator_name.clone(),
            window_start: window.window_start,
            window_end: window.window_end,
            attribution_confidence: window.attribution_confidence,
            sla_score,
            followup_score,
            trigger_score,
            quality_score,
            revenue_score,
            copy_paste_penalty,
            missed_trigger_penalty,
            spam_penalty,
            total_score,
            detected_archetype: ai_result.as_ref().and_then(|ai| ai.detected_archetype),
            conversations_scanned,
            messages_analyzed: outcome.all_messages.len(),
            robot_phrase_count: robot_result.robot_count,
            creative_phrase_count: robot_result.creative_count,
            ai_notes: ai_result
                .as_ref()
                .filter(|ai| !ai.notes.is_empty())
                .map(|ai| ai.notes.clone()),
            mistake_tags: ai_result
                .as_ref()
                .map(|ai| ai.mistake_tags.clone())
                .unwrap_or_default(),
            strength_tags: ai_result
                .as_ref()
                .map(|ai| ai.strength_tags.clone())
                .unwrap_or_default(),
        };

        // 会話スナップショットとストーリー分析（付加情報）
        let mut snapshot = build_conversation_snapshot(&outcome.all_messages);
        snapshot.story_analysis = run_story_analysis(
            self.story.as_deref(),
            &formatted,
            outcome.all_messages.len(),
        )
        .await;

        let copy_paste_blasts = detect_copy_paste_blasts(&outcome.all_messages);
        let notable_quotes: Vec<NotableQuote> = ai_result
            .as_ref()
            .map(|ai| ai.notable_quotes.clone())
            .unwrap_or_default();

        let now = Utc::now();
        let record = HourlyScoreRecord {
            id: uuid::Uuid::new_v4().to_string(),
            chatter_email: result.chatter_email.clone(),
            creator_id: result.creator_id.clone(),
            window_start: result.window_start,
            window_end: result.window_end,
            sla_score: result.sla_score,
            followup_score: result.followup_score,
            trigger_score: result.trigger_score,
            quality_score: result.quality_score,
            revenue_score: result.revenue_score,
            copy_paste_penalty: result.copy_paste_penalty,
            missed_trigger_penalty: result.missed_trigger_penalty,
            spam_penalty: result.spam_penalty,
            total_score: result.total_score,
            attribution_confidence: result.attribution_confidence.as_str().to_string(),
            detected_archetype: result.detected_archetype.map(|a| a.as_str().to_string()),
            conversations_scanned: result.conversations_scanned as i64,
            messages_analyzed: result.messages_analyzed as i64,
            robot_phrase_count: result.robot_phrase_count as i64,
            creative_phrase_count: result.creative_phrase_count as i64,
            ai_notes: result.ai_notes.clone(),
            mistake_tags: result.mistake_tags.clone(),
            strength_tags: result.strength_tags.clone(),
            notable_quotes: notable_quotes.clone(),
            conversation_snapshot: Some(snapshot),
            copy_paste_blasts,
            created_at: now,
        };

        // 永続化（ここが耐久性の境界）。UNIQUE制約で競合した場合は
        // 別の実行が先に書いたということなので、採点済み扱いで終わる。
        {
            let mut db = self.db.lock();
            if !db.insert_hourly_score(&record)? {
                tracing::info!(
                    "Concurrent score insert detected for {} @ {}, skipping",
                    window.chatter_email,
                    window.creator_name
                );
                return Ok(None);
            }
        }

        // 永続化が成功してからプロフィールを更新する
        {
            let mut db = self.db.lock();
            update_chatter_profile(&mut db, &result, now)?;
        }

        // 通知はベストエフォート
        self.dispatch_notification(&result, &notable_quotes, now)
            .await;

        tracing::info!(
            "{} @ {}: {}/100 ({})",
            result.chatter_email,
            result.creator_name,
            result.total_score,
            result
                .detected_archetype
                .map(|a| a.as_str())
                .unwrap_or("no archetype")
        );

        Ok(Some(result))
    }

    /// スコア通知を送る。失敗はログに落として握りつぶす。
    async fn dispatch_notification(
        &self,
        result: &ScoringResult,
        notable_quotes: &[NotableQuote],
        now: DateTime<Utc>,
    ) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        // 判定・宛先解決はロック内、送信はロック外
        let decision = {
            let db = self.db.lock();
            should_notify(&db, result, now).and_then(|should| {
                let chat_id = db
                    .get_creator(&result.creator_id)?
                    .and_then(|c| c.notify_chat_id().map(|id| id.to_string()));
                let chatter_name = db.chatter_name_for(&result.chatter_email)?;
                Ok((should, chat_id, chatter_name))
            })
        };

        let (should, chat_id, chatter_name) = match decision {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!("Notification decision failed: {}", e);
                return;
            }
        };

        if !should {
            tracing::info!(
                "Skipping notification for {} (frequency control)",
                result.chatter_email
            );
            return;
        }

        if !self.gate.permit(&result.chatter_email, &result.creator_id) {
            tracing::debug!(
                "Skipping notification for {} (recently sent)",
                result.chatter_email
            );
            return;
        }

        let Some(chat_id) = chat_id else {
            tracing::debug!("No notification destination for {}", result.creator_id);
            return;
        };

        let card = format_score_card(result, chatter_name.as_deref(), notable_quotes);
        match notifier.send_message(&chat_id, &card).await {
            Ok(()) => {
                tracing::info!("Sent score notification for {} to {}", result.chatter_email, chat_id);
            }
            Err(e) => {
                tracing::warn!("Notification failed: {}", e);
            }
        }
    }

    /// ウィンドウのバッチを順に採点する
    ///
    /// 実行のたびに時間インデックスで開始位置を回転させ、ペア数上限と
    /// 時間予算を守って途中で打ち切る。1ウィンドウの失敗は他を止めない。
    pub async fn run_batch(
        &self,
        windows: Vec<ScoringWindow>,
        now: DateTime<Utc>,
        max_pairs: usize,
        budget: StdDuration,
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            total_pairs: windows.len(),
            ..Default::default()
        };

        if windows.is_empty() {
            return summary;
        }

        let offset = rotation_offset(now, windows.len());
        let rotated: Vec<&ScoringWindow> =
            windows.iter().skip(offset).chain(windows.iter().take(offset)).collect();

        let started = Instant::now();

        for window in rotated.into_iter().take(max_pairs) {
            if started.elapsed() > budget {
                tracing::info!("Batch time budget hit, stopping early");
                break;
            }

            summary.attempted += 1;
            match self.score_window_inner(window).await {
                Ok(Some(_)) => summary.scored += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        "Error scoring {} @ {}: {:#}",
                        window.chatter_email,
                        window.creator_name,
                        e
                    );
                }
            }
        }

        summary
    }
}

/// バッチ間でペアを巡回させるための開始オフセット
fn rotation_offset(now: DateTime<Utc>, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    ((now.timestamp() / 3600).rem_euclid(len as i64)) as usize
}
