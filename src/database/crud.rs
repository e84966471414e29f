use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::de::DeserializeOwned;

use super::{
    ChatterProfile, CreatorAccount, HourlyScoreRecord, ScoreDatabase, ShiftRecord,
    TransactionRecord,
};
use crate::api::ofapi::{AccountId, ApiToken};

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// JSONカラムの読み出し。壊れた値はデフォルトに落とす。
fn json_vec<T: DeserializeOwned>(s: &str) -> Vec<T> {
    serde_json::from_str(s).unwrap_or_default()
}

fn row_to_creator(row: &Row<'_>) -> rusqlite::Result<CreatorAccount> {
    Ok(CreatorAccount {
        id: row.get("id")?,
        name: row.get("name")?,
        account_id: row
            .get::<_, Option<String>>("account_id")?
            .map(AccountId),
        api_token: row
            .get::<_, Option<String>>("api_token")?
            .map(ApiToken::new),
        telegram_group_id: row.get("telegram_group_id")?,
        telegram_id: row.get("telegram_id")?,
    })
}

impl ScoreDatabase {
    /// クリエイターを作成または更新
    pub fn upsert_creator(&mut self, creator: &CreatorAccount) -> Result<()> {
        self.connection.execute(
            "INSERT INTO creators (id, name, account_id, api_token, telegram_group_id, telegram_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET \
                name = excluded.name, \
                account_id = excluded.account_id, \
                api_token = excluded.api_token, \
                telegram_group_id = excluded.telegram_group_id, \
                telegram_id = excluded.telegram_id",
            params![
                creator.id,
                creator.name,
                creator.account_id.as_ref().map(|a| a.0.clone()),
                creator.api_token.as_ref().map(|t| t.as_str().to_string()),
                creator.telegram_group_id,
                creator.telegram_id,
            ],
        )?;
        Ok(())
    }

    /// クリエイターを取得
    pub fn get_creator(&self, id: &str) -> Result<Option<CreatorAccount>> {
        let mut stmt = self
            .connection
            .prepare("SELECT * FROM creators WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], row_to_creator)?;
        Ok(rows.next().transpose()?)
    }

    /// APIトークンを持つクリエイターを列挙（取引同期の対象）
    pub fn list_creators_with_tokens(&self) -> Result<Vec<CreatorAccount>> {
        let mut stmt = self.connection.prepare(
            "SELECT * FROM creators \
             WHERE api_token IS NOT NULL AND account_id IS NOT NULL \
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_creator)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// シフト記録を保存
    pub fn insert_shift(&mut self, shift: &ShiftRecord) -> Result<()> {
        self.connection.execute(
            "INSERT INTO shifts (id, chatter_email, chatter_name, creator_id, clock_in, clock_out) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                shift.id,
                shift.chatter_email,
                shift.chatter_name,
                shift.creator_id,
                shift.clock_in.to_rfc3339(),
                shift.clock_out.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// ウィンドウと重なるシフトをクリエイター情報付きで取得
    ///
    /// 重なり条件: clock_in <= window_end かつ
    /// (clock_out IS NULL または clock_out >= window_start)
    pub fn shifts_overlapping(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<(ShiftRecord, CreatorAccount)>> {
        let mut stmt = self.connection.prepare(
            "SELECT s.id AS shift_id, s.chatter_email, s.chatter_name, s.creator_id, \
                    s.clock_in, s.clock_out, \
                    c.id, c.name, c.account_id, c.api_token, c.telegram_group_id, c.telegram_id \
             FROM shifts s \
             JOIN creators c ON c.id = s.creator_id \
             WHERE s.clock_in <= ?1 \
               AND (s.clock_out IS NULL OR s.clock_out >= ?2) \
             ORDER BY s.chatter_email, s.creator_id, s.clock_in",
        )?;

        let rows = stmt.query_map(
            params![window_end.to_rfc3339(), window_start.to_rfc3339()],
            |row| {
                let clock_in: String = row.get("clock_in")?;
                let clock_out: Option<String> = row.get("clock_out")?;
                Ok((
                    row.get::<_, String>("shift_id")?,
                    row.get::<_, String>("chatter_email")?,
                    row.get::<_, Option<String>>("chatter_name")?,
                    row.get::<_, String>("creator_id")?,
                    clock_in,
                    clock_out,
                    row_to_creator(row)?,
                ))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (id, chatter_email, chatter_name, creator_id, clock_in, clock_out, creator) = row?;
            result.push((
                ShiftRecord {
                    id,
                    chatter_email,
                    chatter_name,
                    creator_id,
                    clock_in: parse_ts(&clock_in)?,
                    clock_out: clock_out.as_deref().map(parse_ts).transpose()?,
                },
                creator,
            ));
        }
        Ok(result)
    }

    /// チャッター表示名をシフト記録から取得（最新を優先）
    pub fn chatter_name_for(&self, chatter_email: &str) -> Result<Option<String>> {
        let mut stmt = self.connection.prepare(
            "SELECT chatter_name FROM shifts \
             WHERE chatter_email = ?1 AND chatter_name IS NOT NULL \
             ORDER BY clock_in DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![chatter_email], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?)
    }

    /// 取引を作成または更新（外部IDで重複排除）
    ///
    /// 新規挿入ならtrueを返す。
    pub fn upsert_transaction(&mut self, tx: &TransactionRecord) -> Result<bool> {
        let exists: bool = self
            .connection
            .prepare("SELECT 1 FROM transactions WHERE tx_id = ?1")?
            .exists(params![tx.tx_id])?;

        if exists {
            self.connection.execute(
                "UPDATE transactions SET \
                    creator_id = ?1, \
                    tx_type = COALESCE(?2, tx_type) \
                 WHERE tx_id = ?3",
                params![tx.creator_id, tx.tx_type, tx.tx_id],
            )?;
            return Ok(false);
        }

        self.connection.execute(
            "INSERT INTO transactions \
             (tx_id, creator_id, fan_id, fan_name, fan_username, amount, tx_type, date) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tx.tx_id,
                tx.creator_id,
                tx.fan_id,
                tx.fan_name,
                tx.fan_username,
                tx.amount,
                tx.tx_type,
                tx.date.to_rfc3339(),
            ],
        )?;
        Ok(true)
    }

    /// ウィンドウ内の取引合計金額
    pub fn revenue_in_window(
        &self,
        creator_id: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<f64> {
        let total: f64 = self.connection.query_row(
            "SELECT COALESCE(SUM(amount), 0.0) FROM transactions \
             WHERE creator_id = ?1 AND date >= ?2 AND date <= ?3",
            params![
                creator_id,
                window_start.to_rfc3339(),
                window_end.to_rfc3339()
            ],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// 指定の組のスコアが既に存在するか
    pub fn hourly_score_exists(
        &self,
        chatter_email: &str,
        creator_id: &str,
        window_start: DateTime<Utc>,
    ) -> Result<bool> {
        let exists: bool = self
            .connection
            .prepare(
                "SELECT 1 FROM hourly_scores \
                 WHERE chatter_email = ?1 AND creator_id = ?2 AND window_start = ?3",
            )?
            .exists(params![
                chatter_email,
                creator_id,
                window_start.to_rfc3339()
            ])?;
        Ok(exists)
    }

    /// 時間別スコアを保存
    ///
    /// (chatter_email, creator_id, window_start) のUNIQUE制約で重複を防ぐ。
    /// 既存レコードがある場合は何もせずfalseを返す。
    pub fn insert_hourly_score(&mut self, record: &HourlyScoreRecord) -> Result<bool> {
        let changed = self.connection.execute(
            "INSERT OR IGNORE INTO hourly_scores \
             (id, chatter_email, creator_id, window_start, window_end, \
              sla_score, followup_score, trigger_score, quality_score, revenue_score, \
              copy_paste_penalty, missed_trigger_penalty, spam_penalty, total_score, \
              attribution_confidence, detected_archetype, conversations_scanned, \
              messages_analyzed, robot_phrase_count, creative_phrase_count, ai_notes, \
              mistake_tags, strength_tags, notable_quotes, conversation_snapshot, \
              copy_paste_blasts, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
            params![
                record.id,
                record.chatter_email,
                record.creator_id,
                record.window_start.to_rfc3339(),
                record.window_end.to_rfc3339(),
                record.sla_score,
                record.followup_score,
                record.trigger_score,
                record.quality_score,
                record.revenue_score,
                record.copy_paste_penalty,
                record.missed_trigger_penalty,
                record.spam_penalty,
                record.total_score,
                record.attribution_confidence,
                record.detected_archetype,
                record.conversations_scanned,
                record.messages_analyzed,
                record.robot_phrase_count,
                record.creative_phrase_count,
                record.ai_notes,
                serde_json::to_string(&record.mistake_tags)?,
                serde_json::to_string(&record.strength_tags)?,
                serde_json::to_string(&record.notable_quotes)?,
                record
                    .conversation_snapshot
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&record.copy_paste_blasts)?,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// 時間別スコアを1件取得
    pub fn get_hourly_score(
        &self,
        chatter_email: &str,
        creator_id: &str,
        window_start: DateTime<Utc>,
    ) -> Result<Option<HourlyScoreRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT * FROM hourly_scores \
             WHERE chatter_email = ?1 AND creator_id = ?2 AND window_start = ?3",
        )?;

        let mut rows = stmt.query_map(
            params![chatter_email, creator_id, window_start.to_rfc3339()],
            |row| {
                Ok((
                    row.get::<_, String>("id")?,
                    row.get::<_, String>("chatter_email")?,
                    row.get::<_, String>("creator_id")?,
                    row.get::<_, String>("window_start")?,
                    row.get::<_, String>("window_end")?,
                    [
                        row.get::<_, i32>("sla_score")?,
                        row.get::<_, i32>("followup_score")?,
                        row.get::<_, i32>("trigger_score")?,
                        row.get::<_, i32>("quality_score")?,
                        row.get::<_, i32>("revenue_score")?,
                        row.get::<_, i32>("copy_paste_penalty")?,
                        row.get::<_, i32>("missed_trigger_penalty")?,
                        row.get::<_, i32>("spam_penalty")?,
                        row.get::<_, i32>("total_score")?,
                    ],
                    row.get::<_, String>("attribution_confidence")?,
                    row.get::<_, Option<String>>("detected_archetype")?,
                    [
                        row.get::<_, i64>("conversations_scanned")?,
                        row.get::<_, i64>("messages_analyzed")?,
                        row.get::<_, i64>("robot_phrase_count")?,
                        row.get::<_, i64>("creative_phrase_count")?,
                    ],
                    row.get::<_, Option<String>>("ai_notes")?,
                    [
                        row.get::<_, String>("mistake_tags")?,
                        row.get::<_, String>("strength_tags")?,
                        row.get::<_, String>("notable_quotes")?,
                        row.get::<_, String>("copy_paste_blasts")?,
                    ],
                    row.get::<_, Option<String>>("conversation_snapshot")?,
                    row.get::<_, String>("created_at")?,
                ))
            },
        )?;

        let Some(row) = rows.next().transpose()? else {
            return Ok(None);
        };
        let (
            id,
            chatter_email,
            creator_id,
            window_start,
            window_end,
            scores,
            attribution_confidence,
            detected_archetype,
            counts,
            ai_notes,
            json_cols,
            snapshot_json,
            created_at,
        ) = row;

        Ok(Some(HourlyScoreRecord {
            id,
            chatter_email,
            creator_id,
            window_start: parse_ts(&window_start)?,
            window_end: parse_ts(&window_end)?,
            sla_score: scores[0],
            followup_score: scores[1],
            trigger_score: scores[2],
            quality_score: scores[3],
            revenue_score: scores[4],
            copy_paste_penalty: scores[5],
            missed_trigger_penalty: scores[6],
            spam_penalty: scores[7],
            total_score: scores[8],
            attribution_confidence,
            detected_archetype,
            conversations_scanned: counts[0],
            messages_analyzed: counts[1],
            robot_phrase_count: counts[2],
            creative_phrase_count: counts[3],
            ai_notes,
            mistake_tags: json_vec(&json_cols[0]),
            strength_tags: json_vec(&json_cols[1]),
            notable_quotes: json_vec(&json_cols[2]),
            copy_paste_blasts: json_vec(&json_cols[3]),
            conversation_snapshot: snapshot_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            created_at: parse_ts(&created_at)?,
        }))
    }

    /// 指定時刻以降に作られたスコア件数（通知の頻度制御用）
    pub fn recent_score_count(
        &self,
        chatter_email: &str,
        creator_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM hourly_scores \
             WHERE chatter_email = ?1 AND creator_id = ?2 AND created_at >= ?3",
            params![chatter_email, creator_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// プロフィールを取得
    pub fn get_profile(
        &self,
        chatter_email: &str,
        creator_id: &str,
    ) -> Result<Option<ChatterProfile>> {
        let mut stmt = self.connection.prepare(
            "SELECT * FROM chatter_profiles WHERE chatter_email = ?1 AND creator_id = ?2",
        )?;

        let mut rows = stmt.query_map(params![chatter_email, creator_id], |row| {
            Ok((
                row.get::<_, String>("chatter_email")?,
                row.get::<_, String>("creator_id")?,
                row.get::<_, Option<String>>("chatter_name")?,
                [
                    row.get::<_, f64>("avg_total_score")?,
                    row.get::<_, f64>("avg_sla_score")?,
                    row.get::<_, f64>("avg_followup_score")?,
                    row.get::<_, f64>("avg_trigger_score")?,
                    row.get::<_, f64>("avg_quality_score")?,
                    row.get::<_, f64>("avg_revenue_score")?,
                ],
                row.get::<_, Option<String>>("dominant_archetype")?,
                [
                    row.get::<_, String>("archetype_counts")?,
                    row.get::<_, String>("recent_scores")?,
                    row.get::<_, String>("top_strengths")?,
                    row.get::<_, String>("top_weaknesses")?,
                ],
                row.get::<_, f64>("improvement_index")?,
                row.get::<_, i64>("total_scoring_sessions")?,
                row.get::<_, String>("updated_at")?,
            ))
        })?;

        let Some(row) = rows.next().transpose()? else {
            return Ok(None);
        };
        let (
            chatter_email,
            creator_id,
            chatter_name,
            avgs,
            dominant_archetype,
            json_cols,
            improvement_index,
            total_scoring_sessions,
            updated_at,
        ) = row;

        Ok(Some(ChatterProfile {
            chatter_email,
            creator_id,
            chatter_name,
            avg_total_score: avgs[0],
            avg_sla_score: avgs[1],
            avg_followup_score: avgs[2],
            avg_trigger_score: avgs[3],
            avg_quality_score: avgs[4],
            avg_revenue_score: avgs[5],
            dominant_archetype,
            archetype_counts: json_vec(&json_cols[0]),
            recent_scores: json_vec(&json_cols[1]),
            top_strengths: json_vec(&json_cols[2]),
            top_weaknesses: json_vec(&json_cols[3]),
            improvement_index,
            total_scoring_sessions,
            updated_at: parse_ts(&updated_at)?,
        }))
    }

    /// プロフィールを作成または更新（1文のアトミックなupsert）
    pub fn upsert_profile(&mut self, profile: &ChatterProfile) -> Result<()> {
        self.connection.execute(
            "INSERT INTO chatter_profiles \
             (chatter_email, creator_id, chatter_name, avg_total_score, avg_sla_score, \
              avg_followup_score, avg_trigger_score, avg_quality_score, avg_revenue_score, \
              dominant_archetype, archetype_counts, recent_scores, improvement_index, \
              total_scoring_sessions, top_strengths, top_weaknesses, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17) \
             ON CONFLICT(chatter_email, creator_id) DO UPDATE SET \
                chatter_name = excluded.chatter_name, \
                avg_total_score = excluded.avg_total_score, \
                avg_sla_score = excluded.avg_sla_score, \
                avg_followup_score = excluded.avg_followup_score, \
                avg_trigger_score = excluded.avg_trigger_score, \
                avg_quality_score = excluded.avg_quality_score, \
                avg_revenue_score = excluded.avg_revenue_score, \
                dominant_archetype = excluded.dominant_archetype, \
                archetype_counts = excluded.archetype_counts, \
                recent_scores = excluded.recent_scores, \
                improvement_index = excluded.improvement_index, \
                total_scoring_sessions = excluded.total_scoring_sessions, \
                top_strengths = excluded.top_strengths, \
                top_weaknesses = excluded.top_weaknesses, \
                updated_at = excluded.updated_at",
            params![
                profile.chatter_email,
                profile.creator_id,
                profile.chatter_name,
                profile.avg_total_score,
                profile.avg_sla_score,
                profile.avg_followup_score,
                profile.avg_trigger_score,
                profile.avg_quality_score,
                profile.avg_revenue_score,
                profile.dominant_archetype,
                serde_json::to_string(&profile.archetype_counts)?,
                serde_json::to_string(&profile.recent_scores)?,
                profile.improvement_index,
                profile.total_scoring_sessions,
                serde_json::to_string(&profile.top_strengths)?,
                serde_json::to_string(&profile.top_weaknesses)?,
                profile.updated_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!(
            "Profile upserted: {} @ {} (sessions={})",
            profile.chatter_email,
            profile.creator_id,
            profile.total_scoring_sessions
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> ScoreDatabase {
        ScoreDatabase::new_in_memory().unwrap()
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, m, 0).unwrap()
    }

    fn sample_creator(id: &str) -> CreatorAccount {
        CreatorAccount {
            id: id.to_string(),
            name: Some("Luna".to_string()),
            account_id: Some(AccountId("acct_luna".to_string())),
            api_token: Some(ApiToken::new("token_luna".to_string())),
            telegram_group_id: None,
            telegram_id: None,
        }
    }

    fn sample_score(email: &str, creator: &str, window_start: DateTime<Utc>) -> HourlyScoreRecord {
        HourlyScoreRecord {
            id: uuid::Uuid::new_v4().to_string(),
            chatter_email: email.to_string(),
            creator_id: creator.to_string(),
            window_start,
            window_end: window_start + chrono::Duration::hours(1),
            sla_score: 25,
            followup_score: 10,
            trigger_score: 12,
            quality_score: 14,
            revenue_score: 10,
            copy_paste_penalty: 0,
            missed_trigger_penalty: 0,
            spam_penalty: 0,
            total_score: 71,
            attribution_confidence: "high".to_string(),
            detected_archetype: Some("tease".to_string()),
            conversations_scanned: 2,
            messages_analyzed: 12,
            robot_phrase_count: 1,
            creative_phrase_count: 4,
            ai_notes: Some("solid hour".to_string()),
            mistake_tags: vec!["no_cta".to_string()],
            strength_tags: vec!["built_tension".to_string()],
            notable_quotes: vec![],
            conversation_snapshot: None,
            copy_paste_blasts: vec![],
            created_at: window_start + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_creator_roundtrip() {
        let mut db = test_db();
        db.upsert_creator(&sample_creator("c1")).unwrap();

        let loaded = db.get_creator("c1").unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("Luna"));
        assert!(loaded.has_credentials());

        // 更新しても行は1つのまま
        let mut updated = sample_creator("c1");
        updated.name = Some("Luna V2".to_string());
        db.upsert_creator(&updated).unwrap();
        let loaded = db.get_creator("c1").unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("Luna V2"));
    }

    #[test]
    fn test_shifts_overlapping_window() {
        let mut db = test_db();
        db.upsert_creator(&sample_creator("c1")).unwrap();

        // ウィンドウ 13:00-14:00 に重なるシフト
        db.insert_shift(&ShiftRecord {
            id: "s1".to_string(),
            chatter_email: "ann@agency.test".to_string(),
            chatter_name: Some("Ann".to_string()),
            creator_id: "c1".to_string(),
            clock_in: ts(12, 0),
            clock_out: None,
        })
        .unwrap();
        // ウィンドウ前に終了したシフト
        db.insert_shift(&ShiftRecord {
            id: "s2".to_string(),
            chatter_email: "bob@agency.test".to_string(),
            chatter_name: None,
            creator_id: "c1".to_string(),
            clock_in: ts(8, 0),
            clock_out: Some(ts(12, 30)),
        })
        .unwrap();

        let overlapping = db.shifts_overlapping(ts(13, 0), ts(14, 0)).unwrap();
        assert_eq!(overlapping.len(), 1);
        assert_eq!(overlapping[0].0.chatter_email, "ann@agency.test");
    }

    #[test]
    fn test_hourly_score_unique_triple() {
        let mut db = test_db();
        let score = sample_score("ann@agency.test", "c1", ts(13, 0));

        assert!(db.insert_hourly_score(&score).unwrap());
        assert!(db
            .hourly_score_exists("ann@agency.test", "c1", ts(13, 0))
            .unwrap());

        // 同じ組の2回目の挿入は無視される
        let mut duplicate = sample_score("ann@agency.test", "c1", ts(13, 0));
        duplicate.total_score = 99;
        assert!(!db.insert_hourly_score(&duplicate).unwrap());

        let stored = db
            .get_hourly_score("ann@agency.test", "c1", ts(13, 0))
            .unwrap()
            .unwrap();
        assert_eq!(stored.total_score, 71);
        assert_eq!(stored.mistake_tags, vec!["no_cta".to_string()]);
    }

    #[test]
    fn test_revenue_in_window() {
        let mut db = test_db();
        let tx = |id: &str, amount: f64, date: DateTime<Utc>| TransactionRecord {
            tx_id: id.to_string(),
            creator_id: "c1".to_string(),
            fan_id: Some("f1".to_string()),
            fan_name: Some("Fan".to_string()),
            fan_username: None,
            amount,
            tx_type: Some("tip".to_string()),
            date,
        };

        assert!(db.upsert_transaction(&tx("t1", 20.0, ts(13, 10))).unwrap());
        assert!(db.upsert_transaction(&tx("t2", 10.0, ts(13, 50))).unwrap());
        // ウィンドウ外
        assert!(db.upsert_transaction(&tx("t3", 99.0, ts(15, 0))).unwrap());
        // 重複は挿入されない
        assert!(!db.upsert_transaction(&tx("t1", 20.0, ts(13, 10))).unwrap());

        let revenue = db.revenue_in_window("c1", ts(13, 0), ts(14, 0)).unwrap();
        assert!((revenue - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_profile_roundtrip() {
        let mut db = test_db();
        let profile = ChatterProfile {
            chatter_email: "ann@agency.test".to_string(),
            creator_id: "c1".to_string(),
            chatter_name: Some("Ann".to_string()),
            avg_total_score: 69.0,
            avg_sla_score: 20.0,
            avg_followup_score: 10.0,
            avg_trigger_score: 12.0,
            avg_quality_score: 14.0,
            avg_revenue_score: 8.0,
            dominant_archetype: Some("tease".to_string()),
            archetype_counts: vec![("tease".to_string(), 2), ("chameleon".to_string(), 1)],
            recent_scores: vec![60, 90],
            improvement_index: 0.0,
            total_scoring_sessions: 2,
            top_strengths: vec!["built_tension".to_string()],
            top_weaknesses: vec!["no_cta".to_string()],
            updated_at: ts(14, 0),
        };

        db.upsert_profile(&profile).unwrap();
        let loaded = db.get_profile("ann@agency.test", "c1").unwrap().unwrap();
        assert_eq!(loaded.recent_scores, vec![60, 90]);
        assert_eq!(loaded.archetype_counts[0].0, "tease");
        assert_eq!(loaded.total_scoring_sessions, 2);

        // 上書きも1行のまま
        let mut next = loaded.clone();
        next.total_scoring_sessions = 3;
        db.upsert_profile(&next).unwrap();
        let count: i64 = db
            .connection
            .query_row("SELECT COUNT(*) FROM chatter_profiles", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_chatter_name_for_latest_shift() {
        let mut db = test_db();
        db.upsert_creator(&sample_creator("c1")).unwrap();
        db.insert_shift(&ShiftRecord {
            id: "s1".to_string(),
            chatter_email: "ann@agency.test".to_string(),
            chatter_name: Some("Old Name".to_string()),
            creator_id: "c1".to_string(),
            clock_in: ts(8, 0),
            clock_out: Some(ts(9, 0)),
        })
        .unwrap();
        db.insert_shift(&ShiftRecord {
            id: "s2".to_string(),
            chatter_email: "ann@agency.test".to_string(),
            chatter_name: Some("Ann".to_string()),
            creator_id: "c1".to_string(),
            clock_in: ts(12, 0),
            clock_out: None,
        })
        .unwrap();

        assert_eq!(
            db.chatter_name_for("ann@agency.test").unwrap().as_deref(),
            Some("Ann")
        );
        assert!(db.chatter_name_for("nobody@agency.test").unwrap().is_none());
    }
}
