//! 取引データの同期
//!
//! 外部サービスの取引履歴をローカルストアに取り込む。収益スコアは
//! ここで同期されたデータの合計から計算される。外部IDで重複排除する
//! ため、何度実行しても安全。

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::api::ofapi::OfapiClient;
use crate::database::{ScoreDatabase, TransactionRecord};

/// 同期オプション
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// 遡って同期する時間
    pub lookback_hours: i64,
    /// クリエイターあたりの取り込み上限
    pub max_per_creator: usize,
}

impl SyncOptions {
    /// 通常の同期（重なりを持たせた48時間）
    pub fn incremental() -> Self {
        Self {
            lookback_hours: 48,
            max_per_creator: 3_000,
        }
    }

    /// 過去データの一括取り込み（30日）
    pub fn backfill() -> Self {
        Self {
            lookback_hours: 30 * 24,
            max_per_creator: 10_000,
        }
    }
}

/// 同期結果の集計
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub creators: usize,
    pub inserted: usize,
    pub updated: usize,
    pub errors: usize,
}

/// 全クリエイターの取引を同期する
///
/// クリエイター単位の失敗はカウントして続行する。
pub async fn sync_transactions(
    db: &Mutex<ScoreDatabase>,
    client: &OfapiClient,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> Result<SyncSummary> {
    let creators = {
        let db = db.lock();
        db.list_creators_with_tokens()?
    };

    let start_window = now - Duration::hours(options.lookback_hours);
    let mut summary = SyncSummary {
        creators: creators.len(),
        ..Default::default()
    };

    for creator in creators {
        let (Some(account_id), Some(api_token)) = (&creator.account_id, &creator.api_token) else {
            continue;
        };

        let transactions = client
            .fetch_all_transactions(account_id, api_token, start_window, options.max_per_creator)
            .await;

        tracing::info!(
            "Fetched {} transactions for {}",
            transactions.len(),
            creator.name.as_deref().unwrap_or(&creator.id)
        );

        let mut db = db.lock();
        for tx in transactions {
            let record = TransactionRecord {
                tx_id: tx.tx_id,
                creator_id: creator.id.clone(),
                fan_id: Some(tx.fan_id),
                fan_name: Some(tx.fan_name),
                fan_username: tx.fan_username,
                amount: tx.amount,
                tx_type: tx.tx_type,
                date: tx.date,
            };

            match db.upsert_transaction(&record) {
                Ok(true) => summary.inserted += 1,
                Ok(false) => summary.updated += 1,
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!("Transaction upsert failed ({}): {}", record.tx_id, e);
                }
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_options_presets() {
        let incremental = SyncOptions::incremental();
        assert_eq!(incremental.lookback_hours, 48);
        assert_eq!(incremental.max_per_creator, 3_000);

        let backfill = SyncOptions::backfill();
        assert_eq!(backfill.lookback_hours, 720);
        assert_eq!(backfill.max_per_creator, 10_000);
    }
}
