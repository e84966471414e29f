use anyhow::Result;
use chatterscore::api::ofapi::{AccountId, ApiToken};
use chatterscore::database::{CreatorAccount, ScoreDatabase, ShiftRecord, TransactionRecord};
use chrono::{Duration, Utc};
use rand::Rng;

/// ローカル動作確認用のデモデータを投入する
///
/// クリエイター2件、直近1時間に重なるシフト、ウィンドウ内の取引を
/// 生成する。引数でデータベースパスを指定できる（省略時はカレントの
/// demo.db）。
fn main() -> Result<()> {
    let db_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demo.db".to_string());
    let mut db = ScoreDatabase::new(&db_path)?;
    let mut rng = rand::thread_rng();

    let now = Utc::now();

    let creators = [
        ("creator-luna", "Luna", "acct_luna", "demo_token_luna"),
        ("creator-mia", "Mia", "acct_mia", "demo_token_mia"),
    ];

    for (id, name, account, token) in creators {
        db.upsert_creator(&CreatorAccount {
            id: id.to_string(),
            name: Some(name.to_string()),
            account_id: Some(AccountId(account.to_string())),
            api_token: Some(ApiToken::new(token.to_string())),
            telegram_group_id: None,
            telegram_id: None,
        })?;
    }

    let chatters = [
        ("ann@agency.test", "Ann"),
        ("bob@agency.test", "Bob"),
        ("cara@agency.test", "Cara"),
    ];

    let mut shift_count = 0;
    for (i, (email, name)) in chatters.iter().enumerate() {
        let creator = creators[i % creators.len()].0;
        db.insert_shift(&ShiftRecord {
            id: format!("shift-{}", i),
            chatter_email: email.to_string(),
            chatter_name: Some(name.to_string()),
            creator_id: creator.to_string(),
            clock_in: now - Duration::hours(3),
            clock_out: None,
        })?;
        shift_count += 1;
    }

    // 重なりのあるシフトを1件（帰属確度lowのケース）
    db.insert_shift(&ShiftRecord {
        id: "shift-overlap".to_string(),
        chatter_email: "ann@agency.test".to_string(),
        chatter_name: Some("Ann".to_string()),
        creator_id: "creator-luna".to_string(),
        clock_in: now - Duration::minutes(30),
        clock_out: None,
    })?;
    shift_count += 1;

    let mut tx_count = 0;
    for i in 0..20 {
        let creator = creators[i % creators.len()].0;
        let amount: f64 = match rng.gen_range(0..3) {
            0 => rng.gen_range(3.0..15.0),
            1 => rng.gen_range(15.0..50.0),
            _ => rng.gen_range(50.0..200.0),
        };
        db.upsert_transaction(&TransactionRecord {
            tx_id: format!("demo-tx-{}", i),
            creator_id: creator.to_string(),
            fan_id: Some(format!("fan-{}", rng.gen_range(1..8))),
            fan_name: Some(format!("Fan {}", rng.gen_range(1..8))),
            fan_username: None,
            amount: (amount * 100.0).round() / 100.0,
            tx_type: Some("tip".to_string()),
            date: now - Duration::minutes(rng.gen_range(0..120)),
        })?;
        tx_count += 1;
    }

    println!(
        "Seeded {}: {} creators, {} shifts, {} transactions",
        db_path,
        creators.len(),
        shift_count,
        tx_count
    );
    Ok(())
}
