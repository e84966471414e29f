use anyhow::{Context, Result};
use chatterscore::config::{self, AppConfig, LogConfig};
use chatterscore::database::{get_database_path, ScoreDatabase};
use chatterscore::ingest::{sync_transactions, SyncOptions};
use chatterscore::scoring::window::{build_scoring_windows, last_completed_hour};
use chatterscore::{
    ChatCompletionClient, OfapiClient, ScoringEngine, ScoringOptions, TelegramNotifier,
};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// チャッター採点バッチ
#[derive(Parser)]
#[command(name = "chatterscore", version, about = "Chatter performance scoring engine")]
struct Cli {
    /// データベースファイル（省略時はXDGデータディレクトリ）
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 直近の完了した1時間を採点する
    Score {
        /// 明示的なウィンドウ開始時刻（RFC3339、正時）
        #[arg(long)]
        window_start: Option<String>,
        /// AI判定を使わず決定的スコアのみで採点する
        #[arg(long)]
        no_ai: bool,
    },
    /// 設定された間隔で採点と取引同期を繰り返す
    Run,
    /// 取引データを同期する
    SyncTransactions {
        /// 過去30日分を取り込む（通常は48時間）
        #[arg(long)]
        backfill: bool,
    },
    /// チャッタープロフィールを表示する
    Profile {
        chatter_email: String,
        creator_id: String,
    },
}

/// ログ初期化
///
/// RUST_LOG があればそれを優先し、なければ設定のログレベルを使う。
/// ファイル出力が有効な場合は日次ローテーションのレイヤーを追加する。
fn init_logging(config: &LogConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if config.enable_file_logging {
        let log_dir = match &config.log_dir {
            Some(dir) => dir.clone(),
            None => {
                let dirs = directories::ProjectDirs::from("dev", "chatterscore", "chatterscore")
                    .context("Failed to get project directories")?;
                dirs.data_dir().join("logs")
            }
        };
        std::fs::create_dir_all(&log_dir)?;

        let appender = tracing_appender::rolling::daily(&log_dir, "chatterscore.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;
        Ok(None)
    }
}

fn open_database(cli_path: &Option<PathBuf>, config: &AppConfig) -> Result<ScoreDatabase> {
    let path = match cli_path.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => get_database_path()?,
    };
    tracing::debug!("Opening database: {:?}", path);
    ScoreDatabase::new(path)
}

fn build_engine(config: &AppConfig, db: ScoreDatabase, use_ai: bool) -> ScoringEngine {
    let chat_source = Arc::new(OfapiClient::new(
        config.ofapi.base_url.clone(),
        config.ofapi.timeout_ms,
    ));

    let mut engine = ScoringEngine::new(
        db,
        chat_source,
        ScoringOptions {
            max_chats: config.scoring.max_chats,
            use_ai,
        },
    );

    match ChatCompletionClient::from_config(&config.scoring_judge) {
        Some(judge) => engine = engine.with_judge(Arc::new(judge)),
        None => tracing::warn!("Scoring judge API key not configured, deterministic-only scoring"),
    }

    match ChatCompletionClient::from_config(&config.story_judge) {
        Some(story) => engine = engine.with_story_analyzer(Arc::new(story)),
        None => tracing::warn!("Story analysis API key not configured, skipping story analysis"),
    }

    if config.telegram.enabled {
        if let Some(token) = &config.telegram.bot_token {
            engine = engine.with_notifier(TelegramNotifier::new(token.clone()));
        }
    }

    engine
}

/// 1バッチ分の採点を実行する
async fn score_once(
    engine: &ScoringEngine,
    config: &AppConfig,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<()> {
    tracing::info!(
        "Scoring window: {} → {}",
        window_start.to_rfc3339(),
        window_end.to_rfc3339()
    );

    let windows = {
        let db = engine.db();
        let db = db.lock();
        build_scoring_windows(&db, window_start, window_end)?
    };

    if windows.is_empty() {
        tracing::info!("No active chatter sessions in scoring window");
        return Ok(());
    }

    let summary = engine
        .run_batch(
            windows,
            Utc::now(),
            config.scoring.max_pairs_per_run,
            std::time::Duration::from_secs(config.scoring.run_budget_secs),
        )
        .await;

    tracing::info!(
        "Batch done: {} pairs total, {} attempted, {} scored, {} skipped, {} failed",
        summary.total_pairs,
        summary.attempted,
        summary.scored,
        summary.skipped,
        summary.failed
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_or_default();
    let _log_guard = init_logging(&config.log)?;

    tracing::info!("🎯 chatterscore - chatter performance scoring engine");

    match cli.command {
        Command::Score {
            window_start,
            no_ai,
        } => {
            let (start, end) = match window_start {
                Some(raw) => {
                    let start = DateTime::parse_from_rfc3339(&raw)
                        .with_context(|| format!("Invalid window start: {}", raw))?
                        .with_timezone(&Utc);
                    (start, start + Duration::hours(1))
                }
                None => last_completed_hour(Utc::now()),
            };

            let db = open_database(&cli.database, &config)?;
            let engine = build_engine(&config, db, !no_ai && config.scoring.use_ai);
            score_once(&engine, &config, start, end).await?;
        }

        Command::Run => {
            let db = open_database(&cli.database, &config)?;
            let engine = build_engine(&config, db, config.scoring.use_ai);
            let sync_client =
                OfapiClient::new(config.ofapi.base_url.clone(), config.ofapi.timeout_ms);

            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                config.scoring.interval_minutes * 60,
            ));
            tracing::info!(
                "Entering scoring loop (every {} minutes), Ctrl-C to stop",
                config.scoring.interval_minutes
            );

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutdown requested, stopping loop");
                        break;
                    }
                    _ = interval.tick() => {
                        let now = Utc::now();

                        match sync_transactions(
                            &engine.db(),
                            &sync_client,
                            &SyncOptions::incremental(),
                            now,
                        )
                        .await
                        {
                            Ok(summary) => tracing::info!(
                                "Transaction sync: {} creators, {} inserted, {} updated, {} errors",
                                summary.creators, summary.inserted, summary.updated, summary.errors
                            ),
                            Err(e) => tracing::error!("Transaction sync failed: {:#}", e),
                        }

                        let (start, end) = last_completed_hour(now);
                        if let Err(e) = score_once(&engine, &config, start, end).await {
                            tracing::error!("Scoring batch failed: {:#}", e);
                        }
                    }
                }
            }
        }

        Command::SyncTransactions { backfill } => {
            let db = open_database(&cli.database, &config)?;
            let db = parking_lot::Mutex::new(db);
            let client = OfapiClient::new(config.ofapi.base_url.clone(), config.ofapi.timeout_ms);
            let options = if backfill {
                SyncOptions::backfill()
            } else {
                SyncOptions::incremental()
            };

            let summary = sync_transactions(&db, &client, &options, Utc::now()).await?;
            tracing::info!(
                "Transaction sync: {} creators, {} inserted, {} updated, {} errors",
                summary.creators,
                summary.inserted,
                summary.updated,
                summary.errors
            );
        }

        Command::Profile {
            chatter_email,
            creator_id,
        } => {
            let db = open_database(&cli.database, &config)?;
            match db.get_profile(&chatter_email, &creator_id)? {
                Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
                None => println!("No profile found for {} @ {}", chatter_email, creator_id),
            }
        }
    }

    Ok(())
}
