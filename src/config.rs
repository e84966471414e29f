//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリを使用した設定ファイルの永続化と管理を提供します。
//! APIキーなどの秘密情報は環境変数で上書きできます。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// OFAPI接続設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfapiConfig {
    /// ベースURL
    pub base_url: String,
    /// リクエストタイムアウト（ミリ秒）
    pub timeout_ms: u64,
}

impl Default for OfapiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.onlyfansapi.com".to_string(),
            timeout_ms: 5_000,
        }
    }
}

/// AI採点エンドポイント設定
///
/// OpenAI互換のchat/completionsエンドポイントであれば
/// プロバイダーを問わず利用できる。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// ベースURL（`/chat/completions` の手前まで）
    pub base_url: String,
    /// APIキー（環境変数で上書き可能、ファイルには保存しない想定）
    #[serde(default)]
    pub api_key: Option<String>,
    /// モデル名
    pub model: String,
    /// 生成トークン上限
    pub max_tokens: u32,
    /// サンプリング温度
    pub temperature: f64,
    /// リクエストタイムアウト（ミリ秒）
    pub timeout_ms: u64,
}

impl JudgeConfig {
    /// 採点用デフォルト（GPT-4o-mini）
    pub fn scoring_default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 600,
            temperature: 0.2,
            timeout_ms: 30_000,
        }
    }

    /// ストーリー分析用デフォルト（Kimi K2.5）
    pub fn story_default() -> Self {
        Self {
            base_url: "https://api.moonshot.ai/v1".to_string(),
            api_key: None,
            model: "kimi-k2.5".to_string(),
            max_tokens: 4_096,
            temperature: 0.2,
            timeout_ms: 45_000,
        }
    }
}

/// Telegram通知設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Botトークン（環境変数 TELEGRAM_BOT_TOKEN で上書き可能）
    #[serde(default)]
    pub bot_token: Option<String>,
    /// 通知の有効化
    #[serde(default)]
    pub enabled: bool,
}

/// 採点バッチの動作設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// 1ウィンドウあたりの走査チャット数上限
    pub max_chats: usize,
    /// 1バッチあたりの採点ペア数上限
    pub max_pairs_per_run: usize,
    /// 1バッチの実行時間予算（秒）
    pub run_budget_secs: u64,
    /// ループモードの実行間隔（分）
    pub interval_minutes: u64,
    /// AI採点の有効化
    pub use_ai: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_chats: 5,
            max_pairs_per_run: 3,
            run_budget_secs: 50,
            interval_minutes: 30,
            use_ai: true,
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: false,
        }
    }
}

/// アプリケーション設定
///
/// TOMLの制約上、テーブルでないフィールドを先頭に置くこと。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// データベースファイルパス（Noneの場合はXDGデフォルト使用）
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// OFAPI設定
    #[serde(default)]
    pub ofapi: OfapiConfig,
    /// 採点AI設定
    #[serde(default = "JudgeConfig::scoring_default")]
    pub scoring_judge: JudgeConfig,
    /// ストーリー分析AI設定
    #[serde(default = "JudgeConfig::story_default")]
    pub story_judge: JudgeConfig,
    /// Telegram通知設定
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// 採点バッチ設定
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// ログ設定
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            ofapi: OfapiConfig::default(),
            scoring_judge: JudgeConfig::scoring_default(),
            story_judge: JudgeConfig::story_default(),
            telegram: TelegramConfig::default(),
            scoring: ScoringConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 環境変数から秘密情報を取り込む
    ///
    /// 設定ファイルの値より環境変数を優先する。
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.scoring_judge.api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("MOONSHOT_API_KEY") {
            if !key.is_empty() {
                self.story_judge.api_key = Some(key);
            }
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                self.telegram.bot_token = Some(token);
                self.telegram.enabled = true;
            }
        }
    }
}

/// 設定ファイルの読み書きを管理する
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDG設定ディレクトリを使用するマネージャーを作成
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("dev", "chatterscore", "chatterscore")
            .context("Failed to get project directories")?;

        let config_dir = project_dirs.config_dir();
        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config dir: {:?}", config_dir))?;

        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// 明示的なパスを使用するマネージャーを作成
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// 設定ファイルのパスを取得
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// 設定を読み込む
    ///
    /// ファイルが存在しない場合はデフォルト設定を返す。
    /// 読み込み後に環境変数の上書きを適用する。
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)
                .with_context(|| format!("Failed to read config: {:?}", self.config_path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config: {:?}", self.config_path))?
        } else {
            debug!("Config file not found, using defaults: {:?}", self.config_path);
            AppConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// 設定を保存する
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config: {:?}", self.config_path))?;
        info!("Config saved: {:?}", self.config_path);
        Ok(())
    }
}

/// 設定を読み込む（デフォルトへのフォールバック付き）
pub fn load_or_default() -> AppConfig {
    match ConfigManager::new().and_then(|m| m.load_config()) {
        Ok(config) => config,
        Err(e) => {
            warn!("設定読み込みエラー、デフォルト設定を使用: {}", e);
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config
        }
    }
}
