//! Telegram通知チャンネル
//!
//! スコア通知の送信先。プロセス全体で1つのHTTPクライアントを
//! `OnceLock` で共有する。配信失敗は呼び出し側でログに落として
//! 握りつぶす前提の、ベストエフォートな出口。

use serde_json::Value;
use std::sync::OnceLock;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("Request failed")]
    Request(#[from] reqwest::Error),
    #[error("Telegram API error: {description}")]
    Api { description: String },
    #[error("Chat {chat_id} is unreachable")]
    Undeliverable { chat_id: String },
}

/// プロセス共有のHTTPクライアント
static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn shared_client() -> &'static reqwest::Client {
    HTTP_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Telegram Bot APIのsendMessageラッパー
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
        }
    }

    /// メッセージを1件送信する
    ///
    /// 「chat not found」系の恒久的な配信不能は `Undeliverable` として
    /// 区別する。リトライしても無駄なので呼び出し側はスキップ扱いにする。
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let res = shared_client().post(&url).json(&body).send().await?;
        let value: Value = res.json().await?;

        let ok = value.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if ok {
            return Ok(());
        }

        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();

        let lowered = description.to_lowercase();
        if lowered.contains("chat not found") || lowered.contains("bots can't send messages") {
            return Err(NotifyError::Undeliverable {
                chat_id: chat_id.to_string(),
            });
        }

        Err(NotifyError::Api { description })
    }
}
