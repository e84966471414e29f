//! OFAPI client — the chat/transaction source.
//!
//! Responses are treated as loosely-typed JSON documents: the upstream
//! service is known to move fields around between versions, so every field
//! is read through an ordered list of fallback locations and missing values
//! default safely instead of failing the whole fetch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Request failed")]
    Request(#[from] reqwest::Error),
    #[error("Request failed with status {status}")]
    Status { status: u16 },
    #[error("Failed to parse JSON")]
    Parse(#[from] serde_json::Error),
    #[error("Resource not found")]
    NotFound,
}

/// Creator account identifier on the external service.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

/// Per-creator API token. Display is intentionally masked.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***")
    }
}

/// One conversation from the chat list.
#[derive(Debug, Clone)]
pub struct ChatSummary {
    /// Counterpart (fan) id, which doubles as the conversation id.
    pub chat_id: String,
    pub fan_name: Option<String>,
}

/// One raw message from a conversation, before attribution.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub text: String,
    /// Sender id; empty string when the payload carries none.
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

/// One transaction from the source, before ingest into the local store.
#[derive(Debug, Clone)]
pub struct SourceTransaction {
    pub tx_id: String,
    pub amount: f64,
    pub fan_id: String,
    pub fan_name: String,
    pub fan_username: Option<String>,
    pub tx_type: Option<String>,
    pub date: DateTime<Utc>,
}

/// Trait seam for the chat source so the pipeline can run against mocks.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// List the most recently active conversations for an account.
    async fn list_chats(
        &self,
        account: &AccountId,
        token: &ApiToken,
        limit: usize,
    ) -> Result<Vec<ChatSummary>, FetchError>;

    /// Fetch recent messages from one conversation.
    async fn chat_messages(
        &self,
        account: &AccountId,
        token: &ApiToken,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct OfapiClient {
    base_url: String,
    client: reqwest::Client,
}

impl OfapiClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    async fn request(&self, endpoint: &str, token: &ApiToken) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let res = self
            .client
            .get(&url)
            .bearer_auth(token.as_str())
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            tracing::warn!("OFAPI error: {} at {}", status.as_u16(), endpoint);
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let value: Value = res.json().await?;
        Ok(value)
    }

    /// Fetch one transactions page. `marker` continues a previous page.
    pub async fn transactions_page(
        &self,
        account: &AccountId,
        token: &ApiToken,
        limit: usize,
        marker: Option<&str>,
    ) -> Result<Value, FetchError> {
        let mut endpoint = format!(
            "/api/{}/transactions?limit={}",
            account,
            limit.min(100)
        );
        if let Some(marker) = marker {
            endpoint.push_str(&format!("&marker={}", marker));
        }
        self.request(&endpoint, token).await
    }

    /// Paginate through transactions until the page runs past `start_window`
    /// or `absolute_max` entries have been collected.
    pub async fn fetch_all_transactions(
        &self,
        account: &AccountId,
        token: &ApiToken,
        start_window: DateTime<Utc>,
        absolute_max: usize,
    ) -> Vec<SourceTransaction> {
        let mut all = Vec::new();
        let mut marker: Option<String> = None;

        while all.len() < absolute_max {
            let page = match self
                .transactions_page(account, token, 100, marker.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!("Transaction page fetch failed for {}: {}", account, e);
                    break;
                }
            };

            let raw_txs = extract_transaction_list(&page);
            if raw_txs.is_empty() {
                break;
            }

            let oldest = raw_txs.last().and_then(parse_transaction).map(|t| t.date);
            all.extend(raw_txs.iter().filter_map(parse_transaction));

            if matches!(oldest, Some(date) if date < start_window) {
                break;
            }

            let has_more = page
                .pointer("/data/hasMore")
                .or_else(|| page.get("hasMore"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            marker = page
                .pointer("/data/nextMarker")
                .or_else(|| page.get("nextMarker"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());

            if !has_more || marker.is_none() {
                break;
            }
        }

        all.truncate(absolute_max);
        all
    }
}

#[async_trait]
impl ChatSource for OfapiClient {
    async fn list_chats(
        &self,
        account: &AccountId,
        token: &ApiToken,
        limit: usize,
    ) -> Result<Vec<ChatSummary>, FetchError> {
        let endpoint = format!(
            "/api/{}/chats?limit={}&offset=0&order=recent&skip_users=none",
            account, limit
        );
        let value = self.request(&endpoint, token).await?;
        Ok(extract_chat_list(&value)
            .iter()
            .filter_map(parse_chat_summary)
            .collect())
    }

    async fn chat_messages(
        &self,
        account: &AccountId,
        token: &ApiToken,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, FetchError> {
        let endpoint = format!(
            "/api/{}/chats/{}/messages?limit={}&order=desc&skip_users=all",
            account, chat_id, limit
        );
        let value = self.request(&endpoint, token).await?;
        Ok(extract_message_list(&value)
            .iter()
            .filter_map(parse_raw_message)
            .collect())
    }
}

// --- Extraction rules ---
//
// Each list/field is resolved through its fallback locations in priority
// order. Order matters: earlier locations are what current payloads use,
// later ones cover older payload shapes.

/// Chat list: `data` (array) → `data.list` → `list`.
pub fn extract_chat_list(value: &Value) -> Vec<Value> {
    if let Some(arr) = value.get("data").and_then(Value::as_array) {
        return arr.clone();
    }
    if let Some(arr) = value.pointer("/data/list").and_then(Value::as_array) {
        return arr.clone();
    }
    value
        .get("list")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Message list: `data.list` → `list` → `data` (array).
pub fn extract_message_list(value: &Value) -> Vec<Value> {
    if let Some(arr) = value.pointer("/data/list").and_then(Value::as_array) {
        return arr.clone();
    }
    if let Some(arr) = value.get("list").and_then(Value::as_array) {
        return arr.clone();
    }
    value
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Transaction list: `data.list` → `list` → `transactions` → `data` (array).
pub fn extract_transaction_list(value: &Value) -> Vec<Value> {
    if let Some(arr) = value.pointer("/data/list").and_then(Value::as_array) {
        return arr.clone();
    }
    if let Some(arr) = value.get("list").and_then(Value::as_array) {
        return arr.clone();
    }
    if let Some(arr) = value.get("transactions").and_then(Value::as_array) {
        return arr.clone();
    }
    value
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Chat id: `withUser.id` → `id`. Fan name: `withUser.name` → `withUser.username`.
pub fn parse_chat_summary(chat: &Value) -> Option<ChatSummary> {
    let chat_id = chat
        .pointer("/withUser/id")
        .or_else(|| chat.get("id"))
        .map(value_to_id_string)?;
    if chat_id.is_empty() {
        return None;
    }

    let fan_name = chat
        .pointer("/withUser/name")
        .or_else(|| chat.pointer("/withUser/username"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    Some(ChatSummary { chat_id, fan_name })
}

/// Sender id: `fromUser.id` → `author.id` → empty string.
pub fn parse_raw_message(msg: &Value) -> Option<RawMessage> {
    let text = msg.get("text").and_then(Value::as_str).unwrap_or_default();
    let created_at = msg
        .get("createdAt")
        .and_then(Value::as_str)
        .and_then(parse_rfc3339)?;
    let sender_id = msg
        .pointer("/fromUser/id")
        .or_else(|| msg.pointer("/author/id"))
        .map(value_to_id_string)
        .unwrap_or_default();

    Some(RawMessage {
        text: text.to_string(),
        sender_id,
        created_at,
    })
}

/// Transaction fields, each through its fallback chain:
/// id: `id` → `transaction_id`; amount: `amount` → `total`;
/// fan: `user.*` → `fan.*`; date: `createdAt` → `created_at` → `date`;
/// type: `type` → `transactionType` → `transaction_type`.
pub fn parse_transaction(tx: &Value) -> Option<SourceTransaction> {
    let tx_id = tx
        .get("id")
        .or_else(|| tx.get("transaction_id"))
        .map(value_to_id_string)?;
    if tx_id.is_empty() {
        return None;
    }

    let amount = tx
        .get("amount")
        .or_else(|| tx.get("total"))
        .and_then(value_as_f64)
        .unwrap_or(0.0);
    if amount == 0.0 {
        return None;
    }

    let fan_id = tx
        .pointer("/user/id")
        .or_else(|| tx.pointer("/fan/id"))
        .map(value_to_id_string)?;
    if fan_id.is_empty() {
        return None;
    }

    let fan_name = tx
        .pointer("/user/name")
        .or_else(|| tx.pointer("/user/displayName"))
        .or_else(|| tx.pointer("/fan/name"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string();
    let fan_username = tx
        .pointer("/user/username")
        .or_else(|| tx.pointer("/fan/username"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    let tx_type = tx
        .get("type")
        .or_else(|| tx.get("transactionType"))
        .or_else(|| tx.get("transaction_type"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    let date = tx
        .get("createdAt")
        .or_else(|| tx.get("created_at"))
        .or_else(|| tx.get("date"))
        .and_then(Value::as_str)
        .and_then(parse_rfc3339)?;

    Some(SourceTransaction {
        tx_id,
        amount,
        fan_id,
        fan_name,
        fan_username,
        tx_type,
        date,
    })
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Ids come back as numbers or strings depending on the endpoint.
fn value_to_id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Amounts come back as numbers or decimal strings.
fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}
