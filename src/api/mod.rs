//! External service clients.
//!
//! Everything the scoring pipeline talks to over the network lives here:
//! the chat/transaction source, the structured-judgment endpoints, and the
//! Telegram notification channel. Each client exposes a trait seam so the
//! pipeline can be driven against mocks in tests.

pub mod completion;
pub mod ofapi;
pub mod telegram;

pub use completion::{ChatCompletionClient, JudgmentError, JudgmentProvider};
pub use ofapi::{AccountId, ApiToken, ChatSource, ChatSummary, FetchError, OfapiClient, RawMessage};
pub use telegram::{NotifyError, TelegramNotifier};
