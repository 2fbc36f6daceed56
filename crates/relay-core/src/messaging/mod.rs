//! Cross-channel abstractions (Slack and Telegram today).

pub mod outbox;
pub mod port;
pub mod tags;
pub mod types;
