use serde::{Deserialize, Serialize};

/// Canonical inbound message, shared by every channel.
///
/// Created by an adapter for each accepted provider event and never mutated
/// afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: String,
    pub chat_jid: String,
    pub sender: String,
    pub sender_name: String,
    pub content: String,
    /// ISO-8601 (UTC).
    pub timestamp: String,
    pub is_from_me: bool,
    pub is_bot_message: bool,
}

/// Chat metadata reported to the host whenever a conversation shows activity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMetadata {
    pub jid: String,
    pub timestamp: String,
    pub name: Option<String>,
    pub channel: &'static str,
    pub is_group: bool,
}

/// Capabilities / feature flags of a channel implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelCapabilities {
    /// The agent can target a reaction at a prior message.
    pub reactions: bool,
    pub threads: bool,
    pub files: bool,
    pub max_message_len: usize,
}

/// Registered conversation, keyed by its top-level JID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredGroup {
    pub name: String,
    /// Storage folder name (relative to the data dir's group roots).
    pub folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
}
