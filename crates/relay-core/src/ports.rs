//! Collaborators the channel adapters consume.
//!
//! The host process owns registration storage and what happens to inbound
//! messages; transcription lives in its own adapter crate.

use std::{collections::HashMap, path::Path};

use async_trait::async_trait;

use crate::messaging::types::{ChatMetadata, NewMessage, RegisteredGroup};

/// Host-side callbacks handed to every channel adapter.
pub trait ChannelHost: Send + Sync {
    /// Snapshot of the registered conversations, keyed by top-level JID.
    fn registered_groups(&self) -> HashMap<String, RegisteredGroup>;

    fn on_chat_metadata(&self, meta: ChatMetadata);

    fn on_message(&self, jid: &str, msg: NewMessage);
}

/// Audio transcription. Never fails: an empty string means "no transcript".
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path) -> String;
}

/// Used when no transcription backend is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTranscriber;

#[async_trait]
impl Transcriber for NoopTranscriber {
    async fn transcribe(&self, path: &Path) -> String {
        tracing::warn!(path = %path.display(), "no transcription backend configured, skipping");
        String::new()
    }
}

/// True when `jid` (or its top-level conversation) is registered.
///
/// Matches the top-level JID exactly, or any registered JID followed by the
/// thread separator.
pub fn is_registered(groups: &HashMap<String, RegisteredGroup>, group_jid: &str, jid: &str) -> bool {
    groups.contains_key(group_jid)
        || groups
            .keys()
            .any(|g| jid.strip_prefix(g.as_str()).is_some_and(|rest| rest.starts_with(':')))
}
