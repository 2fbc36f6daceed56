use async_trait::async_trait;

use crate::{messaging::types::ChannelCapabilities, Result};

/// Cross-channel port.
///
/// Every adapter (Slack, Telegram, ...) implements this. The router only ever
/// talks to channels through `owns_jid` / `is_connected` / `send_message`, so it
/// never needs to know adapter internals.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable channel name (also used as the JID scheme in logs).
    fn name(&self) -> &str;

    fn capabilities(&self) -> ChannelCapabilities;

    /// Disconnected -> Connecting -> Connected, then drain queued outbound text.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// True iff the JID's scheme belongs to this channel.
    fn owns_jid(&self, jid: &str) -> bool;

    /// Best-effort send. Transport failures are queued for retry, never returned.
    async fn send_message(&self, jid: &str, text: &str) -> Result<()>;

    /// Upload a file from the conversation's storage. Failures are logged only.
    async fn send_file(&self, jid: &str, path: &str, title: Option<&str>) -> Result<()>;
}
