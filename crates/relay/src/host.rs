use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::mpsc;
use tracing::debug;

use relay_core::{
    groups::GroupRegistry,
    messaging::types::{ChatMetadata, NewMessage, RegisteredGroup},
    ports::ChannelHost,
};

/// Inbound message as handed from an adapter to the orchestrator.
pub type Inbound = (String, NewMessage);

/// `ChannelHost` backed by the JSON group registry. Messages are forwarded to
/// the orchestrator over a channel so adapters never wait on an agent run.
pub struct Host {
    registry: Arc<GroupRegistry>,
    chats: Mutex<HashMap<String, ChatMetadata>>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl Host {
    pub fn new(registry: Arc<GroupRegistry>, inbound: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            registry,
            chats: Mutex::new(HashMap::new()),
            inbound,
        }
    }
}

impl ChannelHost for Host {
    fn registered_groups(&self) -> HashMap<String, RegisteredGroup> {
        self.registry.snapshot()
    }

    fn on_chat_metadata(&self, meta: ChatMetadata) {
        let mut chats = self.chats.lock().unwrap_or_else(PoisonError::into_inner);
        match chats.get_mut(&meta.jid) {
            // keep a known name when the update carries none
            Some(known) => {
                known.timestamp = meta.timestamp;
                if meta.name.is_some() {
                    known.name = meta.name;
                }
            }
            None => {
                debug!(jid = %meta.jid, channel = meta.channel, "new chat seen");
                chats.insert(meta.jid.clone(), meta);
            }
        }
    }

    fn on_message(&self, jid: &str, msg: NewMessage) {
        if self.inbound.send((jid.to_string(), msg)).is_err() {
            debug!(jid, "orchestrator gone, inbound message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(jid: &str, ts: &str, name: Option<&str>) -> ChatMetadata {
        ChatMetadata {
            jid: jid.to_string(),
            timestamp: ts.to_string(),
            name: name.map(str::to_string),
            channel: "tg",
            is_group: true,
        }
    }

    #[test]
    fn metadata_updates_keep_known_name() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let host = Host::new(Arc::new(GroupRegistry::from_map(HashMap::new())), tx);
        host.on_chat_metadata(meta("tg:1", "t1", Some("Team")));
        host.on_chat_metadata(meta("tg:1", "t2", None));

        let chat = host.chats.lock().unwrap().get("tg:1").cloned().unwrap();
        assert_eq!(chat.timestamp, "t2");
        assert_eq!(chat.name.as_deref(), Some("Team"));
    }

    #[test]
    fn messages_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = Host::new(Arc::new(GroupRegistry::from_map(HashMap::new())), tx);
        let msg = NewMessage {
            id: "1".to_string(),
            chat_jid: "tg:1".to_string(),
            sender: "u".to_string(),
            sender_name: "U".to_string(),
            content: "hi".to_string(),
            timestamp: "t".to_string(),
            is_from_me: false,
            is_bot_message: false,
        };
        host.on_message("tg:1", msg.clone());
        assert_eq!(rx.try_recv().unwrap(), ("tg:1".to_string(), msg));
    }
}
