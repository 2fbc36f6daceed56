//! Stateless routing between the agent and the channels.
//!
//! Everything here is a pure function of its inputs plus a look at which
//! channels are currently connected.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::{
    domain::Jid, errors::Error, formatting::escape_xml, messaging::port::Channel,
    messaging::types::NewMessage, Result,
};

static INTERNAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<internal>.*?</internal>").expect("valid regex"));

/// Render messages as the transcript document handed to the agent.
///
/// Messages from channels that support reactions carry a `ts` attribute so the
/// agent can target a reaction at that specific message.
pub fn format_messages(messages: &[NewMessage], channels: &[Arc<dyn Channel>]) -> String {
    let lines = messages
        .iter()
        .map(|m| {
            let reactable = find_channel(channels, &m.chat_jid)
                .is_some_and(|c| c.capabilities().reactions);
            let id_attr = if reactable {
                format!(r#" ts="{}""#, escape_xml(&m.id))
            } else {
                String::new()
            };
            format!(
                r#"<message sender="{}" time="{}"{id_attr}>{}</message>"#,
                escape_xml(&m.sender_name),
                m.timestamp,
                escape_xml(&m.content)
            )
        })
        .collect::<Vec<_>>();
    format!("<messages>\n{}\n</messages>", lines.join("\n"))
}

/// Remove every `<internal>...</internal>` span and trim.
pub fn strip_internal_tags(text: &str) -> String {
    INTERNAL_RE.replace_all(text, "").trim().to_string()
}

/// Prepare agent output for sending. An empty result means "send nothing".
pub fn format_outbound(raw: &str) -> String {
    strip_internal_tags(raw)
}

/// Send `text` through the connected channel that owns `jid`.
///
/// Fails synchronously with [`Error::NoChannel`] when no connected channel owns
/// the address; nothing is queued in that case.
pub async fn route_outbound(channels: &[Arc<dyn Channel>], jid: &str, text: &str) -> Result<()> {
    let channel = channels
        .iter()
        .find(|c| c.owns_jid(jid) && c.is_connected())
        .ok_or_else(|| Error::NoChannel {
            jid: jid.to_string(),
        })?;
    channel.send_message(jid, text).await
}

/// The channel owning `jid`, connected or not.
pub fn find_channel<'a>(channels: &'a [Arc<dyn Channel>], jid: &str) -> Option<&'a Arc<dyn Channel>> {
    channels.iter().find(|c| c.owns_jid(jid))
}

/// Resolve a thread JID to its top-level conversation.
///
/// `slack:C123:1700000000.0001` -> `slack:C123`. Everything else passes through.
pub fn resolve_group_jid(jid: &str) -> String {
    match Jid::parse(jid) {
        Some(parsed) if parsed.is_thread() && jid.split(':').count() == 3 => {
            parsed.group().to_string()
        }
        _ => jid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::messaging::types::ChannelCapabilities;

    struct FakeChannel {
        scheme: &'static str,
        connected: AtomicBool,
        reactions: bool,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FakeChannel {
        fn new(scheme: &'static str, connected: bool, reactions: bool) -> Arc<Self> {
            Arc::new(Self {
                scheme,
                connected: AtomicBool::new(connected),
                reactions,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            self.scheme
        }

        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities {
                reactions: self.reactions,
                ..ChannelCapabilities::default()
            }
        }

        async fn connect(&self) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn owns_jid(&self, jid: &str) -> bool {
            crate::domain::has_scheme(jid, self.scheme)
        }

        async fn send_message(&self, jid: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((jid.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_file(&self, _jid: &str, _path: &str, _title: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    fn msg(jid: &str, id: &str, sender: &str, content: &str) -> NewMessage {
        NewMessage {
            id: id.to_string(),
            chat_jid: jid.to_string(),
            sender: sender.to_string(),
            sender_name: sender.to_string(),
            content: content.to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            is_from_me: false,
            is_bot_message: false,
        }
    }

    #[test]
    fn strips_internal_spans() {
        assert_eq!(
            strip_internal_tags("visible <internal>secret</internal> text"),
            "visible  text"
        );
        assert_eq!(strip_internal_tags("<internal>only</internal>"), "");
        assert_eq!(
            strip_internal_tags("a<internal>\nmulti\nline\n</internal>b<internal>x</internal>"),
            "ab"
        );
        assert_eq!(format_outbound("  <internal>x</internal>  "), "");
    }

    #[test]
    fn resolve_group_jid_is_idempotent() {
        for jid in ["slack:C1:1700.1", "slack:C1", "tg:-100:7", "plain", "a:b:c:d"] {
            let once = resolve_group_jid(jid);
            assert_eq!(resolve_group_jid(&once), once);
        }
        assert_eq!(resolve_group_jid("slack:C1:1700.1"), "slack:C1");
        assert_eq!(resolve_group_jid("a:b:c:d"), "a:b:c:d");
    }

    #[test]
    fn transcript_adds_ts_only_for_reaction_capable_channels() {
        let slack: Arc<dyn Channel> = FakeChannel::new("slack", true, true);
        let tg: Arc<dyn Channel> = FakeChannel::new("tg", true, false);
        let channels = vec![slack, tg];

        let out = format_messages(
            &[
                msg("slack:C1", "1.2", "U<1>", "a & b"),
                msg("tg:42", "9", "bob", "hi"),
            ],
            &channels,
        );

        assert_eq!(
            out,
            "<messages>\n\
             <message sender=\"U&lt;1&gt;\" time=\"2024-01-01T00:00:00.000Z\" ts=\"1.2\">a &amp; b</message>\n\
             <message sender=\"bob\" time=\"2024-01-01T00:00:00.000Z\">hi</message>\n\
             </messages>"
        );
    }

    #[tokio::test]
    async fn routes_to_connected_owner() {
        let slack = FakeChannel::new("slack", true, true);
        let channels: Vec<Arc<dyn Channel>> = vec![slack.clone() as Arc<dyn Channel>];

        route_outbound(&channels, "slack:C1:1.0", "hello").await.unwrap();
        assert_eq!(
            slack.sent.lock().unwrap().as_slice(),
            &[("slack:C1:1.0".to_string(), "hello".to_string())]
        );
    }

    #[tokio::test]
    async fn no_channel_when_owner_disconnected_or_missing() {
        let slack = FakeChannel::new("slack", false, true);
        let tg = FakeChannel::new("tg", true, false);
        let channels: Vec<Arc<dyn Channel>> =
            vec![slack.clone() as Arc<dyn Channel>, tg.clone() as Arc<dyn Channel>];

        let err = route_outbound(&channels, "slack:C1", "hi").await.unwrap_err();
        assert!(matches!(err, Error::NoChannel { ref jid } if jid == "slack:C1"));

        let err = route_outbound(&channels, "discord:1", "hi").await.unwrap_err();
        assert!(matches!(err, Error::NoChannel { .. }));

        assert!(slack.sent.lock().unwrap().is_empty());
        assert!(tg.sent.lock().unwrap().is_empty());
        assert!(find_channel(&channels, "slack:C1").is_some());
    }
}
