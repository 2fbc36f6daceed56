//! Inbound Slack event payloads (the `event` object of an Events API envelope).
//!
//! Parsed once into a closed set of variants. Shapes we do not recognise fail
//! to parse and are dropped by the caller.

use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum SlackEvent {
    #[serde(rename = "message")]
    Message(MessageEvent),
    #[serde(rename = "reaction_added")]
    Reaction(ReactionEvent),
    #[serde(other)]
    Other,
}

impl SlackEvent {
    pub fn parse(raw: &Value) -> serde_json::Result<Self> {
        SlackEvent::deserialize(raw)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    pub channel: String,
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub bot_profile: Option<Value>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub files: Vec<SlackFile>,
}

impl MessageEvent {
    /// Posted by a bot or an app (including ourselves).
    pub fn is_from_bot(&self) -> bool {
        self.bot_id.is_some() || self.bot_profile.is_some() || self.app_id.is_some()
    }

    /// Plain messages and file shares are accepted; edits, joins, deletions
    /// and every other subtype are not.
    pub fn is_accepted_subtype(&self) -> bool {
        match self.subtype.as_deref() {
            None => true,
            Some(s) => s == "file_share",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SlackFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url_private_download: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ReactionEvent {
    pub user: String,
    pub reaction: String,
    pub item: ReactionItem,
    pub event_ts: String,
}

/// Only message reactions are routed; file reactions carry no channel/ts and
/// fail to parse.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ReactionItem {
    pub channel: String,
    pub ts: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_message_with_files() {
        let raw = json!({
            "type": "message",
            "channel": "C1",
            "user": "U1",
            "text": "hello",
            "ts": "1700000000.000100",
            "subtype": "file_share",
            "files": [{ "id": "F1", "name": "a.png", "url_private_download": "https://files/a" }]
        });
        let SlackEvent::Message(m) = SlackEvent::parse(&raw).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(m.channel, "C1");
        assert!(m.is_accepted_subtype());
        assert!(!m.is_from_bot());
        assert_eq!(m.files[0].id.as_deref(), Some("F1"));
    }

    #[test]
    fn bot_markers_and_subtypes() {
        let raw = json!({ "type": "message", "channel": "C1", "ts": "1.0", "bot_id": "B1" });
        let SlackEvent::Message(m) = SlackEvent::parse(&raw).unwrap() else {
            panic!("expected message");
        };
        assert!(m.is_from_bot());

        let raw = json!({ "type": "message", "channel": "C1", "ts": "1.0", "subtype": "message_changed" });
        let SlackEvent::Message(m) = SlackEvent::parse(&raw).unwrap() else {
            panic!("expected message");
        };
        assert!(!m.is_accepted_subtype());
    }

    #[test]
    fn parses_reaction() {
        let raw = json!({
            "type": "reaction_added",
            "user": "U2",
            "reaction": "thumbsup",
            "item": { "type": "message", "channel": "C1", "ts": "1700000000.000100" },
            "event_ts": "1700000001.000200"
        });
        assert_eq!(
            SlackEvent::parse(&raw).unwrap(),
            SlackEvent::Reaction(ReactionEvent {
                user: "U2".to_string(),
                reaction: "thumbsup".to_string(),
                item: ReactionItem {
                    channel: "C1".to_string(),
                    ts: "1700000000.000100".to_string(),
                },
                event_ts: "1700000001.000200".to_string(),
            })
        );
    }

    #[test]
    fn unknown_types_and_bad_shapes() {
        assert_eq!(
            SlackEvent::parse(&json!({ "type": "app_mention", "channel": "C1" })).unwrap(),
            SlackEvent::Other
        );
        // message without channel
        assert!(SlackEvent::parse(&json!({ "type": "message", "ts": "1.0" })).is_err());
        // reaction on a file
        assert!(SlackEvent::parse(&json!({
            "type": "reaction_added",
            "user": "U2",
            "reaction": "x",
            "item": { "type": "file", "file": "F1" },
            "event_ts": "1.0"
        }))
        .is_err());
    }
}
