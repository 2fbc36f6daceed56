//! Telegram update handlers.
//!
//! Each message becomes at most one canonical message for the host: text or
//! caption, plus a file tag for a voice note, audio track or document.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::debug;

use relay_core::{
    domain::Jid,
    messaging::{
        tags::append_tags,
        types::{ChatMetadata, NewMessage},
    },
    ports::is_registered,
    utils::to_iso,
};

use crate::{router::Inbound, SCHEME};

mod media;

pub async fn handle_message(bot: Bot, msg: Message, inbound: Arc<Inbound>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let chat = msg.chat.id.0.to_string();
    let channel_jid = Jid::conversation(SCHEME, &chat).to_string();
    let jid = match topic_of(&msg) {
        Some(topic) => Jid::thread(SCHEME, &chat, &topic.to_string()).to_string(),
        None => channel_jid.clone(),
    };

    let raw_text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    let text = rewrite_mention(raw_text, &inbound.bot_username, &inbound.assistant_name);

    let groups = inbound.host.registered_groups();
    let mut tags = Vec::new();
    if let (Some(group), Some(attachment)) = (groups.get(&channel_jid), media::attachment_of(&msg)) {
        if let Some(tag) = media::attach(&bot, &inbound, &attachment, group).await {
            tags.push(tag);
        }
    }
    let content = append_tags(&text, &tags);
    if content.is_empty() {
        return Ok(());
    }

    let timestamp = to_iso(msg.date);
    let name = msg.chat.title().map(str::to_string);
    let is_group = !msg.chat.is_private();
    inbound.host.on_chat_metadata(ChatMetadata {
        jid: channel_jid.clone(),
        timestamp: timestamp.clone(),
        name: name.clone(),
        channel: SCHEME,
        is_group,
    });
    if jid != channel_jid {
        inbound.host.on_chat_metadata(ChatMetadata {
            jid: jid.clone(),
            timestamp: timestamp.clone(),
            name,
            channel: SCHEME,
            is_group,
        });
    }

    if !is_registered(&groups, &channel_jid, &jid) {
        debug!(jid = %jid, "message for unregistered chat dropped");
        return Ok(());
    }

    inbound.host.on_message(
        &jid,
        NewMessage {
            id: msg.id.0.to_string(),
            chat_jid: jid.clone(),
            sender: user.id.0.to_string(),
            sender_name: user.full_name(),
            content,
            timestamp,
            is_from_me: false,
            is_bot_message: false,
        },
    );
    Ok(())
}

/// Forum topic id, only for messages that really belong to a topic.
fn topic_of(msg: &Message) -> Option<i32> {
    if matches!(&msg.kind, teloxide::types::MessageKind::Common(c) if c.is_topic_message) {
        msg.thread_id
    } else {
        None
    }
}

/// Replace `@botusername` (case-insensitive) with `@AssistantName`.
pub(crate) fn rewrite_mention(text: &str, bot_username: &str, assistant_name: &str) -> String {
    if bot_username.is_empty() {
        return text.to_string();
    }
    let needle = format!("@{}", bot_username.to_lowercase());
    let lower = text.to_lowercase();
    // Lowercasing can change byte lengths outside ASCII; only rewrite when
    // offsets line up.
    if lower.len() != text.len() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = 0usize;
    for (idx, _) in lower.match_indices(&needle) {
        let end = idx + needle.len();
        let continues = lower[end..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        if continues || idx < rest {
            continue;
        }
        out.push_str(&text[rest..idx]);
        out.push('@');
        out.push_str(assistant_name);
        rest = end;
    }
    out.push_str(&text[rest..]);
    out
}
