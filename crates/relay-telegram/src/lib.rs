//! Telegram adapter (teloxide).
//!
//! Addresses are `tg:<chat_id>`, or `tg:<chat_id>:<topic_id>` inside forum
//! topics.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{InputFile, ParseMode},
};
use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

pub mod handlers;
pub mod router;

use relay_core::{
    config::Config,
    domain::{has_scheme, Jid},
    errors::Error,
    formatting::convert_markdown_to_html,
    messaging::{
        outbox::{Outbox, QueuedMessage},
        port::Channel,
        types::ChannelCapabilities,
    },
    ports::{ChannelHost, Transcriber},
    storage::GroupStorage,
    Result,
};

use crate::router::{spawn_polling, Inbound, Polling};

/// Address scheme owned by this adapter.
pub const SCHEME: &str = "tg";

const MAX_MESSAGE_LEN: usize = 4096;
/// Markdown chunk size; leaves room for the HTML the renderer adds.
const CHUNK_LEN: usize = 3500;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub assistant_name: String,
    pub download_timeout: Duration,
    pub outbox_capacity: usize,
    /// How often a non-empty outbox is retried while connected.
    pub outbox_retry_interval: Duration,
}

impl TelegramConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            assistant_name: cfg.assistant_name.clone(),
            download_timeout: cfg.download_timeout,
            outbox_capacity: cfg.outbox_capacity,
            outbox_retry_interval: cfg.outbox_retry_interval,
        }
    }
}

struct TelegramState {
    connected: bool,
    outbox: Outbox,
    polling: Option<Polling>,
    retry: Option<JoinHandle<()>>,
}

pub struct TelegramChannel {
    inner: Arc<Inner>,
}

struct Inner {
    bot: Bot,
    cfg: TelegramConfig,
    host: Arc<dyn ChannelHost>,
    transcriber: Arc<dyn Transcriber>,
    storage: GroupStorage,
    state: Mutex<TelegramState>,
    /// Serializes outbound sends so the outbox order is the delivery order.
    send_lock: AsyncMutex<()>,
}

pub(crate) fn map_err(e: teloxide::RequestError) -> Error {
    Error::External(format!("telegram error: {e}"))
}

/// Chat id and optional topic id of a `tg:` address.
fn target_of(jid: &str) -> Option<(ChatId, Option<i32>)> {
    let parsed = Jid::parse_with_scheme(jid, SCHEME)?;
    let chat = parsed.conversation.parse::<i64>().ok()?;
    let topic = match parsed.thread {
        Some(t) => Some(t.parse::<i32>().ok()?),
        None => None,
    };
    Some((ChatId(chat), topic))
}

/// Split on line boundaries into chunks of at most `max` bytes. A single
/// oversized line is split on char boundaries.
fn split_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if current.len() + line.len() > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if line.len() <= max {
            current.push_str(line);
            continue;
        }
        for ch in line.chars() {
            if current.len() + ch.len_utf8() > max {
                chunks.push(std::mem::take(&mut current));
            }
            current.push(ch);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

impl TelegramChannel {
    pub fn new(
        bot: Bot,
        cfg: TelegramConfig,
        host: Arc<dyn ChannelHost>,
        transcriber: Arc<dyn Transcriber>,
        storage: GroupStorage,
    ) -> Self {
        let outbox = Outbox::new(cfg.outbox_capacity);
        Self {
            inner: Arc::new(Inner {
                bot,
                cfg,
                host,
                transcriber,
                storage,
                state: Mutex::new(TelegramState {
                    connected: false,
                    outbox,
                    polling: None,
                    retry: None,
                }),
                send_lock: AsyncMutex::new(()),
            }),
        }
    }

    pub fn queued_messages(&self) -> usize {
        self.inner.state().outbox.len()
    }
}

impl Inner {
    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn state(&self) -> MutexGuard<'_, TelegramState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(map_err(other)),
            }
        }
    }

    fn enqueue(&self, jid: &str, text: &str) {
        let mut st = self.state();
        if let Some(dropped) = st.outbox.push(jid, text) {
            warn!(jid = %dropped.jid, "telegram outbox full, dropped oldest message");
        }
        info!(jid, queue_size = st.outbox.len(), "telegram message queued");
    }

    async fn deliver(&self, jid: &str, text: &str) -> Result<()> {
        let Some((chat, topic)) = target_of(jid) else {
            warn!(jid, "not a telegram address, message dropped");
            return Ok(());
        };

        for chunk in split_text(text, CHUNK_LEN) {
            let html = convert_markdown_to_html(&chunk);
            self.with_retry(|| {
                let mut req = self.bot.send_message(chat, html.clone()).parse_mode(ParseMode::Html);
                if let Some(t) = topic {
                    req = req.message_thread_id(t);
                }
                req
            })
            .await?;
        }
        info!(jid, length = text.len(), "telegram message sent");
        Ok(())
    }

    async fn flush_outbox(&self) {
        let _sending = self.send_lock.lock().await;
        self.drain_outbox().await;
    }

    /// Drain in order, stopping at the first failure. Caller holds `send_lock`.
    async fn drain_outbox(&self) {
        loop {
            if !self.is_connected() {
                return;
            }
            let Some(item) = self.state().outbox.pop_front() else {
                return;
            };
            if let Err(e) = self.deliver(&item.jid, &item.text).await {
                warn!(error = %e, jid = %item.jid, "failed to flush queued telegram message");
                self.requeue(item);
                return;
            }
        }
    }

    fn requeue(&self, item: QueuedMessage) {
        self.state().outbox.requeue_front(item);
    }

    async fn retry_outbox(&self) {
        let mut tick = tokio::time::interval(self.cfg.outbox_retry_interval);
        tick.tick().await;
        loop {
            tick.tick().await;
            let queued = self.state().outbox.len();
            if queued > 0 {
                debug!(queue_size = queued, "retrying telegram outbox");
                self.flush_outbox().await;
            }
        }
    }

    async fn send_message(&self, jid: &str, text: &str) {
        let _sending = self.send_lock.lock().await;
        if !self.is_connected() {
            self.enqueue(jid, text);
            return;
        }
        // never overtake older queued messages
        if !self.state().outbox.is_empty() {
            self.enqueue(jid, text);
            self.drain_outbox().await;
            return;
        }
        if let Err(e) = self.deliver(jid, text).await {
            warn!(error = %e, jid, "failed to send telegram message");
            self.enqueue(jid, text);
        }
    }

    async fn send_file(&self, jid: &str, path: &str, title: Option<&str>) {
        let Some((chat, topic)) = target_of(jid) else {
            return;
        };
        let Some(group_jid) = Jid::parse(jid).map(|j| j.group().to_string()) else {
            return;
        };
        let Some(group) = self.host.registered_groups().remove(&group_jid) else {
            warn!(jid, path, "file upload for unregistered chat skipped");
            return;
        };
        let host_path = match self.storage.resolve_attachment(&group.folder, path) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, jid, path, "cannot resolve file for upload");
                return;
            }
        };

        let result = self
            .with_retry(|| {
                let mut req = self.bot.send_document(chat, InputFile::file(host_path.clone()));
                if let Some(t) = title {
                    req = req.caption(t.to_string());
                }
                if let Some(t) = topic {
                    req = req.message_thread_id(t);
                }
                req
            })
            .await;
        match result {
            Ok(_) => info!(jid, path, "telegram file uploaded"),
            Err(e) => error!(error = %e, jid, path, "failed to upload telegram file"),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        SCHEME
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            reactions: false,
            threads: true,
            files: true,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.state().polling.is_some() {
            return Ok(());
        }

        let me = inner.bot.get_me().await.map_err(map_err)?;
        info!(username = %me.username(), "telegram bot resolved");

        let inbound = Arc::new(Inbound {
            assistant_name: inner.cfg.assistant_name.clone(),
            bot_username: me.username().to_string(),
            download_timeout: inner.cfg.download_timeout,
            host: inner.host.clone(),
            transcriber: inner.transcriber.clone(),
            storage: inner.storage.clone(),
        });
        let polling = spawn_polling(inner.bot.clone(), inbound);
        let retrying = inner.clone();
        let retry = tokio::spawn(async move { retrying.retry_outbox().await });

        {
            let mut st = inner.state();
            st.polling = Some(polling);
            st.retry = Some(retry);
            st.connected = true;
        }
        info!("telegram connected via long polling");

        inner.flush_outbox().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let (polling, retry) = {
            let mut st = self.inner.state();
            st.connected = false;
            (st.polling.take(), st.retry.take())
        };
        if let Some(retry) = retry {
            retry.abort();
        }
        if let Some(mut polling) = polling {
            if let Ok(stopped) = polling.shutdown.shutdown() {
                if tokio::time::timeout(SHUTDOWN_GRACE, stopped).await.is_err() {
                    warn!("telegram dispatcher did not stop in time");
                }
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut polling.task).await.is_err() {
                polling.task.abort();
            }
        }
        info!("telegram disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn owns_jid(&self, jid: &str) -> bool {
        has_scheme(jid, SCHEME)
    }

    async fn send_message(&self, jid: &str, text: &str) -> Result<()> {
        if !text.trim().is_empty() {
            self.inner.send_message(jid, text).await;
        }
        Ok(())
    }

    async fn send_file(&self, jid: &str, path: &str, title: Option<&str>) -> Result<()> {
        self.inner.send_file(jid, path, title).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use relay_core::{
        messaging::types::{ChatMetadata, NewMessage, RegisteredGroup},
        ports::NoopTranscriber,
    };

    use super::*;

    struct NullHost;

    impl ChannelHost for NullHost {
        fn registered_groups(&self) -> HashMap<String, RegisteredGroup> {
            HashMap::new()
        }
        fn on_chat_metadata(&self, _meta: ChatMetadata) {}
        fn on_message(&self, _jid: &str, _msg: NewMessage) {}
    }

    fn channel() -> TelegramChannel {
        TelegramChannel::new(
            Bot::new("123456:TEST"),
            TelegramConfig {
                assistant_name: "Andy".to_string(),
                download_timeout: Duration::from_secs(1),
                outbox_capacity: 10,
                outbox_retry_interval: Duration::from_secs(3600),
            },
            Arc::new(NullHost),
            Arc::new(NoopTranscriber),
            GroupStorage::new(std::env::temp_dir()),
        )
    }

    #[test]
    fn parses_chat_and_topic() {
        assert_eq!(target_of("tg:-100123"), Some((ChatId(-100123), None)));
        assert_eq!(target_of("tg:-100123:42"), Some((ChatId(-100123), Some(42))));
        assert_eq!(target_of("tg:abc"), None);
        assert_eq!(target_of("slack:C1"), None);
    }

    #[test]
    fn splits_on_lines_then_chars() {
        assert_eq!(split_text("a\nb\nc", 4), vec!["a\nb\n".to_string(), "c".to_string()]);
        assert_eq!(split_text("abcdef", 4), vec!["abcd".to_string(), "ef".to_string()]);
        assert!(split_text("", 4).is_empty());
    }

    #[tokio::test]
    async fn queues_while_disconnected() {
        let ch = channel();
        assert!(!ch.is_connected());
        ch.send_message("tg:1", "one").await.unwrap();
        ch.send_message("tg:1:7", "two").await.unwrap();
        ch.send_message("tg:1", "   ").await.unwrap();
        assert_eq!(ch.queued_messages(), 2);
    }

    #[test]
    fn owns_tg_addresses() {
        let ch = channel();
        assert!(ch.owns_jid("tg:1"));
        assert!(!ch.owns_jid("slack:C1"));
        assert!(!ch.capabilities().reactions);
        assert_eq!(ch.name(), SCHEME);
    }

    #[tokio::test]
    async fn disconnected_send_never_overtakes_queue() {
        let ch = channel();
        ch.send_message("tg:1", "one").await.unwrap();
        ch.send_message("tg:1", "two").await.unwrap();
        let queued: Vec<_> = ch
            .inner
            .state()
            .outbox
            .iter()
            .map(|q| q.text.clone())
            .collect();
        assert_eq!(queued, vec!["one", "two"]);
    }
}
