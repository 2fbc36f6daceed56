use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_core::{
    config::Config,
    domain::{has_scheme, Jid},
    errors::Error,
    formatting::markdown_to_mrkdwn,
    messaging::{
        outbox::QueuedMessage,
        port::Channel,
        tags::{append_tags, file_tag, is_audio_file, reaction_tag},
        types::{ChannelCapabilities, ChatMetadata, NewMessage, RegisteredGroup},
    },
    ports::{is_registered, ChannelHost, Transcriber},
    storage::GroupStorage,
    utils::epoch_seconds_to_iso,
    Result,
};

use crate::{
    api::{ReactionOutcome, SlackTransport},
    events::{MessageEvent, ReactionEvent, SlackEvent, SlackFile},
    state::{ConnectionState, Listener, SlackState},
    SCHEME,
};

const ACK_REACTION: &str = "eyes";
const DONE_REACTION: &str = "white_check_mark";
const MAX_MESSAGE_LEN: usize = 40_000;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub assistant_name: String,
    pub download_timeout: Duration,
    /// Deadline on one `chat.postMessage`; expiry counts as a failed send.
    pub send_timeout: Duration,
    pub outbox_capacity: usize,
    /// How often a non-empty outbox is retried while connected.
    pub outbox_retry_interval: Duration,
    pub thread_map_capacity: usize,
}

impl SlackConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            assistant_name: cfg.assistant_name.clone(),
            download_timeout: cfg.download_timeout,
            send_timeout: cfg.request_timeout,
            outbox_capacity: cfg.outbox_capacity,
            outbox_retry_interval: cfg.outbox_retry_interval,
            thread_map_capacity: cfg.thread_map_capacity,
        }
    }
}

/// Slack channel adapter (Socket Mode in, Web API out).
#[derive(Clone)]
pub struct SlackChannel {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: SlackConfig,
    transport: Arc<dyn SlackTransport>,
    host: Arc<dyn ChannelHost>,
    transcriber: Arc<dyn Transcriber>,
    storage: GroupStorage,
    state: Mutex<SlackState>,
    /// Serializes outbound posts so the outbox order is the delivery order.
    send_lock: AsyncMutex<()>,
}

impl SlackChannel {
    pub fn new(
        cfg: SlackConfig,
        transport: Arc<dyn SlackTransport>,
        host: Arc<dyn ChannelHost>,
        transcriber: Arc<dyn Transcriber>,
        storage: GroupStorage,
    ) -> Self {
        let state = SlackState::new(cfg.outbox_capacity, cfg.thread_map_capacity);
        Self {
            inner: Arc::new(Inner {
                cfg,
                transport,
                host,
                transcriber,
                storage,
                state: Mutex::new(state),
                send_lock: AsyncMutex::new(()),
            }),
        }
    }

    /// Process one raw `event` payload. The listener task feeds these in
    /// arrival order.
    pub async fn handle_event(&self, raw: Value) {
        self.inner.handle_event(raw).await;
    }

    pub fn queued_messages(&self) -> usize {
        self.inner.state().outbox.len()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SlackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self) -> bool {
        self.state().connection == ConnectionState::Connected
    }

    async fn handle_event(&self, raw: Value) {
        match SlackEvent::parse(&raw) {
            Ok(SlackEvent::Message(ev)) => self.handle_message(ev).await,
            Ok(SlackEvent::Reaction(ev)) => self.handle_reaction(ev),
            Ok(SlackEvent::Other) => {}
            Err(e) => debug!(error = %e, "ignoring unrecognised slack event shape"),
        }
    }

    async fn handle_message(&self, ev: MessageEvent) {
        let bot_user_id = self.state().bot_user_id.clone();
        if ev.is_from_bot() || ev.user.as_deref() == Some(bot_user_id.as_str()) {
            return;
        }
        if !ev.is_accepted_subtype() {
            return;
        }

        let channel_jid = Jid::conversation(SCHEME, &ev.channel).to_string();
        let mut jid = match &ev.thread_ts {
            Some(thread_ts) => {
                self.state().threads.insert(&ev.ts, thread_ts);
                Jid::thread(SCHEME, &ev.channel, thread_ts).to_string()
            }
            None => channel_jid.clone(),
        };

        let mention = format!("<@{bot_user_id}>");
        let has_mention = !bot_user_id.is_empty() && ev.text.contains(&mention);
        let text = if has_mention {
            ev.text
                .replace(&mention, &format!("@{}", self.cfg.assistant_name))
        } else {
            ev.text.clone()
        };

        let groups = self.host.registered_groups();
        let mut tags = Vec::new();
        if let Some(group) = groups.get(&channel_jid) {
            for file in &ev.files {
                if let Some(tag) = self.attach_file(file, group).await {
                    tags.push(tag);
                }
            }
        }
        let content = append_tags(&text, &tags);
        if content.is_empty() {
            return;
        }

        let timestamp = epoch_seconds_to_iso(&ev.ts);
        self.report_activity(&channel_jid, &jid, &timestamp);

        if !is_registered(&groups, &channel_jid, &jid) {
            debug!(jid = %jid, "message for unregistered conversation dropped");
            return;
        }

        if has_mention && ev.thread_ts.is_none() {
            self.spawn_reaction(&ev.channel, &ev.ts, ACK_REACTION);
            jid = Jid::thread(SCHEME, &ev.channel, &ev.ts).to_string();
            {
                let mut st = self.state();
                st.anchors.insert(&ev.ts);
                st.threads.insert(&ev.ts, &ev.ts);
            }
            self.host.on_chat_metadata(metadata(&jid, &timestamp));
        }

        let sender = ev.user.unwrap_or_default();
        let msg = NewMessage {
            id: ev.ts,
            chat_jid: jid.clone(),
            sender: sender.clone(),
            sender_name: sender,
            content,
            timestamp,
            is_from_me: false,
            is_bot_message: false,
        };
        self.host.on_message(&jid, msg);
    }

    fn handle_reaction(&self, ev: ReactionEvent) {
        let thread_ts = {
            let st = self.state();
            if ev.user == st.bot_user_id {
                return;
            }
            st.threads.get(&ev.item.ts).map(str::to_string)
        };

        let channel_jid = Jid::conversation(SCHEME, &ev.item.channel).to_string();
        let jid = match &thread_ts {
            Some(t) => Jid::thread(SCHEME, &ev.item.channel, t).to_string(),
            None => channel_jid.clone(),
        };

        let timestamp = epoch_seconds_to_iso(&ev.event_ts);
        self.report_activity(&channel_jid, &jid, &timestamp);

        let groups = self.host.registered_groups();
        if !is_registered(&groups, &channel_jid, &jid) {
            return;
        }

        let msg = NewMessage {
            id: format!("reaction-{}", ev.event_ts),
            chat_jid: jid.clone(),
            sender: ev.user.clone(),
            sender_name: ev.user,
            content: reaction_tag(&ev.reaction, &ev.item.ts),
            timestamp,
            is_from_me: false,
            is_bot_message: false,
        };
        self.host.on_message(&jid, msg);
    }

    fn report_activity(&self, channel_jid: &str, jid: &str, timestamp: &str) {
        self.host.on_chat_metadata(metadata(channel_jid, timestamp));
        if jid != channel_jid {
            self.host.on_chat_metadata(metadata(jid, timestamp));
        }
    }

    /// Download, persist and (for audio) transcribe one shared file.
    async fn attach_file(&self, file: &SlackFile, group: &RegisteredGroup) -> Option<String> {
        let url = file.url_private_download.as_deref()?;

        let bytes = match tokio::time::timeout(
            self.cfg.download_timeout,
            self.transport.download(url),
        )
        .await
        {
            Ok(Ok(b)) => b,
            Ok(Err(e)) => {
                warn!(error = %e, url, "slack file download failed");
                return None;
            }
            Err(_) => {
                warn!(
                    url,
                    timeout_ms = self.cfg.download_timeout.as_millis() as u64,
                    "slack file download timed out"
                );
                return None;
            }
        };

        let file_id = file
            .id
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string());
        let display_name = file.name.as_deref().unwrap_or("unknown");
        let stored_name = file.name.as_deref().unwrap_or("file");

        let saved = match self
            .storage
            .save_attachment(&group.folder, &file_id, stored_name, &bytes)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, file_id = %file_id, "failed to store slack file");
                return None;
            }
        };
        info!(file_id = %file_id, path = %saved.host_path.display(), "slack file downloaded");

        if !is_audio_file(display_name) {
            return Some(file_tag(display_name, &saved.logical_path, None));
        }
        let transcript = self.transcriber.transcribe(&saved.host_path).await;
        if transcript.trim().is_empty() {
            warn!(file_id = %file_id, "no transcript for audio file");
        }
        Some(file_tag(
            display_name,
            &saved.logical_path,
            Some(transcript.as_str()),
        ))
    }

    fn spawn_reaction(&self, channel: &str, ts: &str, name: &'static str) {
        let transport = self.transport.clone();
        let channel = channel.to_string();
        let ts = ts.to_string();
        tokio::spawn(async move {
            match transport.add_reaction(&channel, &ts, name).await {
                Ok(ReactionOutcome::Added) => {}
                Ok(ReactionOutcome::AlreadyPresent) => {
                    debug!(channel = %channel, ts = %ts, name, "reaction already present")
                }
                Err(e) => warn!(error = %e, channel = %channel, ts = %ts, name, "failed to add reaction"),
            }
        });
    }

    fn enqueue(&self, jid: &str, text: &str) {
        let mut st = self.state();
        if let Some(dropped) = st.outbox.push(jid, text) {
            warn!(jid = %dropped.jid, "slack outbox full, dropped oldest message");
        }
        info!(jid, queue_size = st.outbox.len(), "slack message queued");
    }

    /// Render and post one message. Thread bookkeeping happens only on success.
    async fn deliver(&self, jid: &str, text: &str) -> Result<()> {
        let Some(target) = Jid::parse_with_scheme(jid, SCHEME) else {
            warn!(jid, "not a slack address, message dropped");
            return Ok(());
        };

        let formatted = markdown_to_mrkdwn(text);
        let posted_ts = tokio::time::timeout(
            self.cfg.send_timeout,
            self.transport
                .post_message(&target.conversation, target.thread.as_deref(), &formatted),
        )
        .await
        .map_err(|_| {
            Error::External(format!(
                "slack chat.postMessage timed out after {} ms",
                self.cfg.send_timeout.as_millis()
            ))
        })??;

        if let Some(thread_ts) = &target.thread {
            let first_reply = {
                let mut st = self.state();
                if let Some(ts) = &posted_ts {
                    st.threads.insert(ts, thread_ts);
                }
                st.anchors.remove(thread_ts)
            };
            if first_reply {
                self.spawn_reaction(&target.conversation, thread_ts, DONE_REACTION);
            }
        }

        info!(jid, length = text.len(), "slack message sent");
        Ok(())
    }

    async fn flush_outbox(&self) {
        let _sending = self.send_lock.lock().await;
        self.drain_outbox().await;
    }

    /// Drain the outbox in order. Stops at the first failure, leaving that
    /// message at the head. Caller holds `send_lock`.
    async fn drain_outbox(&self) {
        loop {
            if !self.is_connected() {
                return;
            }
            let Some(item) = self.state().outbox.pop_front() else {
                return;
            };
            if let Err(e) = self.deliver(&item.jid, &item.text).await {
                warn!(error = %e, jid = %item.jid, "failed to flush queued slack message");
                self.requeue(item);
                return;
            }
        }
    }

    fn requeue(&self, item: QueuedMessage) {
        self.state().outbox.requeue_front(item);
    }

    /// Retry a non-empty outbox on every tick until `cancel` fires. Covers
    /// sends that failed while connected and socket reconnects.
    async fn retry_outbox(&self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.cfg.outbox_retry_interval);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => {
                    let queued = self.state().outbox.len();
                    if queued > 0 {
                        debug!(queue_size = queued, "retrying slack outbox");
                        self.flush_outbox().await;
                    }
                }
            }
        }
    }
}

fn metadata(jid: &str, timestamp: &str) -> ChatMetadata {
    ChatMetadata {
        jid: jid.to_string(),
        timestamp: timestamp.to_string(),
        name: None,
        channel: SCHEME,
        is_group: true,
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        SCHEME
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            reactions: true,
            threads: true,
            files: true,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    async fn connect(&self) -> Result<()> {
        {
            let mut st = self.inner.state();
            if st.connection != ConnectionState::Disconnected {
                return Ok(());
            }
            st.connection = ConnectionState::Connecting;
        }

        let bot_user_id = match self.inner.transport.auth_test().await {
            Ok(id) => id,
            Err(e) => {
                self.inner.state().connection = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        info!(bot_user_id = %bot_user_id, "slack bot user resolved");

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

        let transport = self.inner.transport.clone();
        let listen_cancel = cancel.clone();
        let listener = tokio::spawn(async move {
            if let Err(e) = transport.listen(tx, listen_cancel).await {
                error!(error = %e, "slack listener stopped");
            }
        });

        let inner = self.inner.clone();
        let consumer = tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                inner.handle_event(raw).await;
            }
        });

        let inner = self.inner.clone();
        let retry_cancel = cancel.clone();
        let retry = tokio::spawn(async move { inner.retry_outbox(retry_cancel).await });

        {
            let mut st = self.inner.state();
            st.bot_user_id = bot_user_id;
            st.listener = Some(Listener {
                cancel,
                tasks: vec![listener, consumer, retry],
            });
            st.connection = ConnectionState::Connected;
        }
        info!("slack connected via socket mode");

        self.inner.flush_outbox().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let listener = {
            let mut st = self.inner.state();
            st.connection = ConnectionState::Disconnected;
            st.listener.take()
        };
        if let Some(listener) = listener {
            listener.cancel.cancel();
            for mut task in listener.tasks {
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                    task.abort();
                }
            }
        }
        info!("slack disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn owns_jid(&self, jid: &str) -> bool {
        has_scheme(jid, SCHEME)
    }

    async fn send_message(&self, jid: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let _sending = self.inner.send_lock.lock().await;
        if !self.inner.is_connected() {
            self.inner.enqueue(jid, text);
            return Ok(());
        }
        // never overtake older queued messages
        if !self.inner.state().outbox.is_empty() {
            self.inner.enqueue(jid, text);
            self.inner.drain_outbox().await;
            return Ok(());
        }
        if let Err(e) = self.inner.deliver(jid, text).await {
            warn!(error = %e, jid, "failed to send slack message");
            self.inner.enqueue(jid, text);
        }
        Ok(())
    }

    async fn send_file(&self, jid: &str, path: &str, title: Option<&str>) -> Result<()> {
        let Some(target) = Jid::parse_with_scheme(jid, SCHEME) else {
            return Ok(());
        };
        let channel_jid = target.group().to_string();
        let Some(group) = self.inner.host.registered_groups().remove(&channel_jid) else {
            warn!(jid, path, "file upload for unregistered conversation skipped");
            return Ok(());
        };

        let host_path = match self.inner.storage.resolve_attachment(&group.folder, path) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, jid, path, "cannot resolve file for upload");
                return Ok(());
            }
        };

        match self
            .inner
            .transport
            .upload_file(
                &target.conversation,
                target.thread.as_deref(),
                &host_path,
                title,
            )
            .await
        {
            Ok(()) => info!(jid, path, "slack file uploaded"),
            Err(e) => error!(error = %e, jid, path, "failed to upload slack file"),
        }
        Ok(())
    }
}
