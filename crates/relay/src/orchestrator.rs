//! Agent turns: batch pending messages per address, run the agent, route the
//! reply back.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use relay_core::{
    groups::GroupRegistry,
    messaging::{port::Channel, types::NewMessage},
    model::{
        client::ModelClient,
        types::{RunRequest, SessionRef},
    },
    router::{format_messages, format_outbound, resolve_group_jid, route_outbound},
    Result,
};

/// One async lock per address so turns for the same conversation never overlap.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, jid: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(jid.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct Orchestrator {
    channels: Vec<Arc<dyn Channel>>,
    model: Arc<dyn ModelClient>,
    registry: Arc<GroupRegistry>,
    groups_dir: PathBuf,
    system_prompt: String,
    locks: ChatLocks,
    pending: Mutex<HashMap<String, Vec<NewMessage>>>,
    sessions: Mutex<HashMap<String, SessionRef>>,
}

impl Orchestrator {
    pub fn new(
        channels: Vec<Arc<dyn Channel>>,
        model: Arc<dyn ModelClient>,
        registry: Arc<GroupRegistry>,
        groups_dir: PathBuf,
        assistant_name: &str,
    ) -> Self {
        Self {
            channels,
            model,
            registry,
            groups_dir,
            system_prompt: system_prompt(assistant_name),
            locks: ChatLocks::default(),
            pending: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn channels(&self) -> &[Arc<dyn Channel>] {
        &self.channels
    }

    /// Queue a message and schedule a turn for its address.
    pub async fn submit(self: &Arc<Self>, jid: String, msg: NewMessage) {
        self.pending
            .lock()
            .await
            .entry(jid.clone())
            .or_default()
            .push(msg);

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_turn(&jid).await {
                error!(error = %e, jid = %jid, "agent turn failed");
            }
        });
    }

    /// Run one turn over everything pending for `jid`. Messages that arrive
    /// while a turn is running are picked up by the next one.
    pub async fn run_turn(&self, jid: &str) -> Result<()> {
        let _guard = self.locks.lock_chat(jid).await;

        let batch = self.pending.lock().await.remove(jid).unwrap_or_default();
        if batch.is_empty() {
            return Ok(());
        }

        let group_jid = resolve_group_jid(jid);
        let Some(group) = self.registry.get(&group_jid) else {
            warn!(jid, "conversation no longer registered, dropping batch");
            return Ok(());
        };
        let cwd = self.groups_dir.join(&group.folder);
        tokio::fs::create_dir_all(&cwd).await?;

        let prompt = format_messages(&batch, &self.channels);
        let resume = self.sessions.lock().await.get(jid).cloned();
        info!(jid, messages = batch.len(), resume = resume.is_some(), "running agent");

        let result = self
            .model
            .run(RunRequest {
                prompt,
                cwd,
                append_system_prompt: Some(self.system_prompt.clone()),
                resume,
            })
            .await?;

        if let Some(session) = result.session {
            self.sessions.lock().await.insert(jid.to_string(), session);
        }
        if result.is_error {
            warn!(jid, "agent reported an error result");
        }

        let reply = format_outbound(&result.text);
        if reply.is_empty() {
            info!(jid, "agent produced nothing to send");
            return Ok(());
        }
        route_outbound(&self.channels, jid, &reply).await
    }
}

fn system_prompt(assistant_name: &str) -> String {
    format!(
        "You are {assistant_name}, replying in a group chat. Messages arrive as a \
         <messages> transcript. Anything inside <internal>...</internal> in your reply \
         is never sent. Attachments appear as <file> tags whose path you can read."
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use relay_core::{
        errors::Error,
        messaging::types::{ChannelCapabilities, RegisteredGroup},
        model::types::RunResult,
    };

    use super::*;

    struct RecordingChannel {
        sent: StdMutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "slack"
        }
        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities {
                reactions: true,
                ..Default::default()
            }
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn owns_jid(&self, jid: &str) -> bool {
            jid.starts_with("slack:")
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

    struct ScriptedModel {
        requests: StdMutex<Vec<RunRequest>>,
        reply: String,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn run(&self, req: RunRequest) -> Result<RunResult> {
            self.requests.lock().unwrap().push(req);
            Ok(RunResult {
                session: Some(SessionRef("sess-1".to_string())),
                is_error: false,
                text: self.reply.clone(),
            })
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ModelClient for FailingModel {
        async fn run(&self, _req: RunRequest) -> Result<RunResult> {
            Err(Error::External("claude exited with status 1".to_string()))
        }
    }

    fn msg(id: &str, content: &str) -> NewMessage {
        NewMessage {
            id: id.to_string(),
            chat_jid: "slack:C1:1.0".to_string(),
            sender: "U1".to_string(),
            sender_name: "U1".to_string(),
            content: content.to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            is_from_me: false,
            is_bot_message: false,
        }
    }

    fn scratch() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("relay-orch-{}-{nanos}", std::process::id()))
    }

    fn registry() -> Arc<GroupRegistry> {
        let mut groups = HashMap::new();
        groups.insert(
            "slack:C1".to_string(),
            RegisteredGroup {
                name: "team".to_string(),
                folder: "team".to_string(),
                added_at: None,
            },
        );
        Arc::new(GroupRegistry::from_map(groups))
    }

    #[tokio::test]
    async fn batches_pending_messages_and_routes_reply() {
        let channel = Arc::new(RecordingChannel {
            sent: StdMutex::new(Vec::new()),
        });
        let model = Arc::new(ScriptedModel {
            requests: StdMutex::new(Vec::new()),
            reply: "<internal>thinking</internal>On it.".to_string(),
        });
        let dir = scratch();
        let orch = Orchestrator::new(
            vec![channel.clone() as Arc<dyn Channel>],
            model.clone(),
            registry(),
            dir.clone(),
            "Andy",
        );

        orch.pending
            .lock()
            .await
            .insert("slack:C1:1.0".to_string(), vec![msg("1.0", "a"), msg("1.1", "b & c")]);
        orch.run_turn("slack:C1:1.0").await.unwrap();

        let requests = model.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].cwd, dir.join("team"));
        assert!(requests[0].resume.is_none());
        assert!(requests[0].prompt.contains(r#"ts="1.1">b &amp; c</message>"#));

        assert_eq!(
            *channel.sent.lock().unwrap(),
            vec![("slack:C1:1.0".to_string(), "On it.".to_string())]
        );

        // next turn resumes the session
        orch.pending
            .lock()
            .await
            .insert("slack:C1:1.0".to_string(), vec![msg("1.2", "again")]);
        orch.run_turn("slack:C1:1.0").await.unwrap();
        let requests = model.requests.lock().unwrap().clone();
        assert_eq!(requests[1].resume, Some(SessionRef("sess-1".to_string())));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let model = Arc::new(ScriptedModel {
            requests: StdMutex::new(Vec::new()),
            reply: String::new(),
        });
        let orch = Orchestrator::new(Vec::new(), model.clone(), registry(), scratch(), "Andy");
        orch.run_turn("slack:C1").await.unwrap();
        assert!(model.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn agent_failure_is_reported() {
        let dir = scratch();
        let orch = Orchestrator::new(Vec::new(), Arc::new(FailingModel), registry(), dir.clone(), "Andy");
        orch.pending
            .lock()
            .await
            .insert("slack:C1".to_string(), vec![msg("1.0", "a")]);
        assert!(orch.run_turn("slack:C1").await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn reply_without_connected_owner_is_no_channel() {
        let dir = scratch();
        let model = Arc::new(ScriptedModel {
            requests: StdMutex::new(Vec::new()),
            reply: "hello".to_string(),
        });
        let orch = Orchestrator::new(Vec::new(), model, registry(), dir.clone(), "Andy");
        orch.pending
            .lock()
            .await
            .insert("slack:C1".to_string(), vec![msg("1.0", "a")]);
        let err = orch.run_turn("slack:C1").await.unwrap_err();
        assert!(matches!(err, Error::NoChannel { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
