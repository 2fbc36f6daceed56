//! Slack Web API client and the transport seam used by the channel adapter.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_core::{errors::Error, Result};

use crate::socket;

const API_BASE: &str = "https://slack.com/api";
/// Deadline for raw file transfers, which may be larger than API calls.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of a reaction request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionOutcome {
    Added,
    /// The reaction was already present; counts as success.
    AlreadyPresent,
}

/// Everything the adapter needs from Slack.
///
/// `SlackWebClient` is the production implementation; tests swap in a fake.
#[async_trait]
pub trait SlackTransport: Send + Sync {
    /// Resolve the bot's own user id.
    async fn auth_test(&self) -> Result<String>;

    /// Post a message, returning the new message's ts when Slack reports one.
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<Option<String>>;

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<ReactionOutcome>;

    async fn upload_file(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        path: &Path,
        title: Option<&str>,
    ) -> Result<()>;

    /// Authenticated download of a private file URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// Forward raw inbound event payloads to `events` until `cancel` fires.
    async fn listen(
        &self,
        events: mpsc::UnboundedSender<Value>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    rest: Value,
}

impl SlackResponse {
    fn into_ok(self, method: &str) -> Result<Value> {
        if self.ok {
            Ok(self.rest)
        } else {
            Err(api_error(method, self.error.as_deref()))
        }
    }
}

fn api_error(method: &str, code: Option<&str>) -> Error {
    Error::External(format!(
        "slack {method} failed: {}",
        code.unwrap_or("unknown error")
    ))
}

fn http_error(e: reqwest::Error) -> Error {
    Error::External(format!("slack http error: {e}"))
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

#[derive(Clone)]
pub struct SlackWebClient {
    http: Client,
    bot_token: String,
    app_token: String,
}

impl SlackWebClient {
    /// Every Web API call is bounded by `request_timeout`.
    pub fn new(bot_token: String, app_token: String, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::External(format!("slack client error: {e}")))?;
        Ok(Self {
            http,
            bot_token,
            app_token,
        })
    }

    async fn call(&self, method: &str, body: &Value) -> Result<SlackResponse> {
        self.http
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.bot_token)
            .json(body)
            .send()
            .await
            .map_err(http_error)?
            .json::<SlackResponse>()
            .await
            .map_err(http_error)
    }

    /// `apps.connections.open`: a fresh Socket Mode websocket URL.
    pub async fn open_socket_url(&self) -> Result<String> {
        let resp = self
            .http
            .post(format!("{API_BASE}/apps.connections.open"))
            .bearer_auth(&self.app_token)
            .send()
            .await
            .map_err(http_error)?
            .json::<SlackResponse>()
            .await
            .map_err(http_error)?;
        let rest = resp.into_ok("apps.connections.open")?;
        str_field(&rest, "url")
            .ok_or_else(|| Error::External("slack apps.connections.open: missing url".to_string()))
    }
}

#[async_trait]
impl SlackTransport for SlackWebClient {
    async fn auth_test(&self) -> Result<String> {
        let rest = self.call("auth.test", &json!({})).await?.into_ok("auth.test")?;
        str_field(&rest, "user_id")
            .ok_or_else(|| Error::External("slack auth.test: missing user_id".to_string()))
    }

    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<Option<String>> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = Value::String(ts.to_string());
        }
        let rest = self
            .call("chat.postMessage", &body)
            .await?
            .into_ok("chat.postMessage")?;
        Ok(str_field(&rest, "ts"))
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<ReactionOutcome> {
        let resp = self
            .call(
                "reactions.add",
                &json!({ "channel": channel, "timestamp": ts, "name": name }),
            )
            .await?;
        match (resp.ok, resp.error.as_deref()) {
            (true, _) => Ok(ReactionOutcome::Added),
            (false, Some("already_reacted")) => Ok(ReactionOutcome::AlreadyPresent),
            (false, code) => Err(api_error("reactions.add", code)),
        }
    }

    async fn upload_file(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        path: &Path,
        title: Option<&str>,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        // 1) reserve an upload URL
        let length = bytes.len().to_string();
        let rest = self
            .http
            .post(format!("{API_BASE}/files.getUploadURLExternal"))
            .bearer_auth(&self.bot_token)
            .form(&[("filename", filename.as_str()), ("length", length.as_str())])
            .send()
            .await
            .map_err(http_error)?
            .json::<SlackResponse>()
            .await
            .map_err(http_error)?
            .into_ok("files.getUploadURLExternal")?;
        let (Some(upload_url), Some(file_id)) =
            (str_field(&rest, "upload_url"), str_field(&rest, "file_id"))
        else {
            return Err(Error::External(
                "slack files.getUploadURLExternal: missing upload_url/file_id".to_string(),
            ));
        };

        // 2) push the bytes
        let status = self
            .http
            .post(&upload_url)
            .timeout(TRANSFER_TIMEOUT)
            .body(bytes)
            .send()
            .await
            .map_err(http_error)?
            .status();
        if !status.is_success() {
            return Err(Error::External(format!("slack file upload failed: HTTP {status}")));
        }

        // 3) share it into the conversation
        let mut body = json!({
            "files": [{ "id": file_id, "title": title.unwrap_or(&filename) }],
            "channel_id": channel,
        });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = Value::String(ts.to_string());
        }
        self.call("files.completeUploadExternal", &body)
            .await?
            .into_ok("files.completeUploadExternal")?;
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .timeout(TRANSFER_TIMEOUT)
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .map_err(http_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::External(format!("slack download failed: HTTP {status}")));
        }
        let bytes = resp.bytes().await.map_err(http_error)?;
        Ok(bytes.to_vec())
    }

    async fn listen(
        &self,
        events: mpsc::UnboundedSender<Value>,
        cancel: CancellationToken,
    ) -> Result<()> {
        socket::run(self, events, cancel).await
    }
}
