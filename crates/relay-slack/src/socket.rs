//! Socket Mode listener.
//!
//! Opens a websocket via `apps.connections.open`, acknowledges every envelope
//! and forwards `events_api` payloads. Reconnects with capped backoff until
//! cancelled.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::{errors::Error, Result};

use crate::api::SlackWebClient;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

/// What to do with one websocket text frame.
#[derive(Debug, PartialEq)]
pub(crate) struct Frame {
    /// Envelope id to acknowledge, if any.
    pub ack: Option<String>,
    pub action: FrameAction,
}

#[derive(Debug, PartialEq)]
pub(crate) enum FrameAction {
    Hello,
    /// Slack is about to drop the connection; open a new one.
    Reconnect,
    Event(Value),
    Ignore,
}

pub(crate) fn classify_frame(text: &str) -> Frame {
    let Ok(env) = serde_json::from_str::<Envelope>(text) else {
        return Frame {
            ack: None,
            action: FrameAction::Ignore,
        };
    };
    let action = match env.kind.as_str() {
        "hello" => FrameAction::Hello,
        "disconnect" => FrameAction::Reconnect,
        "events_api" => match env.payload.and_then(|mut p| p.get_mut("event").map(Value::take)) {
            Some(event) => FrameAction::Event(event),
            None => FrameAction::Ignore,
        },
        _ => FrameAction::Ignore,
    };
    Frame {
        ack: env.envelope_id,
        action,
    }
}

enum SessionEnd {
    Reconnect,
    Closed,
    /// The event consumer is gone; nothing left to listen for.
    ConsumerGone,
}

pub(crate) async fn run(
    client: &SlackWebClient,
    events: mpsc::UnboundedSender<Value>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = session(client, &events) => r,
        };

        match outcome {
            Ok(SessionEnd::ConsumerGone) => return Ok(()),
            Ok(SessionEnd::Reconnect) => {
                debug!("slack requested reconnect");
                backoff = INITIAL_BACKOFF;
                continue;
            }
            Ok(SessionEnd::Closed) => {
                info!("slack socket closed, reconnecting");
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "slack socket error");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn session(
    client: &SlackWebClient,
    events: &mpsc::UnboundedSender<Value>,
) -> Result<SessionEnd> {
    let url = client.open_socket_url().await?;
    let (ws, _) = connect_async(url.as_str()).await.map_err(ws_error)?;
    let (mut sink, mut stream) = ws.split();

    while let Some(msg) = stream.next().await {
        match msg.map_err(ws_error)? {
            Message::Text(text) => {
                let frame = classify_frame(text.as_str());
                if let Some(id) = frame.ack {
                    let ack = json!({ "envelope_id": id }).to_string();
                    sink.send(Message::Text(ack.into())).await.map_err(ws_error)?;
                }
                match frame.action {
                    FrameAction::Hello => info!("slack socket mode connected"),
                    FrameAction::Reconnect => return Ok(SessionEnd::Reconnect),
                    FrameAction::Event(event) => {
                        if events.send(event).is_err() {
                            return Ok(SessionEnd::ConsumerGone);
                        }
                    }
                    FrameAction::Ignore => {}
                }
            }
            Message::Ping(data) => sink.send(Message::Pong(data)).await.map_err(ws_error)?,
            Message::Close(_) => return Ok(SessionEnd::Closed),
            _ => {}
        }
    }
    Ok(SessionEnd::Closed)
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> Error {
    Error::External(format!("slack websocket error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_api_envelope_is_acked_and_forwarded() {
        let frame = classify_frame(
            r#"{"type":"events_api","envelope_id":"E1","payload":{"event":{"type":"message","text":"hi"}}}"#,
        );
        assert_eq!(frame.ack.as_deref(), Some("E1"));
        assert_eq!(
            frame.action,
            FrameAction::Event(json!({ "type": "message", "text": "hi" }))
        );
    }

    #[test]
    fn control_frames() {
        assert_eq!(classify_frame(r#"{"type":"hello"}"#).action, FrameAction::Hello);
        assert_eq!(
            classify_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#).action,
            FrameAction::Reconnect
        );
    }

    #[test]
    fn other_envelopes_are_acked_but_ignored() {
        let frame = classify_frame(r#"{"type":"slash_commands","envelope_id":"E2","payload":{}}"#);
        assert_eq!(frame.ack.as_deref(), Some("E2"));
        assert_eq!(frame.action, FrameAction::Ignore);

        let frame = classify_frame("not json");
        assert_eq!(frame.ack, None);
        assert_eq!(frame.action, FrameAction::Ignore);
    }
}
