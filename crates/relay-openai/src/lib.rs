//! OpenAI adapter (audio transcription via Whisper).

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use tracing::{info, warn};

use relay_core::{errors::Error, ports::Transcriber, Result};

const TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const MODEL: &str = "whisper-1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::External(format!("openai client error: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            http,
        })
    }

    pub async fn transcribe_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;

        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("audio.ogg")
            .to_string();
        let mime = mime_for(&file_name);

        let form = reqwest::multipart::Form::new()
            .text("model", MODEL)
            .text("response_format", "text")
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(mime)
                    .map_err(|e| Error::External(format!("openai multipart error: {e}")))?,
            );

        let resp = self
            .http
            .post(TRANSCRIPTIONS_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::External(format!("openai request error: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("openai response error: {e}")))?;
        if !status.is_success() {
            return Err(Error::External(format!(
                "openai transcription failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        Ok(body.trim().to_string())
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        _ => "audio/ogg",
    }
}

/// `Transcriber` backed by the OpenAI API. Failures are logged and yield `""`.
#[derive(Clone, Debug)]
pub struct OpenAiTranscriber {
    client: OpenAiClient,
}

impl OpenAiTranscriber {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, path: &Path) -> String {
        match self.client.transcribe_file(path).await {
            Ok(text) => {
                info!(path = %path.display(), length = text.len(), "transcribed audio");
                text
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "transcription failed");
                String::new()
            }
        }
    }
}
