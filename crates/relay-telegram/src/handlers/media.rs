use teloxide::{net::Download, prelude::*, types::Message};
use tracing::{info, warn};

use relay_core::{
    messaging::{
        tags::{file_tag, is_audio_file},
        types::RegisteredGroup,
    },
    Result,
};

use crate::{map_err, router::Inbound};

/// A downloadable file carried by a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Attachment {
    pub file_id: String,
    pub unique_id: String,
    pub name: String,
}

pub(crate) fn attachment_of(msg: &Message) -> Option<Attachment> {
    if let Some(voice) = msg.voice() {
        return Some(Attachment {
            file_id: voice.file.id.clone(),
            unique_id: voice.file.unique_id.clone(),
            name: format!("voice-{}.ogg", msg.id.0),
        });
    }
    if let Some(audio) = msg.audio() {
        return Some(Attachment {
            file_id: audio.file.id.clone(),
            unique_id: audio.file.unique_id.clone(),
            name: audio
                .file_name
                .clone()
                .unwrap_or_else(|| format!("audio-{}.mp3", msg.id.0)),
        });
    }
    if let Some(doc) = msg.document() {
        return Some(Attachment {
            file_id: doc.file.id.clone(),
            unique_id: doc.file.unique_id.clone(),
            name: doc.file_name.clone().unwrap_or_else(|| "document".to_string()),
        });
    }
    None
}

async fn download(bot: &Bot, file_id: &str) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id.to_string()).await.map_err(map_err)?;
    let mut buf: Vec<u8> = Vec::new();
    bot.download_file(&file.path, &mut buf)
        .await
        .map_err(|e| relay_core::errors::Error::External(format!("telegram download error: {e}")))?;
    Ok(buf)
}

/// Download and store an attachment; audio is transcribed.
pub(crate) async fn attach(
    bot: &Bot,
    inbound: &Inbound,
    attachment: &Attachment,
    group: &RegisteredGroup,
) -> Option<String> {
    let bytes = match tokio::time::timeout(
        inbound.download_timeout,
        download(bot, &attachment.file_id),
    )
    .await
    {
        Ok(Ok(b)) => b,
        Ok(Err(e)) => {
            warn!(error = %e, file = %attachment.name, "telegram file download failed");
            return None;
        }
        Err(_) => {
            warn!(file = %attachment.name, "telegram file download timed out");
            return None;
        }
    };

    let saved = match inbound
        .storage
        .save_attachment(&group.folder, &attachment.unique_id, &attachment.name, &bytes)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, file = %attachment.name, "failed to store telegram file");
            return None;
        }
    };
    info!(file = %attachment.name, path = %saved.host_path.display(), "telegram file downloaded");

    if !is_audio_file(&attachment.name) {
        return Some(file_tag(&attachment.name, &saved.logical_path, None));
    }
    let transcript = inbound.transcriber.transcribe(&saved.host_path).await;
    if transcript.trim().is_empty() {
        warn!(file = %attachment.name, "no transcript for audio file");
    }
    Some(file_tag(
        &attachment.name,
        &saved.logical_path,
        Some(transcript.as_str()),
    ))
}
