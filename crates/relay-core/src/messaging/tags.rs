//! Inline structured tags embedded in canonical message content.

use std::path::Path;

/// Extensions treated as audio (transcribed on arrival).
pub const AUDIO_EXTENSIONS: &[&str] = &["ogg", "oga", "mp3", "m4a", "wav", "webm", "mp4"];

pub fn is_audio_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.as_str()))
}

/// `<file name=".." path=".." />`, or with a nested transcript when one exists.
pub fn file_tag(name: &str, path: &str, transcript: Option<&str>) -> String {
    match transcript.filter(|t| !t.trim().is_empty()) {
        Some(t) => format!(
            "<file name=\"{name}\" path=\"{path}\">\n<transcript>{t}</transcript>\n</file>"
        ),
        None => format!("<file name=\"{name}\" path=\"{path}\" />"),
    }
}

/// Reaction delivered to the agent as a message of its own.
pub fn reaction_tag(emoji: &str, target_id: &str) -> String {
    format!("<reaction emoji=\"{emoji}\" on_ts=\"{target_id}\" />")
}

/// Append attachment tags (one per line) after any text body.
pub fn append_tags(text: &str, tags: &[String]) -> String {
    if tags.is_empty() {
        return text.to_string();
    }
    let joined = tags.join("\n");
    if text.is_empty() {
        joined
    } else {
        format!("{text}\n{joined}")
    }
}
