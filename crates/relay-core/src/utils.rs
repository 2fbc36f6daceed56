use chrono::{DateTime, SecondsFormat, Utc};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC, millisecond precision, `Z` suffix.
pub fn iso_timestamp_utc() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert a fractional epoch-seconds string (`"1700000000.000100"`) to ISO-8601.
///
/// Unparseable input falls back to the current time.
pub fn epoch_seconds_to_iso(raw: &str) -> String {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64))
        .map(to_iso)
        .unwrap_or_else(iso_timestamp_utc)
}

// ============== Text Helpers ==============

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_epoch_seconds() {
        assert_eq!(
            epoch_seconds_to_iso("1700000000.123456"),
            "2023-11-14T22:13:20.123Z"
        );
        assert_eq!(epoch_seconds_to_iso("0"), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn bad_epoch_falls_back_to_now() {
        let ts = epoch_seconds_to_iso("nope");
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2023-11-14T22:13:20.123Z".len());
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        let t = truncate_text(&"a".repeat(20), 10);
        assert_eq!(t, format!("{}...", "a".repeat(10)));
        assert_eq!(truncate_text("short", 10), "short");
    }
}
