//! Canonical addressing (`scheme:conversation[:thread]`).

use std::fmt;

/// Separator between the components of a JID.
pub const JID_SEPARATOR: char = ':';

/// A parsed canonical address.
///
/// The string form is what flows through the rest of the system; this type is
/// only a view used where an adapter needs the individual components.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid {
    pub scheme: String,
    pub conversation: String,
    pub thread: Option<String>,
}

impl Jid {
    pub fn conversation(scheme: &str, conversation: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            conversation: conversation.to_string(),
            thread: None,
        }
    }

    pub fn thread(scheme: &str, conversation: &str, thread: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            conversation: conversation.to_string(),
            thread: Some(thread.to_string()),
        }
    }

    /// Parse `scheme:conversation[:thread]`.
    ///
    /// Returns `None` for fewer than two non-empty leading components. Anything
    /// past the third component is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(JID_SEPARATOR);
        let scheme = parts.next().filter(|s| !s.is_empty())?;
        let conversation = parts.next().filter(|s| !s.is_empty())?;
        let thread = parts.next().filter(|s| !s.is_empty());
        Some(Self {
            scheme: scheme.to_string(),
            conversation: conversation.to_string(),
            thread: thread.map(str::to_string),
        })
    }

    /// Parse, but only if the scheme matches.
    pub fn parse_with_scheme(raw: &str, scheme: &str) -> Option<Self> {
        Self::parse(raw).filter(|j| j.scheme == scheme)
    }

    /// The top-level conversation address (thread component dropped).
    pub fn group(&self) -> Self {
        Self {
            scheme: self.scheme.clone(),
            conversation: self.conversation.clone(),
            thread: None,
        }
    }

    pub fn is_thread(&self) -> bool {
        self.thread.is_some()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread {
            Some(t) => write!(f, "{}:{}:{}", self.scheme, self.conversation, t),
            None => write!(f, "{}:{}", self.scheme, self.conversation),
        }
    }
}

/// True iff `jid` starts with `scheme:`.
pub fn has_scheme(jid: &str, scheme: &str) -> bool {
    jid.strip_prefix(scheme)
        .is_some_and(|rest| rest.starts_with(JID_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_and_three_part_addresses() {
        let top = Jid::parse("slack:C123").unwrap();
        assert_eq!(top, Jid::conversation("slack", "C123"));
        assert!(!top.is_thread());

        let thread = Jid::parse("slack:C123:1700000000.000100").unwrap();
        assert_eq!(thread.thread.as_deref(), Some("1700000000.000100"));
        assert_eq!(thread.group().to_string(), "slack:C123");
        assert_eq!(thread.to_string(), "slack:C123:1700000000.000100");
    }

    #[test]
    fn rejects_short_addresses() {
        assert!(Jid::parse("slack").is_none());
        assert!(Jid::parse("slack:").is_none());
        assert!(Jid::parse(":C1").is_none());
        assert!(Jid::parse_with_scheme("tg:42", "slack").is_none());
    }

    #[test]
    fn scheme_prefix_requires_separator() {
        assert!(has_scheme("slack:C1", "slack"));
        assert!(!has_scheme("slackish:C1", "slack"));
        assert!(!has_scheme("slack", "slack"));
    }
}
