//! Markup rendering (generic Markdown -> Slack mrkdwn / Telegram HTML).
//!
//! The agent writes loosely in Markdown. Each channel has its own dialect, so
//! outbound text is rewritten right before it is sent. Code spans are lifted
//! out first and restored last; nothing inside them is ever rewritten.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x00CODE(\d+)\x00").expect("valid regex"));

static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));
static BOLD_UNDERSCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__(.+?)__").expect("valid regex"));
static SINGLE_STAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").expect("valid regex"));
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b_([^_\n]+)_\b").expect("valid regex"));
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+)$").expect("valid regex"));
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[-*] ").expect("valid regex"));
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid regex"));

/// Escape `& < > "` for XML attributes/content and Telegram HTML.
pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A code span lifted out of the text before markup rewriting.
#[derive(Clone, Debug, PartialEq, Eq)]
struct CodeSpan {
    /// Exact source text including the backticks.
    raw: String,
    /// Inner text (fenced blocks: without the language tag line).
    body: String,
    fenced: bool,
}

fn placeholder(idx: usize) -> String {
    format!("\0CODE{idx}\0")
}

/// Replace every fenced and inline code span with a placeholder.
fn protect_code_spans(input: &str) -> (String, Vec<CodeSpan>) {
    let mut spans = Vec::new();
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('`') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let matched = if tail.starts_with("```") {
            fenced_span(tail)
        } else {
            inline_span(tail)
        };

        match matched {
            Some((span, consumed)) => {
                out.push_str(&placeholder(spans.len()));
                spans.push(span);
                rest = &tail[consumed..];
            }
            None => {
                // Unclosed: keep the whole backtick run literally.
                let run = tail.len() - tail.trim_start_matches('`').len();
                out.push_str(&tail[..run]);
                rest = &tail[run..];
            }
        }
    }

    out.push_str(rest);
    (out, spans)
}

fn fenced_span(tail: &str) -> Option<(CodeSpan, usize)> {
    let end = tail[3..].find("```")? + 3;
    let inner = &tail[3..end];

    // Optional language identifier followed by a newline.
    let lang_len = inner
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    let body = match inner[lang_len..].strip_prefix('\n') {
        Some(b) => b,
        None => inner,
    };

    let consumed = end + 3;
    Some((
        CodeSpan {
            raw: tail[..consumed].to_string(),
            body: body.to_string(),
            fenced: true,
        },
        consumed,
    ))
}

fn inline_span(tail: &str) -> Option<(CodeSpan, usize)> {
    let len = tail[1..].find('`')?;
    if len == 0 {
        return None;
    }
    let consumed = len + 2;
    Some((
        CodeSpan {
            raw: tail[..consumed].to_string(),
            body: tail[1..1 + len].to_string(),
            fenced: false,
        },
        consumed,
    ))
}

fn restore_code_spans(text: &str, spans: &[CodeSpan], render: impl Fn(&CodeSpan) -> String) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| spans.get(i))
                .map(&render)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Convert common Markdown habits to Slack mrkdwn.
///
/// `**bold**` -> `*bold*`, `## Heading` -> `*Heading*`, `[text](url)` ->
/// `<url|text>`. Code spans come back byte-identical.
pub fn markdown_to_mrkdwn(input: &str) -> String {
    let (text, spans) = protect_code_spans(input);

    let text = BOLD_RE.replace_all(&text, "*${1}*");
    let text = HEADING_RE.replace_all(&text, "*${1}*");
    let text = LINK_RE.replace_all(&text, "<${2}|${1}>");

    restore_code_spans(&text, &spans, |span| span.raw.clone())
}

/// Convert a minimal markdown subset to Telegram-compatible HTML.
///
/// Telegram HTML supports only a small subset: `<b>`, `<i>`, `<code>`, `<pre>`, `<a href="...">`.
pub fn convert_markdown_to_html(input: &str) -> String {
    let (text, spans) = protect_code_spans(input);

    // Escape first; the tags added below must survive.
    let text = escape_xml(&text);

    let text = HEADING_RE.replace_all(&text, "<b>${1}</b>");
    let text = BULLET_RE.replace_all(&text, "• ");
    let text = BOLD_RE.replace_all(&text, "<b>${1}</b>");
    let text = BOLD_UNDERSCORE_RE.replace_all(&text, "<b>${1}</b>");
    let text = SINGLE_STAR_RE.replace_all(&text, "<b>${1}</b>");
    let text = ITALIC_RE.replace_all(&text, "<i>${1}</i>");
    let text = LINK_RE.replace_all(&text, r#"<a href="${2}">${1}</a>"#);

    let mut html = restore_code_spans(&text, &spans, |span| {
        let escaped = escape_xml(&span.body);
        if span.fenced {
            format!("<pre>{escaped}</pre>")
        } else {
            format!("<code>{escaped}</code>")
        }
    });

    while html.contains("\n\n\n") {
        html = html.replace("\n\n\n", "\n\n");
    }
    html
}
