//! Reply text normalisation
//!
//! Puts list items and sentences on their own lines, drops blank lines and
//! caps the length. Stored knowledge answers get the lighter
//! [`format_knowledge_answer`] pass so their author's line breaks survive.

use regex::Regex;
use std::sync::LazyLock;

/// Replies longer than this many characters are cut
pub const MAX_REPLY_CHARS: usize = 800;

const ELLIPSIS: &str = "...";

static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)(\d{1,2})\.\s+").expect("numbered pattern is valid"));
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)[*•]\s+").expect("bullet pattern is valid"));
static DASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)-\s+").expect("dash pattern is valid"));
static ARROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*→\s+").expect("arrow pattern is valid"));
static SENTENCE_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^\d\s][.?!])[ \t]+([A-Za-z가-힣])").expect("sentence pattern is valid")
});
static WIDE_GAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("gap pattern is valid"));

/// Format a generated reply
pub fn format_response(text: &str) -> String {
    let text = text.trim().replace("\\n", "\n");
    if text.is_empty() {
        return text;
    }

    let text = NUMBERED_RE.replace_all(&text, "\n$2. ");
    let text = BULLET_RE.replace_all(&text, "\n• ");
    let text = DASH_RE.replace_all(&text, "\n- ");
    let text = ARROW_RE.replace_all(&text, "\n→ ");
    let text = SENTENCE_END_RE.replace_all(&text, "$1\n$2");
    let text = WIDE_GAP_RE.replace_all(&text, "\n");

    cap(&tidy_lines(&text))
}

/// Format a stored answer: keep its own line breaks, only tidy and cap
pub fn format_knowledge_answer(text: &str) -> String {
    let text = text.trim().replace("\\n", "\n");
    let text = WIDE_GAP_RE.replace_all(&text, "\n");
    cap(&tidy_lines(&text))
}

fn tidy_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn cap(text: &str) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_REPLY_CHARS).collect();
    format!("{}{ELLIPSIS}", head.trim_end())
}
