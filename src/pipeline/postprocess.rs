//! Deterministic text cleanup.
//!
//! Two entry points, both pure `&str → String`:
//!
//! * [`clean_page_text`] normalises text pulled out of a PDF page before it
//!   is fed to the model.
//! * [`clean_llm_reply`] strips wrapping that models put around JSON despite
//!   being told not to, so the reply can be handed to `serde_json`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Normalise one page of extracted text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode and NUL bytes
/// 3. Re-join words hyphenated across a line break
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive blank lines down to 1
/// 6. Trim the page as a whole
pub fn clean_page_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = join_hyphenated_breaks(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

/// Extract the JSON payload from a raw model reply.
///
/// Strips ```` ```json ```` fences and any chatter before the first `{` or
/// after the last `}`. Returns the trimmed input unchanged when it contains
/// no object at all, leaving the parse error to the caller.
pub fn clean_llm_reply(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = strip_code_fences(&s);
    let trimmed = s.trim();

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

// ── Line endings ─────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Invisible characters ─────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{0}', '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Hyphenation ──────────────────────────────────────────────────────────

// "treat-\nment" → "treatment"; "COVID-19\n" and "anti-\nPD-1" keep their hyphen.
static RE_HYPHEN_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])-\n([a-z])").unwrap());

fn join_hyphenated_breaks(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").to_string()
}

// ── Whitespace ───────────────────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Code fences ──────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_text_line_endings_and_blank_lines() {
        let input = "Title\r\n\r\n\r\n\r\nBody  \rmore";
        assert_eq!(clean_page_text(input), "Title\n\nBody\nmore");
    }

    #[test]
    fn page_text_rejoins_hyphenated_words() {
        assert_eq!(clean_page_text("treat-\nment"), "treatment");
        assert_eq!(clean_page_text("COVID-19\nvaccine"), "COVID-19\nvaccine");
        assert_eq!(clean_page_text("anti-\nPD-1"), "anti-\nPD-1");
    }

    #[test]
    fn page_text_strips_invisible_chars() {
        assert_eq!(clean_page_text("\u{FEFF}hel\u{200B}lo\u{0}"), "hello");
    }

    #[test]
    fn reply_plain_json_unchanged() {
        let input = r#"{"summary": "ok"}"#;
        assert_eq!(clean_llm_reply(input), input);
    }

    #[test]
    fn reply_json_fence_stripped() {
        let input = "```json\n{\"summary\": \"ok\"}\n```";
        assert_eq!(clean_llm_reply(input), "{\"summary\": \"ok\"}");
    }

    #[test]
    fn reply_bare_fence_stripped() {
        let input = "```\n{\"a\": 1}\n```\n";
        assert_eq!(clean_llm_reply(input), "{\"a\": 1}");
    }

    #[test]
    fn reply_surrounding_chatter_dropped() {
        let input = "Sure! Here is the JSON:\n{\"a\": {\"b\": 1}}\nLet me know.";
        assert_eq!(clean_llm_reply(input), "{\"a\": {\"b\": 1}}");
    }

    #[test]
    fn reply_without_object_is_trimmed_only() {
        assert_eq!(clean_llm_reply("  I cannot do that.  "), "I cannot do that.");
    }
}
