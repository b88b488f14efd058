//! Input cleansing for message text.
//!
//! The cleansing order is fixed: strip markup, escape markup-unsafe
//! characters, trim, enforce the length limit, drop quote/semicolon/`--`
//! sequences, then re-scan for anything that survived.  The escaping step
//! leaves existing entity references alone, which keeps [`sanitize`]
//! idempotent even after the semicolons of entities have been dropped.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::HaltReason;
use crate::security_log::SecurityLog;

/// Default maximum length of message text, in characters.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 500;

/// Characters that must never reach the upstream request.
const FORBIDDEN: [char; 3] = ['\'', '"', ';'];

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:!--[\s\S]*?(?:-->|$)|[A-Za-z/!?][^>]*(?:>|$))").unwrap());

static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);?").unwrap());

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)+$").unwrap());

/// Removes markup tags and comments.  A `<` not followed by a tag-like
/// character is kept as text.
pub fn strip_tags(input: &str) -> String {
    TAG_RE.replace_all(input, "").into_owned()
}

/// Escapes `&`, `"`, `'`, `<` and `>`.  An ampersand that already starts an
/// entity reference is left as is.
pub fn escape_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (idx, ch) in input.char_indices() {
        match ch {
            '&' if ENTITY_RE.is_match(&input[idx..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Strip, escape and trim.
pub fn clean_markup(raw: &str) -> String {
    escape_markup(&strip_tags(raw)).trim().to_string()
}

/// Drops `'`, `"`, `;` and `--`, then re-trims.
pub fn strip_injection_chars(input: &str) -> String {
    let without: String = input.chars().filter(|c| !FORBIDDEN.contains(c)).collect();
    without.replace("--", "").trim().to_string()
}

/// First forbidden character still present, if any.
pub fn find_forbidden(input: &str) -> Option<char> {
    input.chars().find(|c| FORBIDDEN.contains(c))
}

/// The full cleansing transformation without the length limit or the
/// re-scan.
pub fn sanitize(raw: &str) -> String {
    strip_injection_chars(&clean_markup(raw))
}

/// Kinds of free-form input the validator understands.  The webhook path
/// only validates `Text`; `Number` and `Email` are available to other
/// callers of [`validate_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text { max_chars: usize },
    Number,
    Email,
}

/// Checks `input` against `kind`: a character limit for text, a finite
/// decimal for numbers, or `local@domain.tld` for email addresses.
pub fn validate_input(input: &str, kind: InputKind) -> bool {
    match kind {
        InputKind::Text { max_chars } => input.chars().count() <= max_chars,
        InputKind::Number => {
            let trimmed = input.trim();
            !trimmed.is_empty() && trimmed.parse::<f64>().map_or(false, f64::is_finite)
        }
        InputKind::Email => EMAIL_RE.is_match(input),
    }
}

/// Runs the whole cleansing sequence for one message and records rejected
/// text to the suspicious-activity log.
pub struct InputSanitizer {
    max_chars: usize,
    security_log: Arc<SecurityLog>,
}

impl InputSanitizer {
    pub fn new(max_chars: usize, security_log: Arc<SecurityLog>) -> Self {
        Self {
            max_chars,
            security_log,
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn check(&self, raw: &str) -> Result<String, HaltReason> {
        self.check_with(raw, strip_injection_chars)
    }

    fn check_with(&self, raw: &str, remove: fn(&str) -> String) -> Result<String, HaltReason> {
        let cleaned = clean_markup(raw);
        if !validate_input(
            &cleaned,
            InputKind::Text {
                max_chars: self.max_chars,
            },
        ) {
            return Err(HaltReason::TooLong {
                len: cleaned.chars().count(),
                max: self.max_chars,
            });
        }

        let text = remove(&cleaned);

        // Only reachable if the removal above ever misses something.
        if let Some(ch) = find_forbidden(&text) {
            tracing::warn!(offending = %ch, "forbidden character survived cleansing");
            self.security_log.record_suspicious(&text);
            return Err(HaltReason::ForbiddenCharacters);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    fn sanitizer(max: usize) -> (InputSanitizer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security_log.txt");
        let log = SecurityLog::new(
            path.to_str().unwrap(),
            &Default::default(),
            Arc::new(MemorySink::new()),
        );
        (InputSanitizer::new(max, Arc::new(log)), dir)
    }

    #[test]
    fn strips_tags_and_comments() {
        assert_eq!(strip_tags("<b>bold</b> text"), "bold text");
        assert_eq!(strip_tags("a <!-- hidden --> b"), "a  b");
        assert_eq!(strip_tags("keep a < b"), "keep a < b");
        assert_eq!(strip_tags("cut <script src=x"), "cut ");
    }

    #[test]
    fn escapes_without_double_encoding() {
        assert_eq!(escape_markup("a & b"), "a &amp; b");
        assert_eq!(escape_markup("1 < 2 > 0"), "1 &lt; 2 &gt; 0");
        assert_eq!(escape_markup("&amp; &#039 &lt"), "&amp; &#039 &lt");
        assert_eq!(escape_markup("\"x\" 'y'"), "&quot;x&quot; &#039;y&#039;");
    }

    #[test]
    fn plain_question_passes_through() {
        assert_eq!(sanitize("  What is Davids job?  "), "What is Davids job?");
    }

    #[test]
    fn apostrophe_is_neutralised() {
        let out = sanitize("What is David's job?");
        assert_eq!(out, "What is David&#039s job?");
        assert!(find_forbidden(&out).is_none());
    }

    #[test]
    fn injection_payload_is_defanged() {
        let out = sanitize("Robert'); DROP TABLE--");
        assert!(find_forbidden(&out).is_none(), "{}", out);
        assert!(!out.contains("--"));
        assert!(out.contains("DROP TABLE"));
    }

    #[test]
    fn dash_runs_collapse() {
        assert_eq!(strip_injection_chars("a---b"), "a-b");
        assert_eq!(strip_injection_chars("a----b"), "ab");
        assert_eq!(strip_injection_chars("-;-"), "");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "What is David's job?",
            "<i>hi</i> & \"bye\"; -- ok",
            "; leading semicolon",
            "&';amp",
            "a ---- b ''' c",
            "tom & jerry < spike > butch",
            "emoji ✨ and ünïcödé",
            "&#x27; &bogus &",
        ];
        for s in samples {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once, "input: {:?}", s);
        }
    }

    #[test]
    fn length_limit_counts_characters() {
        let (s, _dir) = sanitizer(5);
        assert_eq!(s.check("ünïcö").unwrap(), "ünïcö");
        let err = s.check("abcdef").unwrap_err();
        assert_eq!(err, HaltReason::TooLong { len: 6, max: 5 });
    }

    #[test]
    fn limit_applies_after_escaping() {
        let (s, _dir) = sanitizer(500);
        let text = "<".repeat(130);
        assert!(matches!(s.check(&text), Err(HaltReason::TooLong { .. })));
        assert!(s.check(&"a".repeat(500)).is_ok());
        assert!(s.check(&format!("  {}  ", "a".repeat(500))).is_ok());
    }

    #[test]
    fn check_accepts_cleansed_injection() {
        let (s, dir) = sanitizer(500);
        let out = s.check("Robert'); DROP TABLE--").unwrap();
        assert!(find_forbidden(&out).is_none());
        assert!(!dir.path().join("security_log.txt").exists()
            || std::fs::read_to_string(dir.path().join("security_log.txt"))
                .unwrap()
                .is_empty());
    }

    #[test]
    fn surviving_forbidden_character_is_logged_and_rejected() {
        let (s, dir) = sanitizer(500);
        let keeps_semicolons: fn(&str) -> String = |t| t.replace('\'', "");
        let err = s
            .check_with("Robert'); DROP TABLE", keeps_semicolons)
            .unwrap_err();
        assert_eq!(err, HaltReason::ForbiddenCharacters);
        let log = std::fs::read_to_string(dir.path().join("security_log.txt")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(
            lines[0].ends_with(" - Suspicious input: Robert&#039;); DROP TABLE"),
            "{}",
            lines[0]
        );
    }

    #[test]
    fn validates_other_kinds() {
        assert!(validate_input("42", InputKind::Number));
        assert!(validate_input("-3.5", InputKind::Number));
        assert!(!validate_input("4x", InputKind::Number));
        assert!(!validate_input("NaN", InputKind::Number));
        assert!(validate_input("a.b@example.org", InputKind::Email));
        assert!(!validate_input("a@b", InputKind::Email));
        assert!(!validate_input("@example.org", InputKind::Email));
    }
}
