//! Thread text normalization before it is sent to the model.
//!
//! Pure string processing, no LLM calls:
//! - invisible/format characters stripped
//! - quoted replies and signature blocks dropped, per message
//! - footer lines (unsubscribe, tracking, legal boilerplate) dropped when a
//!   footer phrase dominates the line
//! - whitespace collapsed
//! - long threads cut in the middle, keeping the newest text

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::ConfigError;
use crate::pipeline::types::is_message_separator;

/// Default prompt budget, in characters.
pub const DEFAULT_MAX_CHARS: usize = 30_000;

/// Default amount of the oldest text kept when truncating.
pub const DEFAULT_HEAD_CHARS: usize = 2_000;

/// Zero-width, bidi and other invisible format characters.
const DEFAULT_INVISIBLE_CHARS: &[char] = &[
    '\u{00AD}', // soft hyphen
    '\u{034F}', // combining grapheme joiner
    '\u{061C}', // arabic letter mark
    '\u{115F}', '\u{1160}', // hangul fillers
    '\u{17B4}', '\u{17B5}', // khmer vowel inherent
    '\u{180E}', // mongolian vowel separator
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}',
    '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}',
    '\u{2060}', '\u{2061}', '\u{2062}', '\u{2063}', '\u{2064}',
    '\u{2066}', '\u{2067}', '\u{2068}', '\u{2069}',
    '\u{3164}', // hangul filler
    '\u{FEFF}', // byte order mark
    '\u{FFA0}', // halfwidth hangul filler
];

/// Footer phrases as (description, regex).
///
/// Patterns take in the boilerplate around the trigger word so a real footer
/// line is covered almost entirely, while a sentence that only mentions the
/// word is not.
const DEFAULT_FOOTER_PATTERNS: &[(&str, &str)] = &[
    (
        "unsubscribe",
        r"(?i)(\b(click|tap) here\s+)?(\bto\s+)?\bunsubscribe\b(\s+(here|now|below))?(\s+from\s+(this|these|our|all|future)(\s+[a-z]+){1,2})?",
    ),
    (
        "subscription preferences",
        r"(?i)(((update|manage|change)\s+)?(your\s+)?(subscription|email|notification)\s+(preferences|settings)|manage\s+(your\s+)?(subscription|preferences)|opt[- ]?out(\s+of\s+[a-z ]+)?)",
    ),
    ("view in browser", r"(?i)view (this|it) (email|message|online)? ?in (your|a) (web )?browser"),
    ("mobile signature", r"(?i)^sent from my (iphone|ipad|android|samsung|phone|mobile device)"),
    ("recipient notice", r"(?i)this (email|message) was sent to \S+.*$"),
    ("copyright", r"(?i)(©|\(c\)|copyright)\s*\d{4}.*$"),
    ("rights reserved", r"(?i)^.*\ball rights reserved\.?"),
    (
        "privacy policy",
        r"(?i)((read|view|see)\s+)?(our\s+)?privacy policy(\s*[|·•-]\s*terms( of (use|service))?)?",
    ),
    (
        "confidentiality notice",
        r"(?i)(confidentiality notice|this (email|message) (and any attachments )?(is|are|may be) confidential).*$",
    ),
    ("tracking link", r"(?i)^\S*https?://\S*(utm_[a-z]+=|/track(ing)?/|/click\?)\S*$"),
];

static HORIZONTAL_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{00A0}\u{2000}-\u{200A}\u{202F}\u{205F}\u{3000}]+").unwrap());

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// A footer heuristic: a pattern and the line it should dominate.
#[derive(Debug, Clone)]
pub struct FooterRule {
    /// Human-readable description.
    pub pattern: String,
    /// Compiled regex for matching.
    pub regex: Regex,
}

/// Tunable cleaning heuristics.
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Characters removed outright.
    pub invisible_chars: Vec<char>,
    /// Lines dominated by one of these are dropped.
    pub footer_rules: Vec<FooterRule>,
    /// Fraction (0.0-1.0) of a line's visible characters a footer match
    /// must cover for the line to be dropped.
    pub footer_dominance: f32,
    /// Drop `>` quoted lines and text after reply attributions.
    pub strip_quotes: bool,
    /// Drop text after a `-- ` signature delimiter.
    pub strip_signatures: bool,
    /// Upper bound on the cleaned text, in characters.
    pub max_chars: usize,
    /// How much of the oldest text survives truncation.
    pub head_chars: usize,
}

impl CleanerConfig {
    /// Configuration with the built-in heuristic lists.
    pub fn default_rules() -> Self {
        let footer_rules = DEFAULT_FOOTER_PATTERNS
            .iter()
            .map(|(pattern, regex)| FooterRule {
                pattern: (*pattern).to_string(),
                regex: Regex::new(regex).unwrap(),
            })
            .collect();

        Self {
            invisible_chars: DEFAULT_INVISIBLE_CHARS.to_vec(),
            footer_rules,
            footer_dominance: 0.6,
            strip_quotes: true,
            strip_signatures: true,
            max_chars: DEFAULT_MAX_CHARS,
            head_chars: DEFAULT_HEAD_CHARS,
        }
    }

    /// Configuration with no junk rules; only whitespace and length handling.
    pub fn empty() -> Self {
        Self {
            invisible_chars: Vec::new(),
            footer_rules: Vec::new(),
            footer_dominance: 1.0,
            strip_quotes: false,
            strip_signatures: false,
            max_chars: DEFAULT_MAX_CHARS,
            head_chars: DEFAULT_HEAD_CHARS,
        }
    }

    /// Add a custom footer pattern.
    pub fn add_footer_rule(&mut self, pattern: &str) -> Result<(), ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.footer_rules.push(FooterRule {
            pattern: pattern.to_string(),
            regex,
        });
        Ok(())
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self::default_rules()
    }
}

/// Normalizes raw thread text. Deterministic for identical input.
#[derive(Debug, Clone, Default)]
pub struct ThreadCleaner {
    config: CleanerConfig,
}

impl ThreadCleaner {
    pub fn new(config: CleanerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    /// Clean raw thread text.
    pub fn clean(&self, raw: &str) -> String {
        let visible = self.strip_invisible(raw);
        let kept = self.drop_junk_lines(&visible);
        let collapsed = collapse_whitespace(&kept);
        let cleaned = truncate_middle(&collapsed, self.config.max_chars, self.config.head_chars);

        debug!(
            raw_chars = raw.chars().count(),
            cleaned_chars = cleaned.chars().count(),
            "Cleaned thread text"
        );
        cleaned
    }

    fn strip_invisible(&self, text: &str) -> String {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        normalized
            .chars()
            .filter(|c| {
                if *c == '\n' || *c == '\t' {
                    return true;
                }
                !c.is_control() && !self.config.invisible_chars.contains(c)
            })
            .collect()
    }

    /// Line pass: quotes, signatures and footers.
    ///
    /// Skipping triggered by an attribution or signature lasts until the next
    /// message separator, so it never swallows a later message.
    fn drop_junk_lines(&self, text: &str) -> String {
        let mut kept: Vec<&str> = Vec::new();
        let mut skipping = false;

        for line in text.lines() {
            let trimmed = line.trim();

            if is_message_separator(trimmed) {
                skipping = false;
                if kept.last().is_some_and(|l| !l.trim().is_empty()) {
                    kept.push("");
                }
                kept.push(trimmed);
                continue;
            }
            if skipping {
                continue;
            }

            if self.config.strip_quotes {
                if trimmed.starts_with('>') {
                    continue;
                }
                if is_reply_attribution(trimmed) {
                    skipping = true;
                    continue;
                }
            }

            if self.config.strip_signatures && line == "-- " {
                skipping = true;
                continue;
            }

            if self.is_footer(trimmed) {
                continue;
            }

            kept.push(line);
        }

        kept.join("\n")
    }

    fn is_footer(&self, line: &str) -> bool {
        let visible = line.chars().filter(|c| !c.is_whitespace()).count();
        if visible == 0 {
            return false;
        }
        self.config.footer_rules.iter().any(|rule| {
            rule.regex.find(line).is_some_and(|m| {
                let covered = m.as_str().chars().filter(|c| !c.is_whitespace()).count();
                covered as f32 / visible as f32 >= self.config.footer_dominance
            })
        })
    }
}

/// True if cleaned text holds anything besides message separators.
pub fn has_readable_content(cleaned: &str) -> bool {
    cleaned
        .lines()
        .any(|line| !line.trim().is_empty() && !is_message_separator(line))
}

/// "On <date> <person> wrote:" or an "Original Message" separator.
fn is_reply_attribution(line: &str) -> bool {
    (line.starts_with("On ") && line.ends_with("wrote:"))
        || (line.starts_with("---") && line.contains("Original Message"))
}

/// Collapse horizontal whitespace, trim line ends, allow at most one blank
/// line in a row, trim the whole text.
fn collapse_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| HORIZONTAL_SPACE.replace_all(line, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    BLANK_RUN.replace_all(&joined, "\n\n").trim().to_string()
}

/// Keep at most `max_chars` characters: the first `head_chars` and as much
/// of the end as fits, with a marker in between.
fn truncate_middle(text: &str, max_chars: usize, head_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let marker_for = |omitted: usize| format!("\n\n[... {omitted} characters omitted ...]\n\n");
    // Reserve room for the marker using the widest possible count.
    let reserve = marker_for(total).chars().count();
    if max_chars <= reserve {
        return text.chars().skip(total - max_chars).collect();
    }

    let budget = max_chars - reserve;
    let head = head_chars.min(budget / 2);
    let tail = budget - head;
    let omitted = total - head - tail;

    let mut out: String = text.chars().take(head).collect();
    out.push_str(&marker_for(omitted));
    out.extend(text.chars().skip(total - tail));
    out
}
