//! Escaping of outgoing text for the chat platform's markup modes.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use serde::Deserialize;

static MARKDOWN_V2_SPECIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\[\]()_*~`>#+\-=|{}.!])").expect("valid MarkdownV2 pattern")
});

static MARKDOWN_SPECIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\[\]_*`])").expect("valid Markdown pattern"));

static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("valid space pattern"));

/// Text-rendering dialect of the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum MarkupMode {
    #[default]
    PlainText,
    /// Legacy Markdown.
    Markdown,
    MarkdownV2,
    Html,
}

impl MarkupMode {
    /// Escape `text` so it renders literally under this mode.
    pub fn escape(self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        match self {
            MarkupMode::Html => text
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
                .replace('"', "&quot;")
                .replace('\'', "&#39;"),
            MarkupMode::MarkdownV2 => MARKDOWN_V2_SPECIAL.replace_all(text, r"\${1}").into_owned(),
            MarkupMode::Markdown => MARKDOWN_SPECIAL.replace_all(text, r"\${1}").into_owned(),
            MarkupMode::PlainText => text.to_string(),
        }
    }

    /// Escape for callers building MarkdownV2 fragments by hand.
    ///
    /// Shares the per-mode character classes with [`MarkupMode::escape`], so
    /// both always agree; parentheses and brackets are covered by the single
    /// class pass and are never escaped twice.
    #[allow(dead_code)]
    pub fn escape_strict(self, text: &str) -> String {
        self.escape(text)
    }
}

/// Collapse runs of two or more spaces into one.
pub fn collapse_spaces(text: &str) -> String {
    SPACE_RUN.replace_all(text, " ").into_owned()
}

impl fmt::Display for MarkupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkupMode::PlainText => write!(f, "PlainText"),
            MarkupMode::Markdown => write!(f, "Markdown"),
            MarkupMode::MarkdownV2 => write!(f, "MarkdownV2"),
            MarkupMode::Html => write!(f, "HTML"),
        }
    }
}

impl FromStr for MarkupMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "html" => Ok(MarkupMode::Html),
            "markdownv2" => Ok(MarkupMode::MarkdownV2),
            "markdown" => Ok(MarkupMode::Markdown),
            "plaintext" | "plain" | "text" | "" => Ok(MarkupMode::PlainText),
            other => bail!("Unknown markup mode: {}", other),
        }
    }
}

// Unrecognized modes from configuration render as plain text.
impl From<String> for MarkupMode {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_default()
    }
}
