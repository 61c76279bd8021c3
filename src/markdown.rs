//! Markdown cleanup and the weighted text a note is embedded from.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::note::Note;

/// How many times the title is repeated in the embedded text.
pub const TITLE_WEIGHT: usize = 3;

/// How many times the tag line is repeated in the embedded text.
pub const TAG_WEIGHT: usize = 2;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:```|~~~)[^\n]*\n?").expect("valid regex")
});
static IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex")
});
static WIKI_EMBED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[\[[^\]]*\]\]").expect("valid regex")
});
static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex")
});
static WIKILINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\]|]*)(?:\|([^\]]*))?\]\]").expect("valid regex")
});
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`([^`\n]*)`").expect("valid regex")
});
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").expect("valid regex")
});
static STRONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\*\*|__)([^\n]+?)(?:\*\*|__)").expect("valid regex")
});
static EMPHASIS_STAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*([^*\n]+)\*").expect("valid regex")
});
static EMPHASIS_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b_([^_\n]+)_\b").expect("valid regex")
});
static STRIKETHROUGH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"~~([^\n]+?)~~").expect("valid regex")
});
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n(?:[ \t]*\n){2,}").expect("valid regex")
});

/// Strip markdown syntax while keeping the readable text.
///
/// Code fences and backticks go but the code stays, headings and
/// emphasis markers go, links and wikilinks collapse to their display
/// text, images disappear entirely, and any run of blank lines longer
/// than one collapses to a single blank line.
pub fn clean_markdown(content: &str) -> String {
    let text = FENCE.replace_all(content, "");
    let text = IMAGE.replace_all(&text, "");
    let text = WIKI_EMBED.replace_all(&text, "");
    let text = LINK.replace_all(&text, "$1");
    let text = WIKILINK.replace_all(&text, |caps: &Captures<'_>| {
        caps.get(2)
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    });
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    let text = STRONG.replace_all(&text, "$1");
    let text = EMPHASIS_STAR.replace_all(&text, "$1");
    let text = EMPHASIS_UNDERSCORE.replace_all(&text, "$1");
    let text = STRIKETHROUGH.replace_all(&text, "$1");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// `tag` with a single leading `#`.
pub fn hashtag(tag: &str) -> String {
    if tag.starts_with('#') {
        tag.to_string()
    } else {
        format!("#{tag}")
    }
}

/// Build the text a note is embedded from.
///
/// The title is repeated [`TITLE_WEIGHT`] times and the tag line
/// [`TAG_WEIGHT`] times so both pull the vector toward what the note is
/// about; the cleaned body and the folder path appear once. Empty parts
/// are left out.
pub fn document_text(note: &Note) -> String {
    let mut sections = Vec::with_capacity(4);

    let title = note.name.trim();
    if !title.is_empty() {
        sections.push(vec![title; TITLE_WEIGHT].join("\n"));
    }

    let body = clean_markdown(&note.content);
    if !body.is_empty() {
        sections.push(body);
    }

    let tag_line = note
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(hashtag)
        .collect::<Vec<_>>()
        .join(" ");
    if !tag_line.is_empty() {
        sections.push(vec![tag_line.as_str(); TAG_WEIGHT].join("\n"));
    }

    if let Some(folder) = note.folder.as_deref().map(str::trim)
        && !folder.is_empty()
    {
        sections.push(folder.to_string());
    }

    sections.join("\n\n")
}
