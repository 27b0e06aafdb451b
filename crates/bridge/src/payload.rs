//! Rendering of origin messages into relayed payloads.

use std::{collections::HashSet, sync::LazyLock};

use {regex::Regex, serde::Serialize};

use rainbow_common::types::SourceMessage;

/// Appended to bodies cut at the content-length ceiling.
pub const ELLIPSIS: char = '…';

/// Links that some clients only unfurl as a player when they appear as bare
/// message text, not inside decorated content.
#[allow(clippy::expect_used)]
static VIDEO_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bhttps?://(?:[a-z0-9-]+\.)*(?:youtube\.com/(?:watch\?|shorts/|live/)|youtu\.be/|clips\.twitch\.tv/|twitch\.tv/[^\s/]+/clip/|vimeo\.com/\d|streamable\.com/[a-z0-9]|tiktok\.com/)",
    )
    .expect("invalid regex")
});

const ANIMATED_EXTENSIONS: &[&str] = &[".gif", ".gifv", ".mp4", ".webm", ".mov"];

/// Decorated summary shown under a relayed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Where the message came from: community and channel.
    pub context: String,
    pub image_url: Option<String>,
    pub accent_color: u32,
}

/// Everything a delivery target needs to post or edit a relayed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub text: String,
    pub summary: Option<Summary>,
    /// True when the body is a bare video link that must stay undecorated.
    pub suppress_summary: bool,
    /// Deduplicated attachment and preview URLs, in message order.
    pub media: Vec<String>,
}

/// Per-bridge inputs to rendering.
#[derive(Debug, Clone, Copy)]
pub struct BridgeContext<'a> {
    /// Operator label of the origin channel, if one was configured.
    pub channel_label: Option<&'a str>,
    /// Held constant across edits of the same origin message.
    pub accent_color: u32,
    pub max_content_len: usize,
}

/// Render `message` for relaying.
pub fn build(message: &SourceMessage, ctx: &BridgeContext<'_>) -> Payload {
    let text = truncate(&message.content, ctx.max_content_len);
    let media = media_references(message);
    let suppress_summary = contains_video_link(&message.content);

    let summary = (!suppress_summary).then(|| Summary {
        context: context_line(message, ctx.channel_label),
        image_url: representative_image(message, &media),
        accent_color: ctx.accent_color,
    });

    Payload {
        display_name: message.author.display_name.clone(),
        avatar_url: message.author.avatar_url.clone(),
        text,
        summary,
        suppress_summary,
        media,
    }
}

/// Cut `text` to at most `max_chars` characters, the last being [`ELLIPSIS`]
/// when anything was dropped.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push(ELLIPSIS);
    out
}

pub fn contains_video_link(text: &str) -> bool {
    VIDEO_LINK.is_match(text)
}

fn media_references(message: &SourceMessage) -> Vec<String> {
    let attachments = message.attachments.iter().map(|a| a.url.as_str());
    let previews = message.previews.iter().flat_map(|p| {
        p.image_url
            .as_deref()
            .into_iter()
            .chain(p.thumbnail_url.as_deref())
    });

    let mut seen = HashSet::new();
    attachments
        .chain(previews)
        .filter(|url| !url.trim().is_empty() && seen.insert(*url))
        .map(str::to_string)
        .collect()
}

fn context_line(message: &SourceMessage, channel_label: Option<&str>) -> String {
    let community = message
        .guild_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(&message.guild_id);
    let channel = channel_label
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(&message.channel_id);
    format!("{community} • #{channel}")
}

/// Prefer animated or video media, then whatever came first.
fn representative_image(message: &SourceMessage, media: &[String]) -> Option<String> {
    let animated_attachment = message.attachments.iter().find(|a| {
        a.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("video/") || ct.eq_ignore_ascii_case("image/gif"))
    });

    animated_attachment
        .map(|a| a.url.clone())
        .or_else(|| media.iter().find(|url| looks_animated(url)).cloned())
        .or_else(|| media.first().cloned())
}

fn looks_animated(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    ANIMATED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
