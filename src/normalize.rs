#![forbid(unsafe_code)]

//! Normalizers turning raw mirror JSON into fixed-shape records.
//!
//! Mirrors disagree on field names and omit fields freely, so every optional
//! field degrades to the `"Load Failed"` sentinel instead of erroring. Only
//! structurally mandatory keys (the `videos` array of a playlist, the
//! `comments` array of a comment page) are hard requirements; their absence
//! surfaces as [`FetchError::MalformedUpstream`].

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;

use crate::fetch::FetchError;

/// Sentinel substituted for any optional field a mirror left out.
pub const LOAD_FAILED: &str = "Load Failed";

/// Formats a second count the way a wall clock reads: `M:SS` with unpadded
/// minutes, or `H:MM:SS` once an hour is reached.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Coerces a thumbnail URL to https. Mirrors hand back a mix of `https://`,
/// `http://` and protocol-relative `//` forms.
pub fn force_https(url: &str) -> String {
    if url.starts_with("https") {
        return url.to_owned();
    }
    let stripped = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("//"))
        .unwrap_or(url);
    format!("https://{stripped}")
}

/// Replaces literal newlines with `<br>` markers in upstream HTML snippets.
pub fn html_breaks(text: &str) -> String {
    text.replace('\n', "<br>")
}

/// Percent-encodes a banner URL while leaving `-`, `_`, `.`, `~`, `/` and `:`
/// unescaped so the scheme and path separators survive.
pub fn encode_banner(url: &str) -> String {
    urlencoding::encode(url)
        .replace("%2F", "/")
        .replace("%3A", ":")
}

fn text_or_failed(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(LOAD_FAILED)
        .to_owned()
}

fn value_or_failed(value: &Value, key: &str) -> Value {
    value
        .get(key)
        .cloned()
        .unwrap_or_else(|| Value::String(LOAD_FAILED.to_owned()))
}

fn seconds(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Last entry of an icon-variants array; mirrors order variants smallest to
/// largest, so the last one is the best resolution.
fn last_icon_url(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_array)
        .and_then(|icons| icons.last())
        .and_then(|icon| icon.get("url"))
        .and_then(Value::as_str)
        .unwrap_or(LOAD_FAILED)
        .to_owned()
}

/// Resolves a logical list that mirrors expose under differing key spellings.
/// Aliases are tried in order and the first non-empty array wins; an alias
/// holding an empty array falls through to the next one.
fn aliased_list<'a>(value: &'a Value, aliases: &[&str]) -> Vec<&'a Value> {
    for alias in aliases {
        if let Some(items) = value.get(*alias).and_then(Value::as_array)
            && !items.is_empty()
        {
            return items.iter().collect();
        }
    }
    Vec::new()
}

/// One entry of a search or trending result page, discriminated by the
/// upstream `type` field. Types nobody recognizes pass through untouched so
/// callers can at least inspect them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchItem {
    Video {
        title: String,
        id: String,
        author: String,
        published: String,
        length: String,
        view_count_text: String,
    },
    Playlist {
        title: String,
        id: String,
        thumbnail: String,
        count: Value,
    },
    Channel {
        author: String,
        id: String,
        thumbnail: String,
    },
    Unknown {
        data: Value,
    },
}

pub fn normalize_search_item(raw: &Value) -> SearchItem {
    match raw.get("type").and_then(Value::as_str) {
        Some("video") => SearchItem::Video {
            title: text_or_failed(raw, "title"),
            id: text_or_failed(raw, "videoId"),
            author: text_or_failed(raw, "author"),
            published: text_or_failed(raw, "publishedText"),
            length: format_duration(seconds(raw, "lengthSeconds")),
            view_count_text: text_or_failed(raw, "viewCountText"),
        },
        Some("playlist") => SearchItem::Playlist {
            title: text_or_failed(raw, "title"),
            id: text_or_failed(raw, "playlistId"),
            thumbnail: text_or_failed(raw, "playlistThumbnail"),
            count: value_or_failed(raw, "videoCount"),
        },
        Some("channel") => SearchItem::Channel {
            author: text_or_failed(raw, "author"),
            id: text_or_failed(raw, "authorId"),
            thumbnail: force_https(&last_icon_url(raw, "authorThumbnails")),
        },
        _ => SearchItem::Unknown { data: raw.clone() },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoDetail {
    pub video_urls: Vec<String>,
    pub description_html: String,
    pub title: String,
    pub length_text: String,
    pub author_id: String,
    pub author: String,
    pub author_thumbnails_url: String,
    pub view_count: Value,
    pub like_count: Value,
    pub subscribers_count: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedVideo {
    pub video_id: String,
    pub title: String,
    pub author_id: String,
    pub author: String,
    pub length_text: String,
    pub view_count_text: String,
}

/// Projects a video payload into the detail record plus recommendation stubs.
///
/// Stream URLs come from `formatStreams` reversed and truncated to two: the
/// raw array ascends in quality, so reversal puts the best first, and two is
/// all a watch page offers. The recommendation list is spelled
/// `recommendedvideo` by some mirrors and `recommendedVideos` by others.
pub fn normalize_video(raw: &Value) -> (VideoDetail, Vec<RecommendedVideo>) {
    let video_urls = raw
        .get("formatStreams")
        .and_then(Value::as_array)
        .map(|streams| {
            streams
                .iter()
                .rev()
                .filter_map(|stream| stream.get("url").and_then(Value::as_str))
                .take(2)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let detail = VideoDetail {
        video_urls,
        description_html: html_breaks(&text_or_failed(raw, "descriptionHtml")),
        title: text_or_failed(raw, "title"),
        length_text: format_duration(seconds(raw, "lengthSeconds")),
        author_id: text_or_failed(raw, "authorId"),
        author: text_or_failed(raw, "author"),
        author_thumbnails_url: last_icon_url(raw, "authorThumbnails"),
        view_count: value_or_failed(raw, "viewCount"),
        like_count: value_or_failed(raw, "likeCount"),
        subscribers_count: text_or_failed(raw, "subCountText"),
    };
    let recommended = aliased_list(raw, &["recommendedvideo", "recommendedVideos"])
        .into_iter()
        .map(|item| RecommendedVideo {
            video_id: text_or_failed(item, "videoId"),
            title: text_or_failed(item, "title"),
            author_id: text_or_failed(item, "authorId"),
            author: text_or_failed(item, "author"),
            length_text: format_duration(seconds(item, "lengthSeconds")),
            view_count_text: text_or_failed(item, "viewCountText"),
        })
        .collect();
    (detail, recommended)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelVideo {
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub id: String,
    pub author: String,
    pub published: String,
    pub view_count_text: String,
    pub length_str: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDetail {
    pub channel_name: String,
    pub channel_icon: String,
    pub channel_profile: String,
    pub author_banner: String,
    pub subscribers_count: Value,
    pub tags: Vec<String>,
}

/// Placeholder record used whenever the channel payload is unusable. Every
/// field is populated so consumers never hit a missing key.
pub fn degraded_channel() -> (Vec<ChannelVideo>, ChannelDetail) {
    (
        Vec::new(),
        ChannelDetail {
            channel_name: LOAD_FAILED.to_owned(),
            channel_icon: LOAD_FAILED.to_owned(),
            channel_profile: LOAD_FAILED.to_owned(),
            author_banner: String::new(),
            subscribers_count: Value::String(LOAD_FAILED.to_owned()),
            tags: Vec::new(),
        },
    )
}

/// Projects a channel payload. A payload without a populated latest-videos
/// list (under either key spelling) degrades to the placeholder record; this
/// function never fails.
pub fn normalize_channel(raw: &Value) -> (Vec<ChannelVideo>, ChannelDetail) {
    let latest = aliased_list(raw, &["latestvideo", "latestVideos"]);
    if latest.is_empty() {
        return degraded_channel();
    }
    let author = text_or_failed(raw, "author");
    let videos = latest
        .into_iter()
        .map(|item| ChannelVideo {
            item_type: "video".to_owned(),
            title: text_or_failed(item, "title"),
            id: text_or_failed(item, "videoId"),
            author: author.clone(),
            published: text_or_failed(item, "publishedText"),
            view_count_text: text_or_failed(item, "viewCountText"),
            length_str: format_duration(seconds(item, "lengthSeconds")),
        })
        .collect();
    let author_banner = raw
        .get("authorBanners")
        .and_then(Value::as_array)
        .and_then(|banners| banners.first())
        .and_then(|banner| banner.get("url"))
        .and_then(Value::as_str)
        .map(encode_banner)
        .unwrap_or_default();
    let detail = ChannelDetail {
        channel_name: author,
        channel_icon: last_icon_url(raw, "authorThumbnails"),
        channel_profile: text_or_failed(raw, "descriptionHtml"),
        author_banner,
        subscribers_count: value_or_failed(raw, "subCount"),
        tags: raw
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
    };
    (videos, detail)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistItem {
    pub title: String,
    pub id: String,
    #[serde(rename = "authorId")]
    pub author_id: String,
    pub author: String,
    #[serde(rename = "type")]
    pub item_type: String,
}

/// The `videos` array is the structural backbone of a playlist payload, so
/// its absence is a hard error rather than a sentinel.
pub fn normalize_playlist(raw: &Value) -> Result<Vec<PlaylistItem>, FetchError> {
    let videos = raw
        .get("videos")
        .and_then(Value::as_array)
        .ok_or(FetchError::MalformedUpstream { missing: "videos" })?;
    Ok(videos
        .iter()
        .map(|item| PlaylistItem {
            title: text_or_failed(item, "title"),
            id: text_or_failed(item, "videoId"),
            author_id: text_or_failed(item, "authorId"),
            author: text_or_failed(item, "author"),
            item_type: "video".to_owned(),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub author: String,
    pub authoricon: String,
    pub authorid: String,
    pub body: String,
}

pub fn normalize_comments(raw: &Value) -> Result<Vec<Comment>, FetchError> {
    let comments = raw
        .get("comments")
        .and_then(Value::as_array)
        .ok_or(FetchError::MalformedUpstream {
            missing: "comments",
        })?;
    Ok(comments
        .iter()
        .map(|item| Comment {
            author: text_or_failed(item, "author"),
            authoricon: last_icon_url(item, "authorThumbnails"),
            authorid: text_or_failed(item, "authorId"),
            body: html_breaks(&text_or_failed(item, "contentHtml")),
        })
        .collect())
}

/// Parses the JSONP-style suggestion payload. The upstream wraps a JSON array
/// in a `window.google.ac.h(...)` call; the wrapper is stripped tolerantly by
/// locating the outermost parentheses, then the suggestion strings are pulled
/// from the second element.
pub fn parse_suggestions(raw: &str) -> Result<Vec<String>> {
    let open = raw
        .find('(')
        .ok_or_else(|| anyhow!("suggestion payload has no opening parenthesis"))?;
    let close = raw
        .rfind(')')
        .ok_or_else(|| anyhow!("suggestion payload has no closing parenthesis"))?;
    if close <= open {
        return Err(anyhow!("suggestion payload wrapper is malformed"));
    }
    let inner: Value =
        serde_json::from_str(&raw[open + 1..close]).context("parsing suggestion JSON")?;
    let entries = inner
        .get(1)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("suggestion payload has no candidate list"))?;
    Ok(entries
        .iter()
        .filter_map(|entry| entry.get(0).and_then(Value::as_str))
        .map(str::to_owned)
        .collect())
}
