#![forbid(unsafe_code)]

//! One accessor per resource kind. Each builds the encoded mirror path, runs
//! the failover fetch, parses the winning body and hands it to the matching
//! normalizer. Accessors add no retries of their own; exhaustion propagates
//! to the caller as the typed [`FetchError`] inside the error chain.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RuntimeSettings;
use crate::fetch::FailoverClient;
use crate::normalize::{
    ChannelDetail, ChannelVideo, Comment, PlaylistItem, RecommendedVideo, SearchItem, VideoDetail,
    degraded_channel, normalize_channel, normalize_comments, normalize_playlist,
    normalize_search_item, normalize_video, parse_suggestions,
};
use crate::registry::{Category, InstanceRegistry};

/// Locale pinned on search and trending requests.
const LOCALE: &str = "jp";

/// Upstream for search suggestions. A single fixed host, deliberately outside
/// the mirror registry; there is nothing to fail over to.
const SUGGEST_BASE: &str =
    "https://www.google.com/complete/search?client=youtube&hl=ja&ds=yt&q=";

/// High-level client over the mirror pool. Cheap to clone and share across
/// request handlers.
#[derive(Clone)]
pub struct MirrorApi {
    client: FailoverClient,
}

impl MirrorApi {
    pub fn new(registry: InstanceRegistry, settings: &RuntimeSettings) -> Self {
        Self {
            client: FailoverClient::new(registry, settings),
        }
    }

    async fn fetch_json(&self, category: Category, path: &str) -> Result<Value> {
        let body = self.client.fetch(category, path).await?;
        serde_json::from_str(&body)
            .with_context(|| format!("parsing {} payload", category.as_str()))
    }

    pub async fn get_video(
        &self,
        video_id: &str,
    ) -> Result<(VideoDetail, Vec<RecommendedVideo>)> {
        let path = format!("/videos/{}", urlencoding::encode(video_id));
        let raw = self.fetch_json(Category::Video, &path).await?;
        Ok(normalize_video(&raw))
    }

    pub async fn get_search(&self, query: &str, page: u32) -> Result<Vec<SearchItem>> {
        let path = format!(
            "/search?q={}&page={page}&hl={LOCALE}",
            urlencoding::encode(query)
        );
        let raw = self.fetch_json(Category::Search, &path).await?;
        Ok(items_of(&raw).iter().map(normalize_search_item).collect())
    }

    /// Trending keeps only the video entries; mirrors mix shorts and other
    /// item types into the feed.
    pub async fn get_trending(&self, region: &str) -> Result<Vec<SearchItem>> {
        let path = format!(
            "/trending?region={}&hl={LOCALE}",
            urlencoding::encode(region)
        );
        let raw = self.fetch_json(Category::Trending, &path).await?;
        Ok(items_of(&raw)
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("video"))
            .map(normalize_search_item)
            .collect())
    }

    /// Total by contract: any failure along the way degrades to the
    /// placeholder record instead of an error.
    pub async fn get_channel(&self, channel_id: &str) -> (Vec<ChannelVideo>, ChannelDetail) {
        let path = format!("/channels/{}", urlencoding::encode(channel_id));
        match self.fetch_json(Category::Channel, &path).await {
            Ok(raw) => normalize_channel(&raw),
            Err(err) => {
                warn!(channel_id, %err, "channel fetch failed, serving placeholder");
                degraded_channel()
            }
        }
    }

    pub async fn get_playlist(&self, playlist_id: &str, page: u32) -> Result<Vec<PlaylistItem>> {
        let path = format!(
            "/playlists/{}?page={}",
            urlencoding::encode(playlist_id),
            urlencoding::encode(&page.to_string())
        );
        let raw = self.fetch_json(Category::Playlist, &path).await?;
        Ok(normalize_playlist(&raw)?)
    }

    pub async fn get_comments(&self, video_id: &str) -> Result<Vec<Comment>> {
        let path = format!("/comments/{}", urlencoding::encode(video_id));
        let raw = self.fetch_json(Category::Comments, &path).await?;
        Ok(normalize_comments(&raw)?)
    }

    pub async fn get_suggestions(&self, keyword: &str) -> Result<Vec<String>> {
        self.suggestions_from(SUGGEST_BASE, keyword).await
    }

    async fn suggestions_from(&self, base: &str, keyword: &str) -> Result<Vec<String>> {
        let url = format!("{base}{}", urlencoding::encode(keyword));
        let body = self.client.fetch_url(&url).await?;
        parse_suggestions(&body)
    }

    /// Reissues the whole video fetch until a non-empty stream list appears,
    /// up to `max_attempts` with a fixed pause between attempts. Returns
    /// `None` once attempts run out or the token is cancelled; fetch errors
    /// count as failed attempts rather than aborting the loop.
    pub async fn poll_video_streams(
        &self,
        video_id: &str,
        max_attempts: u32,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Option<(VideoDetail, Vec<RecommendedVideo>)> {
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                debug!(video_id, attempt, "stream polling cancelled");
                return None;
            }
            match self.get_video(video_id).await {
                Ok((detail, recommended)) if !detail.video_urls.is_empty() => {
                    return Some((detail, recommended));
                }
                Ok(_) => {
                    debug!(video_id, attempt, "no streams yet");
                }
                Err(err) => {
                    debug!(video_id, attempt, %err, "stream poll attempt failed");
                }
            }
            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(video_id, attempt, "stream polling cancelled");
                        return None;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
        None
    }
}

/// Search-style payloads are a bare JSON array; anything else normalizes to
/// an empty item list.
fn items_of(raw: &Value) -> &[Value] {
    raw.as_array().map(Vec::as_slice).unwrap_or_default()
}
