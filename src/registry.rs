//! Static registry mapping resource categories to ordered mirror lists.
//!
//! Lists are loaded once at startup and never mutated afterwards; the fetcher
//! only ever reads them. Order is priority order (first entry is tried first)
//! and duplicates are meaningful: a URL listed twice gets two attempts.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Resource kind served by the mirror API. Each category keeps its own
/// candidate list because mirrors differ in which endpoints they keep healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Video,
    Search,
    Trending,
    Channel,
    Playlist,
    Comments,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Search => "search",
            Self::Trending => "trending",
            Self::Channel => "channel",
            Self::Playlist => "playlist",
            Self::Comments => "comments",
        }
    }
}

const DEFAULT_VIDEO_INSTANCES: &[&str] = &[
    "https://yt.omada.cafe/",
    "https://inv.perditum.com/",
    "https://iv.melmac.space/",
];

// Search, trending, channel, playlist and comments share the same default
// rotation; the duplicate ducks.party entry is intentional (two attempts).
const DEFAULT_GENERAL_INSTANCES: &[&str] = &[
    "https://invidious.ducks.party/",
    "https://super8.absturztau.be/",
    "https://invidious.nikkosphere.com/",
    "https://invidious.ducks.party/",
    "https://yt.omada.cafe/",
    "https://iv.melmac.space/",
];

/// Shape of the optional TOML instance file. Categories that are absent keep
/// their compiled-in defaults.
#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    video: Option<Vec<String>>,
    search: Option<Vec<String>>,
    trending: Option<Vec<String>>,
    channel: Option<Vec<String>>,
    playlist: Option<Vec<String>>,
    comments: Option<Vec<String>>,
}

/// Immutable category-to-mirrors mapping, built once at process start.
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    lists: HashMap<Category, Vec<String>>,
}

impl InstanceRegistry {
    /// Builds a registry from the compiled-in mirror lists.
    pub fn with_defaults() -> Self {
        let mut lists = HashMap::new();
        lists.insert(Category::Video, normalized(DEFAULT_VIDEO_INSTANCES));
        for category in [
            Category::Search,
            Category::Trending,
            Category::Channel,
            Category::Playlist,
            Category::Comments,
        ] {
            lists.insert(category, normalized(DEFAULT_GENERAL_INSTANCES));
        }
        Self { lists }
    }

    /// Reads a TOML file and overrides the categories it names, leaving every
    /// other category at its default.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading instance file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("parsing instance file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(raw).context("parsing instance TOML")?;
        let mut registry = Self::with_defaults();
        let overrides = [
            (Category::Video, file.video),
            (Category::Search, file.search),
            (Category::Trending, file.trending),
            (Category::Channel, file.channel),
            (Category::Playlist, file.playlist),
            (Category::Comments, file.comments),
        ];
        for (category, urls) in overrides {
            if let Some(urls) = urls {
                registry
                    .lists
                    .insert(category, urls.iter().map(|url| with_trailing_slash(url)).collect());
            }
        }
        Ok(registry)
    }

    /// Candidate base URLs for a category in priority order. Unknown or
    /// emptied-out categories yield an empty slice, which the fetcher treats
    /// as immediate exhaustion.
    pub fn candidates(&self, category: Category) -> &[String] {
        self.lists
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn normalized(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|url| with_trailing_slash(url)).collect()
}

/// Base URLs are concatenated with `api/v1{path}`, so they must end in `/`.
fn with_trailing_slash(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_owned()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_category() {
        let registry = InstanceRegistry::with_defaults();
        for category in [
            Category::Video,
            Category::Search,
            Category::Trending,
            Category::Channel,
            Category::Playlist,
            Category::Comments,
        ] {
            assert!(
                !registry.candidates(category).is_empty(),
                "{} should have default mirrors",
                category.as_str()
            );
        }
    }

    #[test]
    fn defaults_preserve_duplicate_entries() {
        let registry = InstanceRegistry::with_defaults();
        let search = registry.candidates(Category::Search);
        let ducks = search
            .iter()
            .filter(|url| url.contains("ducks.party"))
            .count();
        assert_eq!(ducks, 2, "duplicate mirror entries must survive loading");
    }

    #[test]
    fn toml_override_replaces_only_named_categories() -> Result<()> {
        let registry = InstanceRegistry::from_toml_str(
            r#"
            video = ["https://mirror-a.example", "https://mirror-b.example/"]
            "#,
        )?;
        assert_eq!(
            registry.candidates(Category::Video),
            &[
                "https://mirror-a.example/".to_owned(),
                "https://mirror-b.example/".to_owned(),
            ]
        );
        // Search keeps its defaults.
        assert!(
            registry.candidates(Category::Search)[0].contains("ducks.party"),
            "unnamed categories keep their defaults"
        );
        Ok(())
    }

    #[test]
    fn toml_override_preserves_order_and_duplicates() -> Result<()> {
        let registry = InstanceRegistry::from_toml_str(
            r#"
            comments = ["https://one.example/", "https://two.example/", "https://one.example/"]
            "#,
        )?;
        let comments = registry.candidates(Category::Comments);
        assert_eq!(comments.len(), 3);
        assert_eq!(comments[0], comments[2]);
        Ok(())
    }

    #[test]
    fn empty_category_list_is_allowed() -> Result<()> {
        let registry = InstanceRegistry::from_toml_str("playlist = []\n")?;
        assert!(registry.candidates(Category::Playlist).is_empty());
        Ok(())
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(InstanceRegistry::from_toml_str("video = 5\n").is_err());
    }
}
