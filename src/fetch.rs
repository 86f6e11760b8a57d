#![forbid(unsafe_code)]

//! Failover fetcher: walks the ordered mirror list for a category and returns
//! the first HTTP 200 response whose body parses as JSON. Attempts run under a
//! global wall-clock budget; a new attempt only starts while at least one
//! attempt's worth of headroom remains. There is no health memory between
//! requests, every request starts again at the top of the list.

use std::{
    error::Error,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{debug, warn};

use crate::config::RuntimeSettings;
use crate::registry::{Category, InstanceRegistry};

/// Failure modes surfaced to callers. Transport errors, bad statuses and
/// non-JSON bodies are not individually reported; they collapse into
/// `AllInstancesExhausted` once every candidate has been tried or the budget
/// ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Every candidate mirror for the category failed, or the time budget
    /// expired before one succeeded.
    AllInstancesExhausted { category: Category },
    /// A mirror answered with valid JSON that lacks a structurally required
    /// key, so the payload cannot be projected into a record.
    MalformedUpstream { missing: &'static str },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllInstancesExhausted { category } => {
                write!(f, "all {} instances exhausted", category.as_str())
            }
            Self::MalformedUpstream { missing } => {
                write!(f, "upstream response is missing required key '{missing}'")
            }
        }
    }
}

impl Error for FetchError {}

/// Blocking HTTP client over the instance registry. Cloning is cheap; the
/// agent shares its connection pool and the registry is behind an `Arc`.
#[derive(Clone)]
pub struct FailoverClient {
    agent: ureq::Agent,
    registry: Arc<InstanceRegistry>,
    total_budget: Duration,
    attempt_reserve: Duration,
}

impl FailoverClient {
    pub fn new(registry: InstanceRegistry, settings: &RuntimeSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(settings.connect_timeout)
            .timeout_read(settings.read_timeout)
            .build();
        Self {
            agent,
            registry: Arc::new(registry),
            total_budget: settings.total_budget,
            attempt_reserve: settings.attempt_reserve,
        }
    }

    /// Async entry point; the blocking loop runs on the tokio blocking pool so
    /// concurrent inbound requests never stall each other.
    pub async fn fetch(&self, category: Category, path: &str) -> Result<String, FetchError> {
        let client = self.clone();
        let path = path.to_owned();
        match tokio::task::spawn_blocking(move || client.fetch_blocking(category, &path)).await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(category = category.as_str(), %join_err, "fetch task failed");
                Err(FetchError::AllInstancesExhausted { category })
            }
        }
    }

    /// Walks the category's mirrors in order and returns the first body that
    /// is an HTTP 200 with valid JSON. The path must start with `/` and is
    /// appended to `{base}api/v1` verbatim, so callers encode it themselves.
    pub fn fetch_blocking(&self, category: Category, path: &str) -> Result<String, FetchError> {
        let started = Instant::now();
        for base in self.registry.candidates(category) {
            if started.elapsed() + self.attempt_reserve >= self.total_budget {
                warn!(
                    category = category.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "time budget spent before trying every instance"
                );
                break;
            }
            let url = format!("{base}api/v1{path}");
            debug!(category = category.as_str(), %url, "trying instance");
            let response = match self
                .agent
                .get(&url)
                .set("User-Agent", &random_chrome_user_agent())
                .call()
            {
                Ok(response) => response,
                Err(err) => {
                    warn!(category = category.as_str(), %base, %err, "instance failed");
                    continue;
                }
            };
            if response.status() != 200 {
                warn!(
                    category = category.as_str(),
                    %base,
                    status = response.status(),
                    "instance returned non-200"
                );
                continue;
            }
            let body = match response.into_string() {
                Ok(body) => body,
                Err(err) => {
                    warn!(category = category.as_str(), %base, %err, "reading body failed");
                    continue;
                }
            };
            if serde_json::from_str::<serde_json::Value>(&body).is_err() {
                warn!(category = category.as_str(), %base, "instance returned non-JSON body");
                continue;
            }
            debug!(
                category = category.as_str(),
                %base,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "instance answered"
            );
            return Ok(body);
        }
        Err(FetchError::AllInstancesExhausted { category })
    }

    /// One-shot GET against an arbitrary URL, outside the registry. Used for
    /// the suggestion upstream, which has a single fixed host and no mirrors
    /// to fail over to.
    pub async fn fetch_url(&self, url: &str) -> Result<String> {
        let agent = self.agent.clone();
        let url = url.to_owned();
        tokio::task::spawn_blocking(move || {
            let response = agent
                .get(&url)
                .set("User-Agent", &random_chrome_user_agent())
                .call()
                .with_context(|| format!("requesting {url}"))?;
            response
                .into_string()
                .with_context(|| format!("reading body from {url}"))
        })
        .await
        .context("suggestion fetch task failed")?
    }
}

/// Fresh Chrome-shaped User-Agent per request so mirrors see ordinary browser
/// traffic rather than one fixed client string.
pub fn random_chrome_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let major: u32 = rng.gen_range(120..=135);
    let build: u32 = rng.gen_range(6000..=7100);
    let patch: u32 = rng.gen_range(40..=240);
    format!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/{major}.0.{build}.{patch} Safari/537.36"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    /// Spawns a tiny HTTP responder on a random local port that answers every
    /// connection with the same canned response and counts hits.
    fn mock_instance(status_line: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let recorded = hits.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                recorded.fetch_add(1, Ordering::SeqCst);
                let mut request = [0u8; 2048];
                let _ = stream.read(&mut request);
                let response = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (format!("http://{addr}/"), hits)
    }

    /// Reserves a port that nothing listens on, to simulate a dead mirror.
    fn dead_instance() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/")
    }

    fn test_settings() -> RuntimeSettings {
        RuntimeSettings {
            connect_timeout: Duration::from_millis(1_000),
            read_timeout: Duration::from_millis(1_000),
            total_budget: Duration::from_secs(5),
            attempt_reserve: Duration::from_millis(50),
            instances_file: None,
            host: "127.0.0.1".into(),
            port: 0,
        }
    }

    fn registry_for(category: &str, bases: &[&str]) -> InstanceRegistry {
        let urls: Vec<String> = bases.iter().map(|base| format!("\"{base}\"")).collect();
        InstanceRegistry::from_toml_str(&format!("{category} = [{}]\n", urls.join(", "))).unwrap()
    }

    #[test]
    fn first_success_stops_iteration() {
        let (bad, bad_hits) = mock_instance("HTTP/1.1 500 Internal Server Error", "{}");
        let (good, good_hits) = mock_instance("HTTP/1.1 200 OK", r#"{"videoId":"abc"}"#);
        let (spare, spare_hits) = mock_instance("HTTP/1.1 200 OK", r#"{"videoId":"later"}"#);
        let registry = registry_for("video", &[&bad, &good, &spare]);
        let client = FailoverClient::new(registry, &test_settings());

        let body = client.fetch_blocking(Category::Video, "/videos/abc").unwrap();
        assert_eq!(body, r#"{"videoId":"abc"}"#);
        assert_eq!(bad_hits.load(Ordering::SeqCst), 1);
        assert_eq!(good_hits.load(Ordering::SeqCst), 1);
        assert_eq!(spare_hits.load(Ordering::SeqCst), 0, "later mirrors must not be contacted");
    }

    #[test]
    fn non_json_body_moves_to_next_instance() {
        let (html, _) = mock_instance("HTTP/1.1 200 OK", "<html>rate limited</html>");
        let (good, _) = mock_instance("HTTP/1.1 200 OK", r#"[{"type":"video"}]"#);
        let registry = registry_for("search", &[&html, &good]);
        let client = FailoverClient::new(registry, &test_settings());

        let body = client.fetch_blocking(Category::Search, "/search?q=x").unwrap();
        assert_eq!(body, r#"[{"type":"video"}]"#);
    }

    #[test]
    fn unreachable_instance_is_skipped() {
        let dead = dead_instance();
        let (good, _) = mock_instance("HTTP/1.1 200 OK", r#"{"ok":true}"#);
        let registry = registry_for("comments", &[&dead, &good]);
        let client = FailoverClient::new(registry, &test_settings());

        let body = client.fetch_blocking(Category::Comments, "/comments/x").unwrap();
        assert_eq!(body, r#"{"ok":true}"#);
    }

    #[test]
    fn exhaustion_yields_typed_error() {
        let (bad, bad_hits) = mock_instance("HTTP/1.1 502 Bad Gateway", "{}");
        let registry = registry_for("playlist", &[&bad]);
        let client = FailoverClient::new(registry, &test_settings());

        let err = client
            .fetch_blocking(Category::Playlist, "/playlists/x")
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::AllInstancesExhausted {
                category: Category::Playlist
            }
        );
        assert!(err.to_string().contains("playlist"));
        assert_eq!(bad_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_candidate_list_exhausts_immediately() {
        let registry = InstanceRegistry::from_toml_str("trending = []\n").unwrap();
        let client = FailoverClient::new(registry, &test_settings());
        let err = client
            .fetch_blocking(Category::Trending, "/trending")
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::AllInstancesExhausted {
                category: Category::Trending
            }
        );
    }

    #[test]
    fn spent_budget_blocks_further_attempts() {
        let (good, good_hits) = mock_instance("HTTP/1.1 200 OK", "{}");
        let registry = registry_for("video", &[&good]);
        let mut settings = test_settings();
        // Reserve equals the whole budget, so no attempt may start.
        settings.total_budget = Duration::from_millis(50);
        settings.attempt_reserve = Duration::from_millis(50);
        let client = FailoverClient::new(registry, &settings);

        let err = client.fetch_blocking(Category::Video, "/videos/x").unwrap_err();
        assert_eq!(
            err,
            FetchError::AllInstancesExhausted {
                category: Category::Video
            }
        );
        assert_eq!(good_hits.load(Ordering::SeqCst), 0);
    }

    /// The async wrapper must hand back exactly what the blocking loop found.
    #[tokio::test]
    async fn async_fetch_round_trips_through_blocking_pool() -> anyhow::Result<()> {
        let (good, _) = mock_instance("HTTP/1.1 200 OK", r#"{"videoId":"zzz"}"#);
        let registry = registry_for("video", &[&good]);
        let client = FailoverClient::new(registry, &test_settings());

        let body = client.fetch(Category::Video, "/videos/zzz").await?;
        assert_eq!(body, r#"{"videoId":"zzz"}"#);
        Ok(())
    }

    #[tokio::test]
    async fn fetch_url_returns_raw_body() -> anyhow::Result<()> {
        let (upstream, _) = mock_instance("HTTP/1.1 200 OK", "window.google.ac.h([\"q\",[]])");
        let body = FailoverClient::new(InstanceRegistry::with_defaults(), &test_settings())
            .fetch_url(&format!("{upstream}complete/search"))
            .await?;
        assert_eq!(body, "window.google.ac.h([\"q\",[]])");
        Ok(())
    }

    #[test]
    fn user_agent_looks_like_desktop_chrome() {
        let ua = random_chrome_user_agent();
        assert!(ua.starts_with("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
        assert!(ua.contains("Chrome/"));
        assert!(ua.ends_with("Safari/537.36"));
    }
}
