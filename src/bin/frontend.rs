#![forbid(unsafe_code)]

//! JSON API over the mirror pool.
//!
//! Routes stay deliberately thin: each handler decodes its parameters, calls
//! one accessor and wraps the result. Anything with actual logic lives in the
//! library so it can be tested without a running server.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use mirrorview::accessors::MirrorApi;
use mirrorview::config::{RuntimeOverrides, resolve_runtime_settings};
use mirrorview::fetch::FetchError;
use mirrorview::registry::InstanceRegistry;
use serde::Deserialize;
use serde_json::json;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct FrontendArgs {
    host: Option<String>,
    port: Option<u16>,
    instances_file: Option<PathBuf>,
    env_path: Option<PathBuf>,
}

impl FrontendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut host: Option<String> = None;
        let mut port: Option<u16> = None;
        let mut instances_file: Option<PathBuf> = None;
        let mut env_path: Option<PathBuf> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--host=") {
                host = Some(value.to_string());
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--instances=") {
                instances_file = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env=") {
                env_path = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--host" => {
                    let value = args.next().ok_or_else(|| anyhow!("--host requires a value"))?;
                    host = Some(value);
                }
                "--port" => {
                    let value = args.next().ok_or_else(|| anyhow!("--port requires a value"))?;
                    port = Some(parse_port_arg(&value)?);
                }
                "--instances" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--instances requires a value"))?;
                    instances_file = Some(PathBuf::from(value));
                }
                "--env" => {
                    let value = args.next().ok_or_else(|| anyhow!("--env requires a value"))?;
                    env_path = Some(PathBuf::from(value));
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }
        Ok(Self {
            host,
            port,
            instances_file,
            env_path,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/MIRRORVIEW_HOST")
}

#[derive(Clone)]
struct AppState {
    api: MirrorApi,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Maps an accessor failure onto a status. Upstream trouble, whether
    /// exhaustion or a malformed payload, reads as a bad gateway; everything
    /// else is our fault.
    fn from_accessor(err: anyhow::Error) -> Self {
        let status = if err.downcast_ref::<FetchError>().is_some() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let Ok(value) = "application/json".parse() {
            headers.insert(header::CONTENT_TYPE, value);
        }
        let body = json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = FrontendArgs::parse()?;
    let settings = resolve_runtime_settings(RuntimeOverrides {
        instances_file: args.instances_file,
        host: args.host,
        port: args.port,
        env_path: args.env_path,
    })?;
    let host = parse_host_arg(&settings.host)?;

    let registry = match &settings.instances_file {
        Some(path) => InstanceRegistry::from_file(path)?,
        None => InstanceRegistry::with_defaults(),
    };
    let state = AppState {
        api: MirrorApi::new(registry, &settings),
    };

    let app = Router::new()
        .route("/api/video/{id}", get(get_video))
        .route("/api/search", get(get_search))
        .route("/api/trending", get(get_trending))
        .route("/api/channel/{id}", get(get_channel))
        .route("/api/playlist/{id}", get(get_playlist))
        .route("/api/comments/{id}", get(get_comments))
        .route("/api/suggest", get(get_suggest))
        .with_state(state);

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, "frontend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running frontend server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Graceful shutdown is best effort; the process still dies on Ctrl+C even
    // if installing the handler failed.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let (detail, recommended) = state
        .api
        .get_video(&id)
        .await
        .map_err(ApiError::from_accessor)?;
    Ok(Json(json!({
        "detail": detail,
        "recommended": recommended,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    page: Option<u32>,
}

async fn get_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Response> {
    let query = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing query parameter 'q'"))?;
    let items = state
        .api
        .get_search(&query, params.page.unwrap_or(1))
        .await
        .map_err(ApiError::from_accessor)?;
    Ok(Json(items).into_response())
}

#[derive(Debug, Deserialize)]
struct TrendingParams {
    region: Option<String>,
}

async fn get_trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> ApiResult<Response> {
    let region = params.region.unwrap_or_else(|| "JP".to_string());
    let items = state
        .api
        .get_trending(&region)
        .await
        .map_err(ApiError::from_accessor)?;
    Ok(Json(items).into_response())
}

async fn get_channel(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    // Channel lookups never fail; at worst the body is all placeholders.
    let (videos, channel) = state.api.get_channel(&id).await;
    Json(json!({
        "videos": videos,
        "channel": channel,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct PlaylistParams {
    page: Option<u32>,
}

async fn get_playlist(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(params): Query<PlaylistParams>,
) -> ApiResult<Response> {
    let items = state
        .api
        .get_playlist(&id, params.page.unwrap_or(1))
        .await
        .map_err(ApiError::from_accessor)?;
    Ok(Json(items).into_response())
}

async fn get_comments(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let comments = state
        .api
        .get_comments(&id)
        .await
        .map_err(ApiError::from_accessor)?;
    Ok(Json(comments).into_response())
}

#[derive(Debug, Deserialize)]
struct SuggestParams {
    keyword: Option<String>,
}

async fn get_suggest(
    State(state): State<AppState>,
    Query(params): Query<SuggestParams>,
) -> ApiResult<Response> {
    let keyword = params
        .keyword
        .filter(|keyword| !keyword.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing query parameter 'keyword'"))?;
    let suggestions = state
        .api
        .get_suggestions(&keyword)
        .await
        .map_err(ApiError::from_accessor)?;
    Ok(Json(suggestions).into_response())
}
