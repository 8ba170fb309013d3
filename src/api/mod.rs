//! HTTP serving layer
//!
//! Serves the rendered RSS feeds, the raw episode files, a manual resync
//! trigger, and read/replace access to the live configuration. Feed and
//! episode routes are read-only; configuration replacement goes through the
//! recorder's atomic refresh so a bad upload never disturbs the running
//! schedule.
//!
//! Routes:
//! - `GET /rss.xml` default feed
//! - `GET /:path/rss.xml` one program feed (`/all/rss.xml` for everything)
//! - `GET /blanket/:path/rss.xml` one station's blanket feed
//! - `GET /sync` rebuild all feeds now
//! - `GET /config`, `PUT /config` configuration as YAML (JSON negotiable)
//! - `GET /static/*` episode files
//!
//! With credentials configured, everything except `/static` requires HTTP
//! basic auth; podcast players fetch enclosures without credentials.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::podcast::Podcaster;
use crate::recorder::Recorder;

/// HTTP basic auth credentials for the API routes
#[derive(Clone, Debug)]
pub struct BasicAuth {
    /// Expected username
    pub username: String,
    /// Expected password
    pub password: String,
}

struct AppState {
    recorder: Arc<Recorder>,
    podcaster: Arc<Podcaster>,
}

/// Build the full application router
///
/// `auth` guards every route except the episode files under `/static`.
pub fn router(
    recorder: Arc<Recorder>,
    podcaster: Arc<Podcaster>,
    auth: Option<BasicAuth>,
) -> Router {
    let static_dir = recorder.target_dir().to_path_buf();
    let state = Arc::new(AppState {
        recorder,
        podcaster,
    });

    let mut api = Router::new()
        .route("/rss.xml", get(default_feed))
        .route("/:path/rss.xml", get(program_feed))
        .route("/blanket/:path/rss.xml", get(blanket_feed))
        .route("/sync", get(sync_feeds))
        .route("/config", get(get_config).put(put_config))
        .with_state(state);
    if let Some(auth) = auth {
        api = api.layer(ValidateRequestHeaderLayer::basic(
            &auth.username,
            &auth.password,
        ));
    }

    Router::new()
        .merge(api)
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until interrupted
///
/// Shuts down gracefully on ctrl-c; in-flight requests complete first.
pub async fn serve(router: Router, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    } else {
        tracing::info!("shutdown signal received");
    }
}

async fn default_feed(State(state): State<Arc<AppState>>) -> Response {
    feed_response(&state, "")
}

async fn program_feed(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    feed_response(&state, &path)
}

async fn blanket_feed(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    feed_response(&state, &format!("blanket/{path}"))
}

fn feed_response(state: &AppState, path: &str) -> Response {
    match state.podcaster.feed(path) {
        Some(document) => (
            [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
            document,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "no such feed\n").into_response(),
    }
}

async fn sync_feeds(State(state): State<Arc<AppState>>) -> Response {
    let podcaster = state.podcaster.clone();
    match tokio::task::spawn_blocking(move || podcaster.sync()).await {
        Ok(Ok(stats)) => axum::Json(stats).into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("sync task failed: {e}\n"),
        )
            .into_response(),
    }
}

async fn get_config(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let config = state.recorder.config().await;
    render_config(&config, wants_json(&headers))
}

async fn put_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let parsed = if is_json_body(&headers) {
        serde_json::from_str::<Config>(&body).map_err(Error::from)
    } else {
        Config::from_yaml(&body)
    };
    let config = match parsed {
        Ok(config) => config,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid config: {e}\n")).into_response();
        }
    };

    match state.recorder.refresh_config_persist(config).await {
        Ok(applied) => render_config(&applied, wants_json(&headers)),
        Err(e) => error_response(&e),
    }
}

fn render_config(config: &Config, as_json: bool) -> Response {
    if as_json {
        return axum::Json(config).into_response();
    }
    match serde_yaml::to_string(config) {
        Ok(yaml) => ([(header::CONTENT_TYPE, "application/yaml")], yaml).into_response(),
        Err(e) => error_response(&Error::from(e)),
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

fn is_json_body(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"))
}

/// Map domain errors onto HTTP statuses
///
/// Invalid input (config, cron) is the caller's fault; everything else is a
/// server-side failure.
fn error_response(error: &Error) -> Response {
    let status = match error {
        Error::Config { .. } | Error::Cron { .. } => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, format!("{error}\n")).into_response()
}
