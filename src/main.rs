use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use tubeserve::client::{AuthConfig, YtDlpClient};
use tubeserve::error::ApiError;
use tubeserve::routes::{AppState, router};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tubeserve=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let download_root = std::env::var("DOWNLOAD_ROOT")
        .ok()
        .and_then(|value| non_empty(&value).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("downloads"));

    tokio::fs::create_dir_all(&download_root)
        .await
        .map_err(|error| {
            ApiError::internal(format!("could not create the download root: {error}"))
        })?;

    let auth = AuthConfig {
        use_oauth: read_bool_env("YT_OAUTH").unwrap_or(true),
        cache_dir: std::env::var("YT_OAUTH_CACHE_DIR")
            .ok()
            .and_then(|value| non_empty(&value).map(PathBuf::from)),
    };
    if !auth.use_oauth {
        warn!("YT_OAUTH=false: the video client will run unauthenticated");
    }

    let state = AppState {
        client: Arc::new(YtDlpClient::new(auth)),
        download_root,
        trust_proxy_headers: read_bool_env("TRUST_PROXY_HEADERS").unwrap_or(false),
    };

    let cors = build_cors_layer()?;
    let app = router(state).layer(cors).layer(TraceLayer::new_for_http());

    let addr = resolve_bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("could not bind {addr}: {error}")))?;

    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    "127.0.0.1:8787".to_string()
}

fn build_cors_layer() -> Result<CorsLayer, ApiError> {
    let configured: Vec<String> = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set, allowing any origin");
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any));
    }

    let allowed = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://domain.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;

    info!("CORS allow-list loaded with {} origin(s)", allowed.len());

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin
            .to_str()
            .ok()
            .and_then(normalize_origin)
            .is_some_and(|value| allowed.contains(&value))
    });

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port().filter(|port| *port != default_port) {
        Some(port) => Some(format!("{scheme}://{host}:{port}")),
        None => Some(format!("{scheme}://{host}")),
    }
}

fn read_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
