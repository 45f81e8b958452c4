use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

mod config;
mod extract;
mod fetch;
mod models;
mod scrape;

use config::Config;
use fetch::BrowserFetcher;
use models::ScrapeParams;
use scrape::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let extractor = config
        .selectors
        .compile()
        .context("invalid scrape selectors")?;

    let state = AppState {
        fetcher: Arc::new(BrowserFetcher::new(config.browser.clone())),
        extractor: Arc::new(extractor),
    };

    let addr = SocketAddr::new(config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);
    tracing::info!(
        webdriver = %config.browser.webdriver_url,
        settle_mode = ?config.browser.settle_mode,
        "browser configured"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/scrape", get(scrape_endpoint))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("shutting down");
}

async fn scrape_endpoint(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Response {
    let url = match ScrapeParams::from_query(query.as_deref()).url {
        Some(url) => url,
        None => return error_response(StatusCode::BAD_REQUEST, "URL parameter is required"),
    };

    match scrape::scrape(&state, &url).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "scrape failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn handle_panic(_: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}
