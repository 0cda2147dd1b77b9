//! Feed client binary entrypoint.
//! Loads config, starts the feed controller with its auto-refresh ticker, and
//! serves the local snapshot/trigger API plus `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tweet_feed::api::{self, AppState};
use tweet_feed::source::http::HttpFeedSource;
use tweet_feed::telemetry::Metrics;
use tweet_feed::triggers::spawn_refresh_ticker;
use tweet_feed::{FeedConfig, FeedController, FeedTriggers, Session};

const ENV_SESSION_TOKEN: &str = "FEED_SESSION_TOKEN";
const ENV_BIND: &str = "FEED_BIND";
const ENV_LOG_JSON: &str = "FEED_LOG_JSON";

/// Compact logs by default, JSON lines when FEED_LOG_JSON=1.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tweet_feed=info,feed=info,warn"));

    let json = std::env::var(ENV_LOG_JSON).is_ok_and(|v| v == "1");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = FeedConfig::load_default().context("loading feed config")?;
    tracing::info!(
        base_url = %cfg.base_url,
        strategy = ?cfg.strategy,
        page_size = cfg.page_size,
        "feed config loaded"
    );

    let metrics = Metrics::init(&cfg)?;
    let source = HttpFeedSource::from_config(&cfg).context("building http client")?;
    let controller = Arc::new(FeedController::from_config(Arc::new(source), &cfg));
    let triggers = FeedTriggers::new(controller.clone());

    let session = Session::new(std::env::var(ENV_SESSION_TOKEN).unwrap_or_default());
    if session.is_empty() {
        tracing::warn!("{ENV_SESSION_TOKEN} not set; feed calls will report auth_required");
    }

    if let Err(e) = controller.load_initial(&session).await {
        tracing::warn!(error = %e, kind = e.kind().as_str(), "initial load failed");
    }

    if cfg.refresh_interval_secs > 0 {
        spawn_refresh_ticker(
            triggers.clone(),
            session.clone(),
            Duration::from_secs(cfg.refresh_interval_secs),
        );
    }

    let app = api::router(AppState { triggers, session }).merge(metrics.router());

    let addr: SocketAddr = std::env::var(ENV_BIND)
        .unwrap_or_else(|_| "127.0.0.1:8088".to_string())
        .parse()
        .with_context(|| format!("{ENV_BIND} must be host:port"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "feed api listening");
    axum::serve(listener, app).await.context("serving feed api")?;
    Ok(())
}
