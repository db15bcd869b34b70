use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    error::panic_response,
    notify::LineAdminNotifier,
    platform::HttpPlatformClient,
    search::PgPropertySearch,
    store::PgStore,
    types::AppState,
    webhook::{
        facebook_verify, facebook_webhook, health, instagram_verify, instagram_webhook,
        line_webhook,
    },
};

const DEFAULT_LOG_FILTER: &str = "lead_webhook_server=info,tower_http=info";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/line", post(line_webhook))
        .route(
            "/api/webhooks/facebook",
            get(facebook_verify).post(facebook_webhook),
        )
        .route(
            "/api/webhooks/instagram",
            get(instagram_verify).post(instagram_webhook),
        )
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env().context("invalid configuration")?;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("failed to run sqlx migrations")?;

    let platform = Arc::new(
        HttpPlatformClient::new(&config).context("failed to build outbound HTTP client")?,
    );
    let store = Arc::new(PgStore::new(db.clone()));
    let state = Arc::new(AppState {
        leads: store.clone(),
        conversations: store,
        search: Arc::new(PgPropertySearch::new(db)),
        notifier: Arc::new(LineAdminNotifier::new(
            platform.clone(),
            config.line_admin_user_id.clone(),
        )),
        platform,
        config,
    });

    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {addr}"))?;

    info!(
        port = state.config.port,
        meta_signature_required = !state.config.meta_app_secret.is_empty(),
        meta_reply_enabled = state.config.meta_reply_enabled,
        reply_async = state.config.reply_async,
        "lead webhook server listening"
    );
    axum::serve(listener, router(state))
        .await
        .context("server runtime failure")
}
