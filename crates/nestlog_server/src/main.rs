//! The nestlogd binary.

use anyhow::Context;
use nestlog_server::{app, AppState, ServerConfig};
use nestlog_store::RecordStore;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nestlog_server=info,nestlog_store=info,tower_http=info".into());

    // JSON logs by default; LOG_FORMAT=text for local reading.
    if std::env::var("LOG_FORMAT").as_deref() == Ok("text") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env();
    let store =
        Arc::new(RecordStore::open(&config.db_path).context("failed to open database")?);

    if let (Some(user), Some(password)) = (&config.admin_user, &config.admin_password) {
        store
            .ensure_admin(user, password)
            .context("failed to seed operator account")?;
    }

    let state = AppState::new(store);
    let router = app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), %addr, "nestlogd listening");

    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
