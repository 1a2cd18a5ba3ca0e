use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use case_registry::{CaseRegistry, Dispatcher};
use storage::{ChangeNotifier, SqliteStore, Storage};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod routes;

use app_state::AppState;
use config::{load_settings, prepare_database_url};
use routes::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let backend = SqliteStore::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let storage = Storage::with_backend(
        Arc::new(backend),
        ChangeNotifier::new(settings.event_buffer),
    );

    let registry = CaseRegistry::new(storage);
    registry
        .initialize()
        .await
        .context("failed to initialize case collections")?;

    let state = AppState {
        dispatcher: Dispatcher::new(registry),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, %database_url, "case server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
