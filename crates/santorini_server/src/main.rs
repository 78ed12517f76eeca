//! Santorini match server binary.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use santorini_server::{
    AppState, Cli, Command, FirstLegalMoveSearch, MatchStore, MemoryMatchStore,
    MoveSubmissionService, ServerConfig, ServiceSettings, SqliteMatchStore, StorageBackend,
    SystemClock, router,
};
use tracing::{info, instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,santorini_server=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            in_memory,
        } => {
            let mut config = match config {
                Some(path) => ServerConfig::from_file(path)?,
                None => ServerConfig::default(),
            };
            if in_memory {
                let path = config.storage().database_path().clone();
                config = config.with_storage(StorageBackend::Memory, path);
            }
            run_server(config.with_bind(host, port)).await
        }
        Command::Migrate { db_path } => {
            SqliteMatchStore::open(db_path)?;
            info!("Database is up to date");
            Ok(())
        }
    }
}

/// Builds the service from `config` and serves it until shutdown.
#[instrument(skip_all, fields(host = %config.host(), port = config.port()))]
async fn run_server(config: ServerConfig) -> Result<()> {
    let store: Arc<dyn MatchStore> = match config.storage().backend() {
        StorageBackend::Sqlite => Arc::new(SqliteMatchStore::open(
            config.storage().database_path().clone(),
        )?),
        StorageBackend::Memory => Arc::new(MemoryMatchStore::new()),
    };

    let mut service = MoveSubmissionService::new(
        store,
        Arc::new(config.token_verifier()),
        Arc::new(SystemClock),
        ServiceSettings::from(&config),
    );
    if *config.automation().enabled() {
        service = service.with_move_search(Arc::new(FirstLegalMoveSearch));
    }

    let app = router(AppState::new(Arc::new(service)));
    let listener = tokio::net::TcpListener::bind((config.host().as_str(), *config.port())).await?;
    info!(tokens = config.tokens().len(), "Server ready at http://{}:{}/", config.host(), config.port());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
