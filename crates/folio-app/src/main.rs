//! Folio application binary - composition root.
//!
//! 1. Resolve configuration (CLI > env > TOML file > defaults)
//! 2. Open the SQLite organization store
//! 3. Resolve or generate the signing secret
//! 4. Start the rate limiter sweep
//! 5. Serve the API until Ctrl-C, then stop the sweep

mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;

use folio_api::rate_limit::spawn_cleanup;
use folio_api::routes;
use folio_api::secret::load_or_generate_secret;
use folio_api::state::AppState;
use folio_core::store::OrgStore;
use folio_storage::{Database, SqliteStore};

use cli::{expand_home, resolve_signing_secret, CliArgs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let (config_file, config) = args.load_config();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Folio v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    config.validate()?;
    if !config.session.secure {
        tracing::warn!("Session cookies are sent without the Secure attribute");
    }

    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("folio.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    let store: Arc<dyn OrgStore> = Arc::new(SqliteStore::new(db));

    let secret = match resolve_signing_secret(config.session.signing_secret.as_deref()) {
        Some(secret) => secret,
        None => load_or_generate_secret(&data_dir.join("signing.key")),
    };

    let addr = format!("{}:{}", config.general.bind, config.general.port);
    let sweep_interval = config.rate_limit.cleanup_interval();
    let state = AppState::new(config, store, &secret);

    let shutdown = Arc::new(Notify::new());
    let sweep = spawn_cleanup(Arc::clone(&state.limiter), sweep_interval, Arc::clone(&shutdown));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind - is another instance running?");
            shutdown.notify_one();
            return Err(e.into());
        }
    };

    let stop = Arc::clone(&shutdown);
    routes::serve(listener, state, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        tracing::info!("Shutdown requested");
        stop.notify_one();
    })
    .await?;

    // Covers the server stopping for reasons other than Ctrl-C.
    shutdown.notify_one();
    if let Err(e) = sweep.await {
        tracing::warn!(error = %e, "Rate limiter sweep task ended abnormally");
    }

    Ok(())
}
