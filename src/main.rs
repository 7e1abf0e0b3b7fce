use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use social_publisher::config::Config;
use social_publisher::crypto::CryptoEngine;
use social_publisher::store::{self, ConnectionStore, MemoryConnectionStore, PgConnectionStore};
use social_publisher::{api, AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "social_publisher=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("social-publisher v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.hmac_secret)?);

    let store: Arc<dyn ConnectionStore> = match &config.database_url {
        Some(url) => {
            let pg = PgConnectionStore::new(url, crypto.clone()).await?;
            pg.migrate().await?;
            info!("Database connected and migrated");
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set; connections are kept in memory and lost on restart");
            Arc::new(MemoryConnectionStore::new())
        }
    };

    let state: SharedState = Arc::new(AppState::new(config.clone(), crypto, store.clone())?);
    info!(
        platforms = ?state.registry.list(),
        "Registered {} social platforms",
        state.registry.count()
    );
    if state.registry.count() == 0 {
        warn!("No platform credentials configured; connect and publish will fail");
    }

    tokio::spawn(store::refresh_daemon(
        store,
        state.refresher.clone(),
        config.refresh_interval,
    ));

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready");
    axum::serve(listener, app).await?;

    Ok(())
}
