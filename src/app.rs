use actix_web::web;
use tracing::info;

use crate::domain::error::Result;
use crate::infrastructure::bootstrap::build_store;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::logging;
use crate::interfaces::http::{start_server, HttpState};

/// Load configuration, connect storage and serve HTTP until shutdown.
pub async fn run() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = AppConfig::load()?;
    logging::init(&config.log.filter);
    info!(
        backend = ?config.storage.backend,
        naming = ?config.ingest.naming,
        batch_size = config.ingest.batch_size,
        "starting tabingest"
    );

    let store = build_store(&config.storage).await?;
    let state = web::Data::new(HttpState::new(store, &config));

    start_server(state, &config.server)?.await?;
    info!("server stopped");
    Ok(())
}
