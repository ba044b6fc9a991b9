// src/main.rs

use color_eyre::eyre::{Result, WrapErr};
use tracing::{info, warn};

mod app;
mod config;
mod core;
mod logging;
mod server;

use app::AppState;
use config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Setup ---
    color_eyre::install()?;
    let settings = Settings::from_env();
    logging::initialize_logging(&settings)?;

    // Environment problems are only reportable once logging is up.
    for warning in &settings.warnings {
        warn!(%warning, "Ignoring invalid setting.");
    }
    info!(
        app_name = %settings.app_name,
        bind = %settings.bind_addr,
        deadline_secs = settings.analysis_deadline.as_secs(),
        geoip = ?settings.geoip_database,
        "Starting up."
    );

    // --- Serve ---
    let bind_addr = settings.bind_addr.clone();
    server::serve(AppState::new(settings))
        .await
        .wrap_err_with(|| format!("server on {} stopped unexpectedly", bind_addr))?;

    Ok(())
}
