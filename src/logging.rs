// src/logging.rs

use color_eyre::eyre::Result;
use directories::ProjectDirs;
use lazy_static::lazy_static;
use std::path::PathBuf;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{self, EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Settings;

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase().to_string();
    pub static ref LOG_ENV: String = format!("{}_LOGLEVEL", PROJECT_NAME.clone());
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "osi-lens", env!("CARGO_PKG_NAME"))
}

pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = project_directory() {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

/// `RUST_LOG` wins, then `OSI_LENS_LOGLEVEL`, then the crate default.
fn log_directive(debug: bool) -> String {
    let default_level = if debug { "debug" } else { "info" };
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV.as_str()))
        .unwrap_or_else(|_| format!("{}={},tower_http={}", env!("CARGO_CRATE_NAME"), default_level, default_level))
}

/// Installs the global subscriber: UTC-stamped stdout output, plus a plain
/// log file in the data directory when the settings ask for one.
pub fn initialize_logging(settings: &Settings) -> Result<()> {
    let directive = log_directive(settings.debug);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_filter(EnvFilter::new(&directive));

    let file_layer = if settings.log_to_file {
        let directory = get_data_dir();
        std::fs::create_dir_all(&directory)?;
        let log_file = std::fs::File::create(directory.join(LOG_FILE.as_str()))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_timer(UtcTime::rfc_3339())
                .with_target(false)
                .with_ansi(false)
                .with_filter(EnvFilter::new(&directive)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names_follow_the_crate_name() {
        assert_eq!(PROJECT_NAME.as_str(), "OSI_LENS");
        assert_eq!(LOG_ENV.as_str(), "OSI_LENS_LOGLEVEL");
        assert_eq!(LOG_FILE.as_str(), "osi-lens.log");
    }
}
