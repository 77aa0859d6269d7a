// src/bin/add_gg_data.rs
//
// Google enrichment: refreshes party images and ratings from stored crawl
// documents for every POI carrying a google place id.

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;
use std::time::Instant;
use tokio::sync::watch;

use reconcile_lib::db;
use reconcile_lib::workers::add_gg_data;
use reconcile_lib::{AppConfig, PassOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    info!("Starting google enrichment pass");
    let start_time = Instant::now();

    load_env_files();

    let pool = db::connect()
        .await
        .context("Failed to connect to database")?;
    info!("Successfully connected to the database");

    let config = AppConfig::from_env();
    let cancel = spawn_shutdown_watch();

    let outcome = add_gg_data::run(&pool, &config, cancel).await?;
    info!(
        "Google enrichment finished in {:.2?} ({:?})",
        start_time.elapsed(),
        outcome
    );
    if outcome == PassOutcome::CompletedWithErrors {
        warn!("Some records failed, see the summary above");
    }
    Ok(())
}

fn load_env_files() {
    let env_paths = [".env", ".env.local", "../.env"];
    let mut loaded_env = false;
    for path in env_paths.iter() {
        if Path::new(path).exists() {
            if let Err(e) = db::load_env_from_file(path) {
                warn!("Failed to load environment from {}: {}", path, e);
            } else {
                info!("Loaded environment variables from {}", path);
                loaded_env = true;
                break;
            }
        }
    }
    if !loaded_env {
        info!("No .env file found, using environment variables from system");
    }
}

/// Flips to `true` on the first Ctrl-C; sweeps check it between pages.
fn spawn_shutdown_watch() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested, finishing the current page");
            let _ = tx.send(true);
        }
    });
    rx
}
