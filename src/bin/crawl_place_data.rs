// src/bin/crawl_place_data.rs
//
// Crawl pass: submits batched crawl runs for tracking rows the autocomplete
// pass could not resolve, then applies the crawled documents back. Run
// lifecycle events are pulled from the crawl service's event feed and fed
// into the in-process channel the coordinator listens on.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use reconcile_lib::clients::crawl::CrawlClient;
use reconcile_lib::coordinator::CrawlEvent;
use reconcile_lib::db;
use reconcile_lib::workers::crawl_places;
use reconcile_lib::{AppConfig, PassOutcome};

const EVENT_FEED_INTERVAL: Duration = Duration::from_secs(15);
const EVENT_FEED_WINDOW: u32 = 50;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    info!("Starting place crawl pass");
    let start_time = Instant::now();

    load_env_files();

    let pool = db::connect()
        .await
        .context("Failed to connect to database")?;
    info!("Successfully connected to the database");

    let config = AppConfig::from_env();
    let cancel = spawn_shutdown_watch();

    let (event_tx, event_rx) = mpsc::channel::<CrawlEvent>(100);
    let feed = spawn_event_feed(Arc::new(CrawlClient::new(&config)), event_tx);

    let outcome = crawl_places::run(&pool, &config, event_rx, cancel).await?;
    feed.abort();

    info!(
        "Crawl pass finished in {:.2?} ({:?})",
        start_time.elapsed(),
        outcome
    );
    if outcome == PassOutcome::CompletedWithErrors {
        warn!("Some records failed, see the summary above");
    }
    Ok(())
}

/// Polls the crawl service's event feed and forwards run events into the
/// coordinator's channel. The feed is a buffered window, so re-reading it is
/// safe; the tracker drops duplicates. Stops once the receiver is gone.
fn spawn_event_feed(client: Arc<CrawlClient>, tx: mpsc::Sender<CrawlEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match client.get_run_events(EVENT_FEED_WINDOW).await {
                Ok(events) => {
                    for msg in events {
                        let data = msg.event_data.unwrap_or_default();
                        let event = CrawlEvent {
                            event_type: msg.event_type,
                            task_id: data.actor_task_id,
                            run_id: data.actor_run_id,
                        };
                        if tx.send(event).await.is_err() {
                            debug!("Event channel closed, stopping the feed");
                            return;
                        }
                    }
                }
                Err(e) => warn!("Crawl event feed poll failed: {}", e),
            }
            tokio::time::sleep(EVENT_FEED_INTERVAL).await;
        }
    })
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
