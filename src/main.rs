use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::Duration;

use dropwatch::models::settings::Settings;
use dropwatch::services::catalog_watchdog::CatalogWatchdog;
use dropwatch::services::diagnostic_logger;
use dropwatch::services::drops_auth_service::DropsAuthService;
use dropwatch::services::drops_service::GqlDropsClient;
use dropwatch::services::drops_websocket_service::DropsWebSocketService;
use dropwatch::services::mining_service::MiningService;
use dropwatch::services::progress_renderer::ConsoleRenderer;
use dropwatch::services::session_driver::HeartbeatSessionDriver;

/// Load settings from the config directory, falling back to defaults.
fn load_settings() -> Settings {
    let path = match DropsAuthService::app_config_dir() {
        Ok(dir) => dir.join("settings.json"),
        Err(e) => {
            warn!("Could not resolve config directory, using default settings: {}", e);
            return Settings::default();
        }
    };

    Settings::load_from_file(&path).unwrap_or_else(|e| {
        warn!("{:#}, using default settings", e);
        Settings::default()
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostic_logger::init_logging();

    let settings = load_settings();
    let token = DropsAuthService::get_token(&settings).context("No Twitch token available")?;

    let client = Arc::new(GqlDropsClient::new(token.clone()));
    let user_id = client
        .user_id()
        .await
        .context("Failed to validate Twitch token")?;
    info!("🔑 Logged in as user {}", user_id);

    let events = Arc::new(DropsWebSocketService::new());
    events.connect(&user_id, &token)?;

    let driver = Arc::new(HeartbeatSessionDriver::new(
        client.clone(),
        settings.drops.clone(),
    ));

    let miner = Arc::new(MiningService::new(
        client.clone(),
        driver,
        Arc::new(ConsoleRenderer::new()),
        events,
        settings.drops.clone(),
    ));

    let watchdog = CatalogWatchdog::new(client, settings.drops.catalog_poll_interval())
        .start(miner.clone());
    let mut scheduler = tokio::spawn(miner.clone().run());

    let scheduler_exited = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("🛑 Shutting down...");
            false
        }
        _ = &mut scheduler => {
            warn!("Scheduler exited unexpectedly");
            true
        }
    };

    watchdog.abort();
    miner.stop().await;
    // A session notices the stop within one poll interval
    let grace = settings.drops.poll_interval() * 5;
    if !scheduler_exited
        && tokio::time::timeout(grace.max(Duration::from_secs(5)), &mut scheduler)
            .await
            .is_err()
    {
        scheduler.abort();
    }

    let claimed = miner.claimed_drops().await;
    info!("🎁 Claimed {} drops this run", claimed.len());
    for claim in claimed {
        info!("  - {} ({})", claim.drop_name, claim.claimed_at.format("%H:%M:%S"));
    }
    Ok(())
}
