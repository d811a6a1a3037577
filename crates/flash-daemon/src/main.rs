mod config;

use std::sync::Arc;

use tracing::{debug, info, warn};

use flash_db::{MessageStore, RoomSubscription};
use flash_sync::{HttpRemote, SyncCoordinator, run_sync_loop};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashsend_sync=debug,flash_sync=debug,flash_db=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.rooms.is_empty() {
        warn!("FLASH_ROOMS is empty; nothing will be synced");
    }

    let store = MessageStore::open(&config.db_path)?;
    let remote = HttpRemote::new(&config.remote_url)?;
    let coordinator = Arc::new(SyncCoordinator::new(store.clone(), remote));

    // Log what the cache holds as it changes
    let watchers: Vec<_> = config
        .rooms
        .iter()
        .map(|room_id| tokio::spawn(watch_room(store.observe_room(room_id))))
        .collect();

    let sync_task = tokio::spawn(run_sync_loop(
        coordinator,
        config.rooms.clone(),
        config.sync_interval,
    ));

    info!(
        "Syncing {} rooms from {} every {}s into {}",
        config.rooms.len(),
        config.remote_url,
        config.sync_interval.as_secs(),
        config.db_path.display()
    );

    shutdown_signal().await;

    sync_task.abort();
    for watcher in watchers {
        watcher.abort();
    }

    log_room_summaries(&store, config.user_id.as_deref()).await;

    Ok(())
}

async fn log_room_summaries(store: &MessageStore, user_id: Option<&str>) {
    let summaries = match store.room_summaries(user_id.unwrap_or_default()).await {
        Ok(summaries) => summaries,
        Err(e) => {
            warn!("Could not summarize rooms on shutdown: {}", e);
            return;
        }
    };

    for summary in summaries {
        match user_id {
            Some(_) => info!(
                "Room {}: last message at {} ({} unread)",
                summary.room_id, summary.last_message_at, summary.unread_count
            ),
            // Without a user id every message would count as unread
            None => info!("Room {}: last message at {}", summary.room_id, summary.last_message_at),
        }
    }
}

async fn watch_room(mut subscription: RoomSubscription) {
    while let Some(snapshot) = subscription.next().await {
        match snapshot {
            Ok(messages) => debug!(
                "Room {} holds {} cached messages",
                subscription.room_id(),
                messages.len()
            ),
            Err(e) => warn!("Live query for room {} failed: {}", subscription.room_id(), e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Could not install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
