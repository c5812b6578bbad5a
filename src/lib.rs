pub mod broadcast;
pub mod commands;
pub mod dataset;
pub mod error;
pub mod normalize;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod telegram;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::dataset::source::HttpSource;
use crate::error::ConfigError;
use crate::state::AppState;
use crate::telegram::client::TelegramClient;

/// Channel buffer size for scheduler messages
const SCHEDULER_CHANNEL_SIZE: usize = 32;

/// Load config, wire up the shared state and run the bot until the chat
/// poller exits.
pub async fn run() -> Result<(), ConfigError> {
    let config_path = state::default_config_path();
    let config = state::load_config(config_path.as_deref())?;

    let token = config
        .telegram
        .bot_token
        .clone()
        .ok_or_else(|| ConfigError::Invalid("BOT_TOKEN is not set".to_string()))?;

    let source = Arc::new(HttpSource::new(&config.dataset_url, config.fetch_timeout_secs));
    let client = Arc::new(TelegramClient::new(
        &token,
        Duration::from_secs(config.telegram.delivery_timeout_secs),
    ));
    let state = Arc::new(AppState::new(config, source, client.clone())?);

    log::info!(
        "Pontis starting: dataset cache TTL {}s, {} initial recipient(s)",
        state.config.cache_ttl_secs,
        state.registry.len()
    );

    // Warm the cache so the first query does not pay for the fetch
    let warm = state.cache.get_dataset().await;
    if warm.is_empty_sentinel() {
        log::warn!("Initial dataset load failed; queries will report data unavailable until it succeeds");
    }

    // Create channel for scheduler -> dispatcher communication
    let (scheduler_tx, scheduler_rx) = mpsc::channel(SCHEDULER_CHANNEL_SIZE);

    let scheduler_state = state.clone();
    tokio::spawn(async move {
        let scheduler = scheduler::Scheduler::new(scheduler_state, scheduler_tx);
        scheduler.run().await;
    });

    let dispatcher_state = state.clone();
    tokio::spawn(async move {
        scheduler::run_dispatcher(dispatcher_state, scheduler_rx).await;
    });

    telegram::poller::run_telegram_poller(state, client).await;
    Ok(())
}
