//! Ridepool - SMS ride-matching service
//!
//! Main entry point: runs either the inbound webhook server or the
//! queue-driven match worker.

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ridepool::cli::{Cli, Commands};
use ridepool::config::Config;
use ridepool::geo::{Geocoder, HttpGeocoder};
use ridepool::grid::{GridClient, GridStore};
use ridepool::matching::{MatchCoordinator, MatchWorker};
use ridepool::notify::NotificationDispatcher;
use ridepool::queue::{CompletionQueue, HttpQueueClient, MessageHandler, QueueConsumer};
use ridepool::session::ConversationEngine;
use ridepool::sms::{HttpSmsClient, SmsTransport};
use ridepool::webhook::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse_args();
    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Commands::Serve => {
            tracing::info!("starting webhook server");
            run_serve(config).await
        }
        Commands::MatchWorker => {
            tracing::info!("starting match worker");
            run_match_worker(config).await
        }
    }
}

async fn run_serve(config: Config) -> Result<()> {
    let store = Arc::new(GridClient::new(config.grid.clone())?) as Arc<dyn GridStore>;
    let queue = Arc::new(HttpQueueClient::new(config.queue.clone())?) as Arc<dyn CompletionQueue>;
    let engine = ConversationEngine::new(store, queue, config.grid.sessions_grid_id.clone());

    let state = Arc::new(AppState {
        engine,
        auth_token: config.sms.auth_token.clone(),
        public_url: config.server.public_url.clone(),
    });
    webhook::serve(state, &config.server.bind_addr).await
}

async fn run_match_worker(config: Config) -> Result<()> {
    let store = Arc::new(GridClient::new(config.grid.clone())?) as Arc<dyn GridStore>;
    let geocoder = Arc::new(HttpGeocoder::new(config.geocoder.clone())?) as Arc<dyn Geocoder>;
    let sms = Arc::new(HttpSmsClient::new(config.sms.clone())?) as Arc<dyn SmsTransport>;

    let coordinator = MatchCoordinator::new(
        store,
        geocoder,
        NotificationDispatcher::new(sms),
        config.grid.rides_grid_id.clone(),
        config.matching.expiry_minutes,
    );
    let handler = Arc::new(MatchWorker::new(coordinator)) as Arc<dyn MessageHandler>;

    let consumer = QueueConsumer::new(HttpQueueClient::new(config.queue.clone())?, &config.queue);

    let running = consumer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            running.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    });

    consumer.run(handler).await
}

/// Initialize tracing subscriber with environment filter
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ridepool=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
