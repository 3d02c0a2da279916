//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! cargo run -p chat-shard
//! ```
//!
//! Configuration is loaded from environment variables.

use chat_common::{try_init_tracing, try_init_tracing_for, ClientConfig};
use chat_ratelimit::RateLimitCoordinator;
use chat_shard::{DispatchEvent, EventType, ReadyEvent, Shard, ShardConfig, ShardManager};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            if let Err(e) = try_init_tracing() {
                eprintln!("Warning: Failed to initialize tracing: {e}");
            }
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_for(config.app.env) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    info!(
        env = ?config.app.env,
        shard_count = config.gateway.shard_count,
        rate_limit_backend = ?config.rate_limit.backend,
        "Configuration loaded"
    );

    let limiter =
        RateLimitCoordinator::from_settings(&config.rate_limit, config.redis.as_ref()).await?;
    let manager = ShardManager::new(ShardConfig::from(&config), Arc::new(limiter));

    manager.on(
        EventType::Ready,
        |shard: Arc<Shard>, event: Arc<DispatchEvent>| async move {
            match event.decode::<ReadyEvent>() {
                Ok(ready) => info!(
                    shard = shard.index(),
                    session_id = %ready.session_id,
                    "READY received"
                ),
                Err(e) => error!(shard = shard.index(), error = %e, "Undecodable READY"),
            }
        },
    );

    let messages = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&messages);
    manager.on(
        EventType::MessageCreate,
        move |shard: Arc<Shard>, event: Arc<DispatchEvent>| {
            let counter = Arc::clone(&counter);
            async move {
                let total = counter.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    shard = shard.index(),
                    sequence = ?event.sequence,
                    total,
                    "Message received"
                );
            }
        },
    );

    manager.start().await;
    info!("Gateway client running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!(
        messages = messages.load(Ordering::Relaxed),
        latencies = ?manager.latencies(),
        "Shutting down"
    );
    manager.shutdown().await;

    Ok(())
}
