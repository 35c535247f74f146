use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use peerlink_server::config::BrokerConfig;
use peerlink_server::relay::BrokerState;
use peerlink_server::routing;
use peerlink_shared::unix_now_ms;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("peerlink_server=debug".parse()?)
                .add_directive("axum=info".parse()?),
        )
        .init();

    info!("Starting peerlink broker");

    let config = BrokerConfig::from_env()?;
    info!("Configuration loaded");

    let state = Arc::new(BrokerState::new(config.clone()));

    // Periodic expiry sweep: evict rooms, close their live sessions, prune
    // both rate-limit stores.
    {
        let state = Arc::clone(&state);
        let interval_ms = config.cleanup_interval_ms;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;
                let now = unix_now_ms();
                let evicted = state.rooms.cleanup_expired(now);
                for room_id in &evicted {
                    state
                        .close_room_sessions(room_id, "ROOM_EXPIRED", "room lifetime is over")
                        .await;
                }
                if !evicted.is_empty() {
                    info!("expiry sweep evicted {} room(s)", evicted.len());
                }
                state.rest_limiter.prune(now);
                state.ws_limiter.prune(now);
            }
        });
        info!("Expiry sweep started (every {}ms)", config.cleanup_interval_ms);
    }

    let app = routing::create_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received, draining sessions...");
    };

    info!("Broker listening on http://{}", addr);
    info!("Message endpoint: ws://{}/v1/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    state.close_all_sessions().await;
    if state.rooms.room_count() > 0 {
        warn!("{} room(s) still open at shutdown", state.rooms.room_count());
    }

    info!("Broker stopped cleanly");
    Ok(())
}
