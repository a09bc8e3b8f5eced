mod server;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use sharecast_core::{config::load_config, logging, RelayClient};
use sharecast_hub::{
    InMemoryPresenceStore, InMemorySnapshotStore, LocalChannelRegistry, StreamBroadcaster,
    StreamPoller,
};
use sharecast_proxy::SignalingProxy;

use server::{ShareCastServer, Services};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = load_config();

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Sharecast gateway starting...");
    info!("HTTP address: {}", config.http_address());
    info!("Relay API: {}", config.relay.api_url);

    // 4. Relay client
    let relay = Arc::new(RelayClient::new(&config.relay)?);

    // 5. In-memory stores and fan-out
    let presence = Arc::new(InMemoryPresenceStore::new(config.presence.ttl()));
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let registry = Arc::new(LocalChannelRegistry::with_capacity(
        config.streams.channel_capacity,
    ));
    let broadcaster = Arc::new(StreamBroadcaster::new(registry, snapshots.clone()));
    info!(
        "Presence TTL: {:?}, poll interval: {:?}, heartbeat interval: {:?}",
        config.presence.ttl(),
        config.streams.poll_interval(),
        config.streams.heartbeat_interval()
    );

    // 6. Stream poller
    let poller = Arc::new(StreamPoller::new(
        relay.clone(),
        snapshots,
        broadcaster.clone(),
    ));

    let services = Services {
        presence,
        broadcaster,
        poller,
        proxy: SignalingProxy::new(relay),
    };

    // 7. Start everything and wait for shutdown
    ShareCastServer::new(config, services).start().await
}
