//! Probes a forked-daapd server, then follows its push notifications.
//!
//! Every notification is answered by re-fetching the affected resource, and a lost
//! connection is re-opened from the disconnect handler.
//!
//! Run with tracing enabled:
//! ```sh
//! DAAPD_HOST=192.168.1.20 DAAPD_PASSWORD=secret RUST_LOG=info \
//!     cargo run --example subscribe --features ws,tracing
//! ```

use std::sync::Arc;
use std::time::Duration;

use forked_daapd_client::params::Params;
use forked_daapd_client::ws::{self, DisconnectReason, EventType, NotificationParser, Subscriber};
use forked_daapd_client::{Client, ConnectionConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = std::env::var("DAAPD_HOST").unwrap_or_else(|_| "localhost".to_owned());
    let password = std::env::var("DAAPD_PASSWORD").ok();

    let connection = ConnectionConfig::builder()
        .host(host)
        .maybe_password(password)
        .build()?;
    let client = Client::new(connection.clone())?;

    let identity = client.test_connection().await?;
    info!(
        machine_name = %identity.machine_name,
        version = ?identity.version,
        websocket_port = ?identity.websocket_port,
        "connected"
    );
    let Some(port) = identity.websocket_port else {
        warn!("server has its notification socket disabled");
        return Ok(());
    };

    let mut config = ws::Config::default().with_port(Some(port));
    config.event_types = vec![EventType::Player, EventType::Queue, EventType::Volume];
    let subscriber = Subscriber::new(&connection, config, NotificationParser)?;

    let reconnecting = subscriber.clone();
    let handler = Arc::new(move |reason: DisconnectReason| {
        warn!(%reason, "notification socket lost, reconnecting");
        let subscriber = reconnecting.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            subscriber.start();
        });
    });
    subscriber.set_disconnect_handler(&handler);

    let mut notifications = subscriber.subscribe();
    subscriber.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = notifications.recv() => match received {
                Ok(notification) => {
                    if notification.contains(EventType::Player) {
                        let player = client.get("api/player", &Params::new()).await?;
                        info!(state = %player["state"], item = %player["item_id"], "player");
                    }
                    if notification.contains(EventType::Volume) {
                        let player = client.get("api/player", &Params::new()).await?;
                        info!(volume = %player["volume"], "volume");
                    }
                    if notification.contains(EventType::Queue) {
                        let queue = client.get("api/queue", &Params::new()).await?;
                        info!(count = %queue["count"], "queue");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "listener lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    subscriber.clear_disconnect_handler();
    let state = subscriber.stop().await;
    info!(%state, "stopped");

    Ok(())
}
