#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use super::types::EventType;

const DEFAULT_PATH: &str = "/";
const DEFAULT_PROTOCOL: &str = "notify";
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_STOP_TIMEOUT_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the event subscriber.
///
/// Host, scheme, credentials and the connect timeout come from the shared
/// [`crate::config::ConnectionConfig`]; this only covers the event channel itself.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Port of the notification socket. forked-daapd serves it on its own port, reported
    /// as [`crate::ServerIdentity::websocket_port`]. `None` uses the API port.
    pub port: Option<u16>,
    /// Request path of the socket
    pub path: String,
    /// Subprotocols offered during the upgrade
    pub protocols: Vec<String>,
    /// Event types requested in the `notify` handshake
    pub event_types: Vec<EventType>,
    /// Interval between PING frames; `None` disables the heartbeat
    pub heartbeat_interval: Option<Duration>,
    /// Maximum time to wait for PONG before treating the connection as lost
    pub heartbeat_timeout: Duration,
    /// How long `stop()` waits for the socket to be torn down
    pub stop_timeout: Duration,
    /// Buffered messages per listener before a slow listener starts lagging
    pub channel_capacity: usize,
}

impl Config {
    /// Uses the notification port reported by `Client::test_connection`.
    #[must_use]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            path: DEFAULT_PATH.to_owned(),
            protocols: vec![DEFAULT_PROTOCOL.to_owned()],
            event_types: EventType::ALL.to_vec(),
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL_DURATION),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
            stop_timeout: DEFAULT_STOP_TIMEOUT_DURATION,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
