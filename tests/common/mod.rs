#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::time::Duration;

use forked_daapd_client::{Client, ConnectionConfig};
use httpmock::MockServer;

pub const PASSWORD: &str = "secret";
/// `admin:secret`
pub const BASIC_AUTH: &str = "Basic YWRtaW46c2VjcmV0";

pub const TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection settings pointing at a mock server, without credentials.
pub fn config(server: &MockServer) -> ConnectionConfig {
    ConnectionConfig::builder()
        .host(server.host())
        .port(server.port())
        .timeout(TEST_TIMEOUT)
        .build()
        .unwrap()
}

/// Connection settings pointing at a mock server, authenticating as `admin`.
pub fn authenticated_config(server: &MockServer) -> ConnectionConfig {
    ConnectionConfig::builder()
        .host(server.host())
        .port(server.port())
        .password(PASSWORD)
        .timeout(TEST_TIMEOUT)
        .build()
        .unwrap()
}

pub fn client(server: &MockServer) -> Client {
    Client::new(config(server)).unwrap()
}

/// A local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
