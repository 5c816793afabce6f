//! Connection probing: one request that checks reachability, credentials and that the
//! server really is forked-daapd.

use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::client::Client;
use crate::config::ConnectionConfig;
use crate::error::{Authentication, Error, Kind, Status};
use crate::params::Params;
use crate::Result;

/// Endpoint whose answer identifies the daemon.
pub const CONFIG_ENDPOINT: &str = "api/config";

/// What a successful probe learned about the server.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct ServerIdentity {
    /// The library name the daemon reports (`library_name`).
    pub machine_name: String,
    /// Daemon version, when reported.
    pub version: Option<String>,
    /// Port of the notification WebSocket; `None` when the daemon has it disabled.
    pub websocket_port: Option<u16>,
    /// The full `api/config` payload.
    pub raw: Value,
}

impl ServerIdentity {
    /// Extracts the identity from an `api/config` payload.
    pub fn from_payload(raw: Value) -> Result<Self> {
        let machine_name = raw
            .get("library_name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::protocol_mismatch("response has no `library_name` field"))?
            .to_owned();
        let version = raw
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let websocket_port = raw
            .get("websocket_port")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port != 0);

        Ok(Self {
            machine_name,
            version,
            websocket_port,
            raw,
        })
    }

    #[must_use]
    pub fn websocket_enabled(&self) -> bool {
        self.websocket_port.is_some()
    }
}

/// Checks that the daemon described by `config` is reachable, accepts the configured
/// credentials, and speaks the expected API.
///
/// Failures are classified by [`Error::kind`]:
///
/// | Kind | Cause |
/// |------|-------|
/// | [`Kind::Unreachable`] | DNS failure, refused connection, timeout |
/// | [`Kind::Authentication`] | `401` or `403` |
/// | [`Kind::ProtocolMismatch`] | any other status, a non-JSON body, or no `library_name` |
///
/// The probe holds no state and can be called repeatedly and concurrently.
///
/// # Example
///
/// ```no_run
/// use forked_daapd_client::{ConnectionConfig, test_connection};
/// use forked_daapd_client::error::Kind;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConnectionConfig::builder().host("192.168.1.20").build()?;
///
/// match test_connection(&config).await {
///     Ok(identity) => println!("connected to {}", identity.machine_name),
///     Err(e) if e.kind() == Kind::Authentication => println!("wrong password"),
///     Err(e) => println!("cannot use server: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
pub async fn test_connection(config: &ConnectionConfig) -> Result<ServerIdentity> {
    let client = Client::new(config.clone())?;
    probe(&client).await
}

pub(crate) async fn probe(client: &Client) -> Result<ServerIdentity> {
    let payload = client
        .request_as::<Value>(Method::GET, CONFIG_ENDPOINT, &Params::new())
        .await
        .map_err(classify)?;

    let identity = ServerIdentity::from_payload(payload)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        machine_name = %identity.machine_name,
        websocket_port = ?identity.websocket_port,
        "probe succeeded"
    );

    Ok(identity)
}

fn classify(error: Error) -> Error {
    match error.kind() {
        Kind::Transport => error.reclassify(Kind::Unreachable),
        Kind::Status => match error.downcast_ref::<Status>().map(|s| s.status_code) {
            Some(status_code @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)) => {
                Authentication { status_code }.into()
            }
            _ => error.reclassify(Kind::ProtocolMismatch),
        },
        Kind::MalformedResponse => error.reclassify(Kind::ProtocolMismatch),
        _ => error,
    }
}
