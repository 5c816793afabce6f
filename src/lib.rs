#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod config;
pub mod error;
pub mod params;
pub mod probe;
pub mod resolver;
pub(crate) mod serde_helpers;
#[cfg(feature = "ws")]
pub mod ws;

use reqwest::Request;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use crate::client::Client;
pub use crate::config::ConnectionConfig;
use crate::error::Error;
pub use crate::probe::{ServerIdentity, test_connection};

pub type Result<T> = std::result::Result<T, Error>;

/// Sends `request` and decodes the JSON answer.
///
/// - Transport failures become [`error::Kind::Transport`], with timeouts flagged as
///   [`error::TransportKind::TimedOut`].
/// - Non-2xx answers become [`error::Kind::Status`] carrying the status and body.
/// - An empty 2xx body decodes as JSON `null`; any other body that is not JSON, or
///   does not fit `Response`, is [`error::Kind::MalformedResponse`].
///
/// Nothing is retried here.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    request: Request,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await.map_err(Error::transport)?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let body = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            body = %body,
            "API request failed"
        );

        return Err(Error::status(status_code, method, path, body));
    }

    let bytes = response.bytes().await.map_err(Error::transport)?;
    let value = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes).map_err(|e| {
            #[cfg(feature = "tracing")]
            tracing::warn!(method = %method, path = %path, error = %e, "response is not JSON");
            Error::malformed(format!("{method} {path} returned a non-JSON body: {e}"))
        })?
    };

    serde_helpers::deserialize_with_warnings(value)
}
