use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, Request};
use secrecy::ExposeSecret as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::config::ConnectionConfig;
use crate::error::Error;
use crate::params::{Params, coerce};
use crate::probe::{self, ServerIdentity};
use crate::{Result, resolver};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Client for the forked-daapd JSON API.
///
/// Every call flows through the same steps: the path is resolved against the
/// [`ConnectionConfig`], parameters are coerced to their wire strings, basic auth is
/// attached when credentials are configured, and the answer is decoded as JSON.
/// Calls share no mutable state, so a `Client` can be cloned and used from any number
/// of tasks at once.
///
/// # Example
///
/// ```no_run
/// use forked_daapd_client::{Client, ConnectionConfig};
/// use forked_daapd_client::params::Params;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConnectionConfig::builder()
///     .host("192.168.1.20")
///     .password("secret")
///     .build()?;
/// let client = Client::new(config)?;
///
/// let playlists = client.get("api/library/playlists", &Params::new()).await?;
/// println!("{playlists}");
///
/// client
///     .put("api/player/shuffle", &Params::new().with("state", true))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    config: ConnectionConfig,
    client: ReqwestClient,
}

impl Client {
    /// Creates a client for the daemon described by `config`.
    ///
    /// The configured timeout bounds every request made through this client.
    pub fn new(config: ConnectionConfig) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("forked_daapd_client"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert("Connection", HeaderValue::from_static("keep-alive"));
        let client = ReqwestClient::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Resolves `path_or_url` against the configured daemon.
    #[must_use]
    pub fn resolve(&self, path_or_url: &str) -> String {
        resolver::resolve(&self.config, path_or_url)
    }

    /// Sends a request and returns the decoded JSON answer (`null` for empty bodies).
    ///
    /// `POST` carries `params` as a form-encoded body; every other method carries them
    /// in the query string.
    pub async fn request(&self, method: Method, path_or_url: &str, params: &Params) -> Result<Value> {
        self.request_as(method, path_or_url, params).await
    }

    /// Like [`Client::request`], decoding the answer into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path_or_url: &str,
        params: &Params,
    ) -> Result<T> {
        let request = self.build_request(method, path_or_url, params, None::<&()>)?;

        crate::request(&self.client, request).await
    }

    /// Sends `body` as JSON, with `params` in the query string.
    pub async fn request_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path_or_url: &str,
        params: &Params,
        body: &B,
    ) -> Result<Value> {
        let request = self.build_request(method, path_or_url, params, Some(body))?;

        crate::request(&self.client, request).await
    }

    pub async fn get(&self, path_or_url: &str, params: &Params) -> Result<Value> {
        self.request(Method::GET, path_or_url, params).await
    }

    pub async fn post(&self, path_or_url: &str, params: &Params) -> Result<Value> {
        self.request(Method::POST, path_or_url, params).await
    }

    /// The daemon's player and queue controls are `PUT` with query parameters and
    /// answer `204 No Content`.
    pub async fn put(&self, path_or_url: &str, params: &Params) -> Result<Value> {
        self.request(Method::PUT, path_or_url, params).await
    }

    /// Probes the daemon with this client's configuration.
    ///
    /// See [`crate::probe::test_connection`] for how failures are classified.
    pub async fn test_connection(&self) -> Result<ServerIdentity> {
        probe::probe(self).await
    }

    /// Resolves `path_or_url` and embeds the configured credentials as URL userinfo.
    ///
    /// Useful for artwork URLs handed to players that cannot send an `Authorization`
    /// header. Absolute URLs pointing at a different host or port are returned without
    /// credentials.
    pub fn full_url(&self, path_or_url: &str) -> Result<Url> {
        let mut url = Url::parse(&self.resolve(path_or_url))?;

        let Some(credentials) = self.config.credentials() else {
            return Ok(url);
        };

        let base = Url::parse(&resolver::base_url(&self.config))?;
        if url.origin() != base.origin() {
            return Ok(url);
        }

        url.set_username(credentials.username())
            .map_err(|()| Error::validation(format!("cannot set credentials on {url}")))?;
        url.set_password(credentials.password().map(|p| p.expose_secret()))
            .map_err(|()| Error::validation(format!("cannot set credentials on {url}")))?;

        Ok(url)
    }

    fn build_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path_or_url: &str,
        params: &Params,
        json: Option<&B>,
    ) -> Result<Request> {
        // Coercion runs first so a bad parameter never reaches the network.
        let params = coerce(params, self.config.bool_tokens())?;
        let url = self.resolve(path_or_url);

        #[cfg(feature = "tracing")]
        tracing::debug!(method = %method, url = %url, params = ?params, "building request");

        let send_form = json.is_none() && method == Method::POST;
        let mut builder = self.client.request(method, url);

        if send_form {
            builder = builder
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(serde_html_form::to_string(&params)?);
        } else if !params.is_empty() {
            builder = builder.query(&params);
        }

        if let Some(body) = json {
            builder = builder.json(body);
        }

        if let Some(credentials) = self.config.credentials() {
            builder = builder.basic_auth(
                credentials.username(),
                credentials.password().map(|p| p.expose_secret()),
            );
        }

        Ok(builder.build()?)
    }
}
