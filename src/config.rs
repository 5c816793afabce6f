//! Connection settings shared by the request layer and the event subscriber.

use std::fmt;
use std::time::Duration;

use bon::bon;
use secrecy::SecretString;
use url::Host;

use crate::Result;
use crate::error::Error;
use crate::params::BoolTokens;

/// Default port of the forked-daapd JSON API.
pub const DEFAULT_PORT: u16 = 3689;

/// The daemon authenticates every client as this user; only the password varies.
pub const DEFAULT_USERNAME: &str = "admin";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// URL scheme used to reach the daemon.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    /// The matching WebSocket scheme (`ws` for `http`, `wss` for `https`).
    #[must_use]
    pub const fn websocket(self) -> &'static str {
        match self {
            Self::Http => "ws",
            Self::Https => "wss",
        }
    }
}

/// HTTP basic-auth credentials.
#[derive(Clone)]
pub struct Credentials {
    pub(crate) username: String,
    pub(crate) password: Option<SecretString>,
}

impl Credentials {
    #[must_use]
    pub fn new(username: String, password: Option<String>) -> Self {
        Self {
            username,
            password: password.map(SecretString::from),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> Option<&SecretString> {
        self.password.as_ref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Where the daemon lives and how to authenticate against it.
///
/// Immutable once built; clone it to share between a [`crate::Client`] and an event
/// subscriber.
///
/// ```
/// use forked_daapd_client::config::{ConnectionConfig, Scheme};
///
/// let config = ConnectionConfig::builder()
///     .host("192.168.1.20")
///     .password("secret")
///     .build()?;
///
/// assert_eq!(config.port(), 3689);
/// assert_eq!(config.scheme(), Scheme::Http);
/// assert_eq!(config.credentials().map(|c| c.username()), Some("admin"));
/// # Ok::<(), forked_daapd_client::error::Error>(())
/// ```
#[expect(
    clippy::module_name_repetitions,
    reason = "ConnectionConfig is distinct from the event channel's ws::Config"
)]
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    scheme: Scheme,
    credentials: Option<Credentials>,
    timeout: Duration,
    bool_tokens: BoolTokens,
}

#[bon]
impl ConnectionConfig {
    /// Validates and assembles a configuration. Prefer [`ConnectionConfig::builder`].
    #[builder]
    pub fn new(
        #[builder(into)] host: String,
        #[builder(default = DEFAULT_PORT)] port: u16,
        #[builder(default)] scheme: Scheme,
        #[builder(into)] username: Option<String>,
        #[builder(into)] password: Option<String>,
        // Bounds every HTTP round trip, including the connection probe.
        #[builder(default = DEFAULT_TIMEOUT)]
        timeout: Duration,
        #[builder(default)] bool_tokens: BoolTokens,
    ) -> Result<Self> {
        let host = normalize_host(&host)?;
        if port == 0 {
            return Err(Error::validation("port must be a positive integer"));
        }

        let credentials = match (username, password) {
            (None, None) => None,
            (username, password) => Some(Credentials::new(
                username.unwrap_or_else(|| DEFAULT_USERNAME.to_owned()),
                password,
            )),
        };

        Ok(Self {
            host,
            port,
            scheme,
            credentials,
            timeout,
            bool_tokens,
        })
    }
}

/// Parses `host` as a domain, IPv4 or IPv6 address (bracketed or not) and returns its
/// canonical, unbracketed form. Domains are lowercased.
fn normalize_host(host: &str) -> Result<String> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::validation("host must not be empty"));
    }

    // A bare IPv6 literal is the only valid host containing ':'.
    let parsed = if host.contains(':') && !host.starts_with('[') {
        Host::parse(&format!("[{host}]"))
    } else {
        Host::parse(host)
    }
    .map_err(|e| {
        Error::validation(format!(
            "host must be a bare hostname or address, got {host:?}: {e}"
        ))
    })?;

    Ok(match parsed {
        Host::Ipv6(address) => address.to_string(),
        Host::Ipv4(address) => address.to_string(),
        Host::Domain(domain) => domain,
    })
}

impl ConnectionConfig {
    /// The validated host; domains are lowercased and IPv6 literals are unbracketed.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host formatted for use inside a URL authority; IPv6 literals are bracketed.
    #[must_use]
    pub fn url_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn bool_tokens(&self) -> &BoolTokens {
        &self.bool_tokens
    }
}
