//! Builds fully-qualified request URLs from a [`ConnectionConfig`].

use crate::config::ConnectionConfig;

const ABSOLUTE_PREFIXES: [&str; 2] = ["http://", "https://"];

/// Returns `true` when `path_or_url` already carries an `http` or `https` scheme.
#[must_use]
pub fn is_absolute(path_or_url: &str) -> bool {
    ABSOLUTE_PREFIXES.iter().any(|prefix| {
        path_or_url
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

/// Base URL of the daemon, e.g. `http://192.168.1.20:3689/`.
#[must_use]
pub fn base_url(config: &ConnectionConfig) -> String {
    format!(
        "{}://{}:{}/",
        config.scheme(),
        config.url_host(),
        config.port()
    )
}

/// Resolves a path against the configured daemon.
///
/// Absolute `http(s)://` URLs are returned unchanged, which makes the operation
/// idempotent. Relative paths are joined onto [`base_url`] with exactly one slash at
/// the boundary.
///
/// ```
/// use forked_daapd_client::config::ConnectionConfig;
/// use forked_daapd_client::resolver::resolve;
///
/// let config = ConnectionConfig::builder().host("daapd.local").build()?;
///
/// let url = resolve(&config, "/api/library/playlists");
/// assert_eq!(url, "http://daapd.local:3689/api/library/playlists");
/// assert_eq!(resolve(&config, &url), url);
/// # Ok::<(), forked_daapd_client::error::Error>(())
/// ```
#[must_use]
pub fn resolve(config: &ConnectionConfig, path_or_url: &str) -> String {
    if is_absolute(path_or_url) {
        return path_or_url.to_owned();
    }

    let mut url = base_url(config);
    url.push_str(path_or_url.trim_start_matches('/'));
    url
}
