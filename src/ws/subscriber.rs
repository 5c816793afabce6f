#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types expose their domain in the name for clarity"
)]

use std::fmt::{self, Debug};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::{FutureExt as _, SinkExt as _, StreamExt as _};
use secrecy::ExposeSecret as _;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval_at, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};

use super::config::Config;
use super::error::WsError;
use super::traits::{Connector, DisconnectHandler, MessageParser, TungsteniteConnector, WsStream};
use super::types::NotifyRequest;
use crate::Result;
use crate::config::{ConnectionConfig, Credentials};
use crate::error::Error;

/// Lifecycle of the event subscription.
///
/// ```text
/// Disconnected --start()--> Connecting --open--> Connected
///      ^                        |                    |
///      |<------ failure --------+                    |
///      |<------ remote close / transport loss -------+
///      |<------ Closing <--stop()-- Connecting | Connected
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl SubscriptionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Why the disconnect handler was called.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum DisconnectReason {
    /// The socket could not be opened or the `notify` handshake failed
    ConnectFailed,
    /// The daemon closed the socket
    RemoteClosed,
    /// The transport failed or the heartbeat went unanswered
    TransportLost,
}

impl DisconnectReason {
    /// Whether a previously established connection was lost.
    #[must_use]
    pub const fn is_transport_loss(self) -> bool {
        matches!(self, Self::RemoteClosed | Self::TransportLost)
    }
}

/// Handle of the task that owns the socket.
struct Running {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything the socket task needs, shared with the public handle.
struct Shared<M, P> {
    endpoint: String,
    authorization: Option<HeaderValue>,
    config: Config,
    connect_timeout: Duration,
    parser: P,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<SubscriptionState>,
    broadcast_tx: broadcast::Sender<M>,
    handler: RwLock<Option<Weak<dyn DisconnectHandler>>>,
}

/// Subscribes to forked-daapd's push notifications over a WebSocket.
///
/// The subscriber does not reconnect on its own. When a connection ends without
/// [`Subscriber::stop`] having been called, the registered [`DisconnectHandler`] is
/// invoked exactly once, after the state has returned to
/// [`SubscriptionState::Disconnected`]; calling [`Subscriber::start`] from there opens a
/// fresh connection.
///
/// Clones share the same connection, state and listeners.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use forked_daapd_client::ConnectionConfig;
/// use forked_daapd_client::ws::{self, DisconnectReason, NotificationParser, Subscriber};
///
/// # async fn example() -> forked_daapd_client::Result<()> {
/// let connection = ConnectionConfig::builder().host("192.168.1.20").build()?;
/// let subscriber = Subscriber::new(
///     &connection,
///     ws::Config::default().with_port(Some(3688)),
///     NotificationParser,
/// )?;
///
/// let handler = Arc::new(|reason: DisconnectReason| eprintln!("disconnected: {reason}"));
/// subscriber.set_disconnect_handler(&handler);
///
/// let mut notifications = subscriber.subscribe();
/// subscriber.start();
///
/// while let Ok(notification) = notifications.recv().await {
///     println!("changed: {:?}", notification.notify);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Subscriber<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    shared: Arc<Shared<M, P>>,
    running: Arc<Mutex<Option<Running>>>,
}

impl<M, P> Clone for Subscriber<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            running: Arc::clone(&self.running),
        }
    }
}

impl<M, P> Debug for Subscriber<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<M, P> Subscriber<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Creates an idle subscriber for the daemon described by `connection`.
    ///
    /// Nothing is opened until [`Subscriber::start`].
    pub fn new(connection: &ConnectionConfig, config: Config, parser: P) -> Result<Self> {
        Self::with_connector(connection, config, parser, TungsteniteConnector)
    }

    /// Like [`Subscriber::new`], opening sockets through `connector`.
    pub fn with_connector<C: Connector>(
        connection: &ConnectionConfig,
        config: Config,
        parser: P,
        connector: C,
    ) -> Result<Self> {
        if config.channel_capacity == 0 {
            return Err(Error::validation("channel capacity must be non-zero"));
        }
        if config.heartbeat_interval.is_some_and(|period| period.is_zero()) {
            return Err(Error::validation("heartbeat interval must be non-zero"));
        }

        let endpoint = endpoint(connection, &config);
        let authorization = connection.credentials().map(basic_auth).transpose()?;
        let (state_tx, _) = watch::channel(SubscriptionState::Disconnected);
        let (broadcast_tx, _) = broadcast::channel(config.channel_capacity);

        let shared = Shared {
            endpoint,
            authorization,
            connect_timeout: connection.timeout(),
            config,
            parser,
            connector: Arc::new(connector),
            state_tx,
            broadcast_tx,
            handler: RwLock::new(None),
        };
        // Surface a bad URL or header now rather than on the first start().
        shared.handshake_request()?;

        Ok(Self {
            shared: Arc::new(shared),
            running: Arc::new(Mutex::new(None)),
        })
    }

    /// Opens the connection in the background.
    ///
    /// Only acts from [`SubscriptionState::Disconnected`]; in any other state this is a
    /// no-op that returns the current state, so repeated calls never open a second
    /// socket. Must be called from within a Tokio runtime.
    pub fn start(&self) -> SubscriptionState {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

        let started = self.shared.state_tx.send_if_modified(|state| {
            if *state == SubscriptionState::Disconnected {
                *state = SubscriptionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return self.state();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.shared.endpoint, "starting event subscription");

        let (cancel, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(Shared::run(Arc::clone(&self.shared), cancel_rx));
        // A previous connection that ended on its own may still be running its handler;
        // it no longer touches the state, so it is simply detached.
        *running = Some(Running { cancel, handle });

        SubscriptionState::Connecting
    }

    /// Closes the connection and waits for the socket to be released.
    ///
    /// Does not invoke the disconnect handler. Returns
    /// [`SubscriptionState::Disconnected`] unless another `stop()` is already in
    /// progress. Teardown is bounded by [`Config::stop_timeout`]; past it the socket
    /// task is aborted.
    pub async fn stop(&self) -> SubscriptionState {
        let running = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let closing = self.shared.state_tx.send_if_modified(|state| {
                if matches!(
                    *state,
                    SubscriptionState::Connecting | SubscriptionState::Connected
                ) {
                    *state = SubscriptionState::Closing;
                    true
                } else {
                    false
                }
            });

            if closing { running.take() } else { None }
        };

        let Some(Running { cancel, mut handle }) = running else {
            return self.state();
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.shared.endpoint, "stopping event subscription");

        _ = cancel.send(());
        if timeout(self.shared.config.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                timeout = ?self.shared.config.stop_timeout,
                "event subscription did not stop in time, aborting"
            );
            handle.abort();
            self.shared
                .state_tx
                .send_replace(SubscriptionState::Disconnected);
        }

        self.state()
    }

    /// Registers the handler invoked when a connection ends on its own.
    ///
    /// Only a weak reference is kept: dropping the last `Arc` unregisters it.
    /// Replaces any previously registered handler.
    pub fn set_disconnect_handler<H: DisconnectHandler + 'static>(&self, handler: &Arc<H>) {
        let handler: Arc<dyn DisconnectHandler> = Arc::clone(handler) as _;
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(&handler));
    }

    pub fn clear_disconnect_handler(&self) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns a new listener for incoming messages.
    ///
    /// Each listener receives every message parsed after it subscribed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.shared.broadcast_tx.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SubscriptionState> {
        self.shared.state_tx.subscribe()
    }

    /// The `ws://` or `wss://` URL this subscriber connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }
}

impl<M, P> Shared<M, P>
where
    M: Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    async fn run(self: Arc<Self>, mut cancel: oneshot::Receiver<()>) {
        let connected = tokio::select! {
            biased;
            _ = &mut cancel => {
                self.finish(None).await;
                return;
            }
            result = self.connect() => result,
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(endpoint = %self.endpoint, error = %e, "unable to connect");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.finish(Some(DisconnectReason::ConnectFailed)).await;
                return;
            }
        };

        // stop() may have moved us to Closing while the handshake was in flight.
        let opened = self.state_tx.send_if_modified(|state| {
            if *state == SubscriptionState::Connecting {
                *state = SubscriptionState::Connected;
                true
            } else {
                false
            }
        });
        if !opened {
            let mut stream = stream;
            _ = stream.close(None).await;
            self.finish(None).await;
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, "event subscription connected");

        for message in self.parser.resync(&self.config.event_types) {
            _ = self.broadcast_tx.send(message);
        }

        let reason = self.receive(stream, &mut cancel).await;
        self.finish(reason).await;
    }

    /// Opens the socket and sends the `notify` handshake.
    async fn connect(&self) -> Result<WsStream> {
        let request = self.handshake_request()?;
        let mut stream = timeout(self.connect_timeout, self.connector.connect(request))
            .await
            .map_err(|_elapsed| WsError::Timeout)??;

        let notify = serde_json::to_string(&NotifyRequest {
            notify: &self.config.event_types,
        })?;
        stream
            .send(Message::Text(notify.into()))
            .await
            .map_err(WsError::Connection)?;

        Ok(stream)
    }

    fn handshake_request(&self) -> Result<Request> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(WsError::Connection)?;
        let headers = request.headers_mut();

        if !self.config.protocols.is_empty() {
            headers.insert(
                SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_str(&self.config.protocols.join(", "))?,
            );
        }
        if let Some(authorization) = &self.authorization {
            headers.insert(AUTHORIZATION, authorization.clone());
        }

        Ok(request)
    }

    /// Pumps frames until the connection ends. `None` means `stop()` asked for it.
    async fn receive(
        &self,
        stream: WsStream,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Option<DisconnectReason> {
        let (mut write, mut read) = stream.split();

        // Without a heartbeat the ticker still needs a period; it is never polled.
        let period = self
            .config
            .heartbeat_interval
            .unwrap_or(Duration::from_secs(3600));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline.unwrap_or_else(|| Instant::now() + period);

            tokio::select! {
                biased;

                _ = &mut *cancel => {
                    _ = write.close().await;
                    return None;
                }

                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => self.dispatch(&bytes),
                    Some(Ok(Message::Pong(_))) => pong_deadline = None,
                    Some(Ok(Message::Close(frame))) => {
                        #[cfg(feature = "tracing")]
                        tracing::info!(?frame, "server closed event subscription");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &frame;
                        return Some(DisconnectReason::RemoteClosed);
                    }
                    Some(Ok(_)) => {
                        // PING is answered by tungstenite itself.
                    }
                    Some(Err(e)) => {
                        let error = Error::from(e);
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %error, "event subscription transport failed");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &error;
                        return Some(DisconnectReason::TransportLost);
                    }
                    None => return Some(DisconnectReason::RemoteClosed),
                },

                _ = heartbeat.tick(), if self.config.heartbeat_interval.is_some() => {
                    if write.send(Message::Ping(Default::default())).await.is_err() {
                        return Some(DisconnectReason::TransportLost);
                    }
                    pong_deadline.get_or_insert_with(|| Instant::now() + self.config.heartbeat_timeout);
                }

                () = sleep_until(deadline), if pong_deadline.is_some() => {
                    let error = Error::from(WsError::HeartbeatTimeout);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        error = %error,
                        timeout = ?self.config.heartbeat_timeout,
                        "event subscription heartbeat failed"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;
                    return Some(DisconnectReason::TransportLost);
                }
            }
        }
    }

    fn dispatch(&self, bytes: &[u8]) {
        match self.parser.parse(bytes) {
            Ok(messages) => {
                for message in messages {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?message, "parsed notification");
                    _ = self.broadcast_tx.send(message);
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    frame = %String::from_utf8_lossy(bytes),
                    error = %e,
                    "dropping unparseable frame"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Returns to `Disconnected`, then tells the handler why, unless `stop()` was
    /// responsible.
    async fn finish(&self, reason: Option<DisconnectReason>) {
        let mut was_closing = false;
        self.state_tx.send_modify(|state| {
            was_closing = *state == SubscriptionState::Closing;
            *state = SubscriptionState::Disconnected;
        });

        let Some(reason) = reason else {
            return;
        };
        if was_closing {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, %reason, "event subscription disconnected");

        let handler = {
            let guard = self.handler.read().unwrap_or_else(PoisonError::into_inner);
            guard.as_ref().and_then(Weak::upgrade)
        };
        let Some(handler) = handler else {
            return;
        };

        match AssertUnwindSafe(handler.on_disconnect(reason))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "disconnect handler failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
            Err(_panic) => {
                #[cfg(feature = "tracing")]
                tracing::error!("disconnect handler panicked");
            }
        }
    }
}

fn endpoint(connection: &ConnectionConfig, config: &Config) -> String {
    let port = config.port.unwrap_or_else(|| connection.port());
    let path = config.path.trim_start_matches('/');

    format!(
        "{}://{}:{port}/{path}",
        connection.scheme().websocket(),
        connection.url_host()
    )
}

fn basic_auth(credentials: &Credentials) -> Result<HeaderValue> {
    let password = credentials
        .password()
        .map(|p| p.expose_secret())
        .unwrap_or_default();
    let token = STANDARD.encode(format!("{}:{password}", credentials.username()));

    let mut value = HeaderValue::from_str(&format!("Basic {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}
