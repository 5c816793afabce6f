#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use forked_daapd_client::ConnectionConfig;
use forked_daapd_client::ws::{
    self, Connector, DisconnectHandler, DisconnectReason, EventType, HandlerError,
    NotificationParser, RawParser, Subscriber, SubscriptionState, TungsteniteConnector, WsStream,
};
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::client::Request as ClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::common::BASIC_AUTH;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
enum Command {
    Send(String),
    Close,
    /// Stop reading, so PINGs go unanswered.
    Freeze,
    /// Drop the TCP stream without a Close frame.
    Drop,
}

/// Mock forked-daapd notification socket.
struct MockWsServer {
    addr: SocketAddr,
    /// Commands for ALL connected clients
    command_tx: broadcast::Sender<Command>,
    /// Text frames sent by clients
    handshake_rx: mpsc::UnboundedReceiver<String>,
    /// `Authorization` header of each upgrade request
    auth_rx: mpsc::UnboundedReceiver<Option<String>>,
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(100);
        let (handshake_tx, handshake_rx) = mpsc::unbounded_channel::<String>();
        let (auth_tx, auth_rx) = mpsc::unbounded_channel::<Option<String>>();
        let connections = Arc::new(AtomicUsize::new(0));

        let commands = command_tx.clone();
        let accepted = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let mut command_rx = commands.subscribe();

                let auth_tx = auth_tx.clone();
                let callback = move |request: &Request,
                                     mut response: Response|
                      -> Result<Response, ErrorResponse> {
                    let auth = request
                        .headers()
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);
                    drop(auth_tx.send(auth));

                    if let Some(protocol) = request.headers().get("sec-websocket-protocol") {
                        response
                            .headers_mut()
                            .insert("sec-websocket-protocol", protocol.clone());
                    }
                    Ok(response)
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };
                accepted.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let handshake_tx = handshake_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(handshake_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Command::Send(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Close) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                    Ok(Command::Freeze) => {
                                        std::future::pending::<()>().await;
                                    }
                                    Ok(Command::Drop) => break,
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            handshake_rx,
            auth_rx,
            connections,
        }
    }

    fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::builder()
            .host(self.addr.ip().to_string())
            .port(self.addr.port())
            .timeout(WAIT)
            .build()
            .unwrap()
    }

    fn authenticated_connection(&self) -> ConnectionConfig {
        ConnectionConfig::builder()
            .host(self.addr.ip().to_string())
            .port(self.addr.port())
            .password(common::PASSWORD)
            .timeout(WAIT)
            .build()
            .unwrap()
    }

    fn send(&self, text: &str) {
        drop(self.command_tx.send(Command::Send(text.to_owned())));
    }

    fn close_all(&self) {
        drop(self.command_tx.send(Command::Close));
    }

    fn drop_all(&self) {
        drop(self.command_tx.send(Command::Drop));
    }

    fn freeze_all(&self) {
        drop(self.command_tx.send(Command::Freeze));
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn recv_handshake(&mut self) -> Option<String> {
        timeout(WAIT, self.handshake_rx.recv()).await.ok().flatten()
    }

    async fn recv_auth(&mut self) -> Option<Option<String>> {
        timeout(WAIT, self.auth_rx.recv()).await.ok().flatten()
    }
}

/// Counts connection attempts before delegating to the real connector.
#[derive(Clone, Default)]
struct CountingConnector {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, request: ClientRequest) -> Result<WsStream, tungstenite::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TungsteniteConnector.connect(request).await
    }
}

/// Never finishes connecting within a test's lifetime.
struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn connect(&self, request: ClientRequest) -> Result<WsStream, tungstenite::Error> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        TungsteniteConnector.connect(request).await
    }
}

struct FailingHandler;

struct PanickingHandler;

#[async_trait]
impl DisconnectHandler for PanickingHandler {
    async fn on_disconnect(&self, _reason: DisconnectReason) -> Result<(), HandlerError> {
        panic!("handler exploded");
    }
}

#[async_trait]
impl DisconnectHandler for FailingHandler {
    async fn on_disconnect(&self, _reason: DisconnectReason) -> Result<(), HandlerError> {
        Err("listener is gone".into())
    }
}

type Observed = (DisconnectReason, SubscriptionState);

/// Registers a handler that reports each call along with the state it observed.
fn observe<M, P>(
    subscriber: &Subscriber<M, P>,
) -> (
    Arc<impl Fn(DisconnectReason) + Send + Sync>,
    mpsc::UnboundedReceiver<Observed>,
)
where
    M: std::fmt::Debug + Clone + Send + 'static,
    P: ws::MessageParser<M>,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let state_rx = subscriber.state_receiver();
    let handler = Arc::new(move |reason: DisconnectReason| {
        drop(tx.send((reason, *state_rx.borrow())));
    });
    subscriber.set_disconnect_handler(&handler);
    (handler, rx)
}

async fn wait_for_state(
    state_rx: &mut watch::Receiver<SubscriptionState>,
    target: SubscriptionState,
) {
    timeout(WAIT, state_rx.wait_for(|state| *state == target))
        .await
        .unwrap()
        .unwrap();
}

async fn connected<M, P>(subscriber: &Subscriber<M, P>)
where
    M: std::fmt::Debug + Clone + Send + 'static,
    P: ws::MessageParser<M>,
{
    wait_for_state(&mut subscriber.state_receiver(), SubscriptionState::Connected).await;
}

#[tokio::test]
async fn start_sends_notify_handshake_with_auth() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let mut config = ws::Config::default();
    config.event_types = vec![EventType::Player, EventType::Volume];

    let subscriber = Subscriber::new(
        &server.authenticated_connection(),
        config,
        NotificationParser,
    )?;

    assert_eq!(subscriber.start(), SubscriptionState::Connecting);
    connected(&subscriber).await;

    assert_eq!(
        server.recv_auth().await.unwrap().as_deref(),
        Some(BASIC_AUTH)
    );
    assert_eq!(
        server.recv_handshake().await.unwrap(),
        r#"{"notify":["player","volume"]}"#
    );

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn notifications_reach_every_listener() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;

    let mut first = subscriber.subscribe();
    let mut second = subscriber.subscribe();
    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    server.send(r#"{"notify":["player","queue"]}"#);

    for listener in [&mut first, &mut second] {
        let resync = timeout(WAIT, listener.recv()).await??;
        assert_eq!(resync.notify, EventType::ALL.to_vec());

        let notification = timeout(WAIT, listener.recv()).await??;
        assert_eq!(notification.notify, vec![EventType::Player, EventType::Queue]);
    }

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn malformed_frame_is_skipped() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;

    let mut listener = subscriber.subscribe();
    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    server.send("this is not json");
    server.send(r#"{"notify":["outputs"]}"#);

    let resync = timeout(WAIT, listener.recv()).await??;
    assert_eq!(resync.notify, EventType::ALL.to_vec());
    let notification = timeout(WAIT, listener.recv()).await??;
    assert_eq!(notification.notify, vec![EventType::Outputs]);
    assert_eq!(subscriber.state(), SubscriptionState::Connected);

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn raw_parser_passes_payload_through() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(&server.connection(), ws::Config::default(), RawParser)?;

    let mut listener = subscriber.subscribe();
    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    server.send(r#"{"notify":["database"],"extra":true}"#);

    let value = timeout(WAIT, listener.recv()).await??;
    assert_eq!(value, json!({ "notify": ["database"], "extra": true }));

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn remote_close_invokes_handler_once() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;
    let (_handler, mut calls) = observe(&subscriber);

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    server.close_all();

    let (reason, observed_state) = timeout(WAIT, calls.recv()).await?.unwrap();
    assert!(reason.is_transport_loss());
    assert_eq!(observed_state, SubscriptionState::Disconnected);
    assert_eq!(subscriber.state(), SubscriptionState::Disconnected);

    assert!(
        timeout(Duration::from_millis(300), calls.recv())
            .await
            .is_err(),
        "handler must be called exactly once"
    );

    Ok(())
}

#[tokio::test]
async fn stop_does_not_invoke_handler() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;
    let (_handler, mut calls) = observe(&subscriber);

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    assert_eq!(subscriber.stop().await, SubscriptionState::Disconnected);

    assert!(
        timeout(Duration::from_millis(300), calls.recv())
            .await
            .is_err()
    );

    Ok(())
}

#[tokio::test]
async fn stop_while_connecting_releases_promptly() -> anyhow::Result<()> {
    let server = MockWsServer::start().await;
    let subscriber = Subscriber::with_connector(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
        StalledConnector,
    )?;
    let (_handler, mut calls) = observe(&subscriber);

    assert_eq!(subscriber.start(), SubscriptionState::Connecting);

    let state = timeout(WAIT, subscriber.stop()).await?;
    assert_eq!(state, SubscriptionState::Disconnected);
    assert!(calls.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn repeated_start_opens_one_socket() -> anyhow::Result<()> {
    let server = MockWsServer::start().await;
    let connector = CountingConnector::default();
    let calls = Arc::clone(&connector.calls);

    let subscriber = Subscriber::with_connector(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
        connector,
    )?;

    assert_eq!(subscriber.start(), SubscriptionState::Connecting);
    assert_eq!(subscriber.start(), SubscriptionState::Connecting);
    connected(&subscriber).await;
    assert_eq!(subscriber.start(), SubscriptionState::Connected);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.connections(), 1);

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn connect_failure_reports_connect_failed() -> anyhow::Result<()> {
    let connection = ConnectionConfig::builder()
        .host("127.0.0.1")
        .port(common::closed_port())
        .build()?;
    let subscriber = Subscriber::new(&connection, ws::Config::default(), NotificationParser)?;
    let (_handler, mut calls) = observe(&subscriber);

    subscriber.start();

    let (reason, observed_state) = timeout(WAIT, calls.recv()).await?.unwrap();
    assert_eq!(reason, DisconnectReason::ConnectFailed);
    assert!(!reason.is_transport_loss());
    assert_eq!(observed_state, SubscriptionState::Disconnected);

    Ok(())
}

#[tokio::test]
async fn missed_heartbeat_is_transport_loss() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let mut config = ws::Config::default();
    config.heartbeat_interval = Some(Duration::from_millis(100));
    config.heartbeat_timeout = Duration::from_millis(200);

    let subscriber = Subscriber::new(&server.connection(), config, NotificationParser)?;
    let (_handler, mut calls) = observe(&subscriber);

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    server.freeze_all();

    let (reason, _) = timeout(WAIT, calls.recv()).await?.unwrap();
    assert_eq!(reason, DisconnectReason::TransportLost);
    assert_eq!(subscriber.state(), SubscriptionState::Disconnected);

    Ok(())
}

#[tokio::test]
async fn answered_heartbeat_keeps_connection() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let mut config = ws::Config::default();
    config.heartbeat_interval = Some(Duration::from_millis(50));
    config.heartbeat_timeout = Duration::from_millis(200);

    let subscriber = Subscriber::new(&server.connection(), config, NotificationParser)?;
    let (_handler, mut calls) = observe(&subscriber);

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(subscriber.state(), SubscriptionState::Connected);
    assert!(calls.try_recv().is_err());

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn failing_handler_does_not_break_subscriber() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;
    let handler = Arc::new(FailingHandler);
    subscriber.set_disconnect_handler(&handler);
    let mut state_rx = subscriber.state_receiver();

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();
    server.close_all();
    wait_for_state(&mut state_rx, SubscriptionState::Disconnected).await;

    subscriber.start();
    connected(&subscriber).await;
    assert_eq!(server.connections(), 2);

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn panicking_handler_does_not_break_subscriber() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;
    let handler = Arc::new(PanickingHandler);
    subscriber.set_disconnect_handler(&handler);
    let mut state_rx = subscriber.state_receiver();

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();
    server.close_all();
    wait_for_state(&mut state_rx, SubscriptionState::Disconnected).await;

    subscriber.start();
    connected(&subscriber).await;
    assert_eq!(server.connections(), 2);

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn handler_can_reconnect() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;

    let reconnecting = subscriber.clone();
    let handler = Arc::new(move |reason: DisconnectReason| {
        if reason.is_transport_loss() {
            reconnecting.start();
        }
    });
    subscriber.set_disconnect_handler(&handler);

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    server.close_all();

    // The second connection sends its own handshake.
    server.recv_handshake().await.unwrap();
    connected(&subscriber).await;
    assert_eq!(server.connections(), 2);

    subscriber.clear_disconnect_handler();
    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn dropped_handler_is_not_called() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;
    let (handler, mut calls) = observe(&subscriber);
    drop(handler);

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();
    server.close_all();

    // The only sender lived inside the handler.
    assert!(timeout(WAIT, calls.recv()).await?.is_none());
    wait_for_state(
        &mut subscriber.state_receiver(),
        SubscriptionState::Disconnected,
    )
    .await;

    Ok(())
}

#[tokio::test]
async fn state_transitions_are_observable() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;
    let mut state_rx = subscriber.state_receiver();
    assert_eq!(*state_rx.borrow_and_update(), SubscriptionState::Disconnected);

    subscriber.start();
    wait_for_state(&mut state_rx, SubscriptionState::Connected).await;
    server.recv_handshake().await.unwrap();

    server.close_all();
    wait_for_state(&mut state_rx, SubscriptionState::Disconnected).await;

    Ok(())
}

#[tokio::test]
async fn every_connect_announces_requested_event_types() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let mut config = ws::Config::default();
    config.event_types = vec![EventType::Queue, EventType::Outputs];

    let subscriber = Subscriber::new(&server.connection(), config, NotificationParser)?;
    let mut listener = subscriber.subscribe();
    let mut state_rx = subscriber.state_receiver();

    subscriber.start();
    let resync = timeout(WAIT, listener.recv()).await??;
    assert_eq!(resync.notify, vec![EventType::Queue, EventType::Outputs]);
    server.recv_handshake().await.unwrap();

    server.close_all();
    wait_for_state(&mut state_rx, SubscriptionState::Disconnected).await;

    subscriber.start();
    let resync = timeout(WAIT, listener.recv()).await??;
    assert_eq!(resync.notify, vec![EventType::Queue, EventType::Outputs]);

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn messages_arrive_in_transport_order() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(&server.connection(), ws::Config::default(), RawParser)?;

    let mut first = subscriber.subscribe();
    let mut second = subscriber.subscribe();
    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    for seq in 0..20 {
        server.send(&json!({ "notify": ["player"], "seq": seq }).to_string());
    }

    for listener in [&mut first, &mut second] {
        for seq in 0..20 {
            let value = timeout(WAIT, listener.recv()).await??;
            assert_eq!(value["seq"], seq, "frame {seq} arrived out of order");
        }
    }

    subscriber.stop().await;
    Ok(())
}

#[tokio::test]
async fn dropped_stream_is_transport_loss() -> anyhow::Result<()> {
    let mut server = MockWsServer::start().await;
    let subscriber = Subscriber::new(
        &server.connection(),
        ws::Config::default(),
        NotificationParser,
    )?;
    let (_handler, mut calls) = observe(&subscriber);

    subscriber.start();
    connected(&subscriber).await;
    server.recv_handshake().await.unwrap();

    server.drop_all();

    let (reason, observed_state) = timeout(WAIT, calls.recv()).await?.unwrap();
    assert!(reason.is_transport_loss(), "unexpected reason {reason}");
    assert_eq!(observed_state, SubscriptionState::Disconnected);
    assert_eq!(subscriber.state(), SubscriptionState::Disconnected);

    assert!(
        timeout(Duration::from_millis(300), calls.recv())
            .await
            .is_err(),
        "handler must be called exactly once"
    );

    Ok(())
}
