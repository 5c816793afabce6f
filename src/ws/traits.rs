//! Seams of the event subscriber: message parsing, socket opening and disconnect
//! notification.

use std::error::Error as StdError;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::subscriber::DisconnectReason;
use super::types::EventType;

/// Stream type produced by a [`Connector`].
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Error type a [`DisconnectHandler`] may return.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Message parser trait for converting raw frames to messages.
///
/// # Example
///
/// ```ignore
/// pub struct PlayerOnly;
///
/// impl MessageParser<Notification> for PlayerOnly {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<Notification>> {
///         let n: Notification = serde_json::from_slice(bytes)?;
///         Ok(if n.contains(EventType::Player) { vec![n] } else { vec![] })
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse incoming bytes into messages.
    ///
    /// May return an empty vec when the frame carries nothing of interest. An error
    /// drops the frame; the connection stays up.
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>>;

    /// Messages delivered to listeners each time a connection opens, before any frame.
    ///
    /// The daemon only reports changes, so this lets listeners fetch everything they
    /// subscribed to after a (re)connect. Nothing by default.
    fn resync(&self, _event_types: &[EventType]) -> Vec<M> {
        Vec::new()
    }
}

/// Opens the WebSocket. Swappable so tests can count or fail connection attempts.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, request: Request) -> Result<WsStream, tungstenite::Error>;
}

/// Connects with [`tokio_tungstenite::connect_async`].
#[expect(
    clippy::exhaustive_structs,
    reason = "Stateless unit struct that callers construct by name"
)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, request: Request) -> Result<WsStream, tungstenite::Error> {
        let (stream, _response) = connect_async(request).await?;
        Ok(stream)
    }
}

/// Invoked once each time an established or attempted connection ends without the
/// caller having asked for it.
///
/// Errors and panics raised here are logged and otherwise ignored; they never take
/// the subscriber down. Calling [`super::Subscriber::start`] from the handler is the
/// supported way to reconnect.
///
/// Plain closures work too:
///
/// ```ignore
/// let handler = Arc::new(|reason: DisconnectReason| println!("lost: {reason}"));
/// subscriber.set_disconnect_handler(&handler);
/// ```
#[async_trait]
pub trait DisconnectHandler: Send + Sync {
    async fn on_disconnect(&self, reason: DisconnectReason) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> DisconnectHandler for F
where
    F: Fn(DisconnectReason) + Send + Sync,
{
    async fn on_disconnect(&self, reason: DisconnectReason) -> Result<(), HandlerError> {
        self(reason);
        Ok(())
    }
}

