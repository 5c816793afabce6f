//! Push notifications over forked-daapd's WebSocket.
//!
//! # Architecture
//!
//! - [`Subscriber`]: owns one connection, its state machine and the disconnect callback
//! - [`MessageParser`]: turns frames into messages ([`NotificationParser`], [`RawParser`])
//! - [`Connector`]: opens the socket ([`TungsteniteConnector`])
//! - [`DisconnectHandler`]: told once per connection that ends on its own
//!
//! Messages fan out to every [`Subscriber::subscribe`] listener over a broadcast
//! channel; state changes are observable through [`Subscriber::state_receiver`].

pub mod config;
pub mod error;
pub mod subscriber;
pub mod traits;
pub mod types;

pub use config::Config;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use subscriber::{DisconnectReason, Subscriber, SubscriptionState};
pub use traits::*;
pub use types::{EventType, Notification, NotificationParser, RawParser};
