//! Messages exchanged over the notification socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::WsError;
use super::traits::MessageParser;
use crate::Result;

/// Kinds of state change the daemon can push.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventType {
    Player,
    Queue,
    Outputs,
    Volume,
    Options,
    Database,
    Update,
    Pairing,
    Spotify,
    Lastfm,
    Config,
    /// A type this client does not know about yet
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Every known event type.
    pub const ALL: [EventType; 11] = [
        Self::Player,
        Self::Queue,
        Self::Outputs,
        Self::Volume,
        Self::Options,
        Self::Database,
        Self::Update,
        Self::Pairing,
        Self::Spotify,
        Self::Lastfm,
        Self::Config,
    ];
}

/// Handshake sent right after the socket opens, selecting the events to receive.
#[derive(Debug, Serialize)]
pub(crate) struct NotifyRequest<'types> {
    pub notify: &'types [EventType],
}

/// A push message listing which parts of the daemon's state changed.
///
/// The daemon does not send the new state itself; listeners re-fetch the affected
/// resources through [`crate::Client`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Notification {
    pub notify: Vec<EventType>,
}

impl Notification {
    #[must_use]
    pub fn contains(&self, event_type: EventType) -> bool {
        self.notify.contains(&event_type)
    }
}

/// Parses `{"notify": [...]}` frames into [`Notification`]s.
#[expect(
    clippy::exhaustive_structs,
    reason = "Stateless unit struct that callers construct by name"
)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationParser;

impl MessageParser<Notification> for NotificationParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<Notification>> {
        let notification = serde_json::from_slice(bytes).map_err(WsError::MessageParse)?;
        Ok(vec![notification])
    }

    /// Reports every requested event type as changed.
    fn resync(&self, event_types: &[EventType]) -> Vec<Notification> {
        vec![Notification {
            notify: event_types.to_vec(),
        }]
    }
}

/// Passes every frame through as opaque JSON.
#[expect(
    clippy::exhaustive_structs,
    reason = "Stateless unit struct that callers construct by name"
)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawParser;

impl MessageParser<Value> for RawParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<Value>> {
        let value = serde_json::from_slice(bytes).map_err(WsError::MessageParse)?;
        Ok(vec![value])
    }
}
