//! Wire format for messages between the controller and player windows.
//!
//! A [`PostedMessage`] is what crosses a port: the sender's origin plus an
//! untyped JSON payload. Receivers check the origin first and only then decode
//! the payload into a [`WindowMessage`]. Anything from another origin, and
//! anything that does not decode, is dropped without telling the sender.

use crate::error::{CoreError, Result};
use crate::store::SongId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

const LOG_TARGET: &str = "melodeck::protocol";

/// A web origin, `scheme://host[:port]`, normalised so equal origins compare equal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Origin {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| CoreError::InvalidOrigin {
            origin: s.to_string(),
            reason,
        };

        let url = Url::parse(s.trim()).map_err(|e| invalid(e.to_string()))?;
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(invalid("URL has an opaque origin".to_string()));
        }
        Ok(Self(origin.ascii_serialization()))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as delivered to a window
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    /// Origin of the sending window
    pub origin: Origin,
    pub data: serde_json::Value,
}

/// Typed cross-window message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WindowMessage {
    /// Player has attached its listener and can receive messages
    PlayerReady,
    /// Player window is going away
    PlayerClosed,
    /// Play `song_id` and adopt `playlist` as the session
    #[serde(rename_all = "camelCase")]
    PlaySong {
        song_id: SongId,
        playlist: Vec<SongId>,
        current_index: usize,
    },
    /// Adopt a playlist, optionally starting the song at `current_index`
    #[serde(rename_all = "camelCase")]
    SetPlaylist {
        song_ids: Vec<SongId>,
        current_index: usize,
        play_now: bool,
    },
}

impl WindowMessage {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PlayerReady => "playerReady",
            Self::PlayerClosed => "playerClosed",
            Self::PlaySong { .. } => "playSong",
            Self::SetPlaylist { .. } => "setPlaylist",
        }
    }
}

/// Origin check then decode. Returns `None` for anything that must be dropped.
#[must_use]
pub fn accept(expected: &Origin, message: PostedMessage) -> Option<WindowMessage> {
    if message.origin != *expected {
        debug!(target: LOG_TARGET, "Dropping message from foreign origin {}", message.origin);
        return None;
    }

    match serde_json::from_value(message.data) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(target: LOG_TARGET, "Dropping undecodable message: {}", e);
            None
        }
    }
}

/// Sending half of a window's message queue.
///
/// Every message posted through a port carries the port's origin, the way a
/// browser stamps `event.origin` with the sender's origin.
#[derive(Debug, Clone)]
pub struct MessagePort {
    origin: Origin,
    tx: mpsc::UnboundedSender<PostedMessage>,
}

impl MessagePort {
    /// A port and the inbox it delivers to
    #[must_use]
    pub fn channel(origin: Origin) -> (Self, mpsc::UnboundedReceiver<PostedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { origin, tx }, rx)
    }

    #[must_use]
    pub const fn from_sender(origin: Origin, tx: mpsc::UnboundedSender<PostedMessage>) -> Self {
        Self { origin, tx }
    }

    /// Same destination, stamped with a different sender origin
    #[must_use]
    pub fn with_origin(&self, origin: Origin) -> Self {
        Self {
            origin,
            tx: self.tx.clone(),
        }
    }

    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Encode and post `message`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WindowClosed`] if the receiving window is gone.
    pub fn post(&self, message: &WindowMessage) -> Result<()> {
        debug!(target: LOG_TARGET, "Posting {} from {}", message.kind(), self.origin);
        self.post_raw(serde_json::to_value(message)?)
    }

    /// Post an arbitrary payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WindowClosed`] if the receiving window is gone.
    pub fn post_raw(&self, data: serde_json::Value) -> Result<()> {
        self.tx
            .send(PostedMessage {
                origin: self.origin.clone(),
                data,
            })
            .map_err(|_| CoreError::WindowClosed)
    }

    /// Whether the receiving window has dropped its inbox
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn origin(s: &str) -> Origin {
        s.parse().unwrap()
    }

    #[test]
    fn test_origin_normalisation() {
        assert_eq!(origin("http://localhost:8080/player.html?id=3").as_str(), "http://localhost:8080");
        assert_eq!(origin("HTTP://Example.COM:80/"), origin("http://example.com"));
        assert_ne!(origin("http://example.com"), origin("https://example.com"));
    }

    #[test]
    fn test_invalid_origins() {
        assert!(matches!(
            "not a url".parse::<Origin>(),
            Err(CoreError::InvalidOrigin { .. })
        ));
        assert!("data:text/plain,hi".parse::<Origin>().is_err());
    }

    #[test]
    fn test_wire_shapes() {
        assert_eq!(
            serde_json::to_value(WindowMessage::PlayerReady).unwrap(),
            json!({"type": "playerReady"})
        );
        assert_eq!(
            serde_json::to_value(WindowMessage::PlaySong {
                song_id: 4,
                playlist: vec![1, 4],
                current_index: 1,
            })
            .unwrap(),
            json!({"type": "playSong", "songId": 4, "playlist": [1, 4], "currentIndex": 1})
        );
        assert_eq!(
            serde_json::to_value(WindowMessage::SetPlaylist {
                song_ids: vec![7, 8],
                current_index: 0,
                play_now: true,
            })
            .unwrap(),
            json!({"type": "setPlaylist", "songIds": [7, 8], "currentIndex": 0, "playNow": true})
        );
    }

    #[test]
    fn test_accept_checks_origin_first() {
        let app = origin("http://localhost:8080");
        let data = json!({"type": "playerClosed"});

        let same = PostedMessage {
            origin: app.clone(),
            data: data.clone(),
        };
        assert_eq!(accept(&app, same), Some(WindowMessage::PlayerClosed));

        let foreign = PostedMessage {
            origin: origin("https://evil.example"),
            data,
        };
        assert_eq!(accept(&app, foreign), None);
    }

    #[test]
    fn test_accept_drops_undecodable() {
        let app = origin("http://localhost:8080");
        for data in [
            json!({"type": "launchMissiles"}),
            json!({"type": "playSong", "songId": 1}),
            json!("playerReady"),
        ] {
            let message = PostedMessage {
                origin: app.clone(),
                data,
            };
            assert_eq!(accept(&app, message), None);
        }
    }

    #[test]
    fn test_port_stamps_origin() {
        let app = origin("http://localhost:8080");
        let (port, mut inbox) = MessagePort::channel(app.clone());
        port.post(&WindowMessage::PlayerReady).unwrap();
        port.with_origin(origin("https://other.example"))
            .post(&WindowMessage::PlayerReady)
            .unwrap();

        assert_eq!(inbox.try_recv().unwrap().origin, app);
        assert_eq!(inbox.try_recv().unwrap().origin.as_str(), "https://other.example");
    }

    #[test]
    fn test_post_to_closed_window() {
        let (port, inbox) = MessagePort::channel(origin("http://localhost:8080"));
        drop(inbox);
        assert!(port.is_closed());
        assert!(matches!(
            port.post(&WindowMessage::PlayerClosed),
            Err(CoreError::WindowClosed)
        ));
    }
}
