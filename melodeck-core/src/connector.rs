//! Both ends of the controller/player handshake.
//!
//! The controller opens a player window, buffers the playlist it wants
//! played, and sends it only once the player has announced `playerReady`.
//! After that, play requests go straight through until the player reports
//! `playerClosed` or its window handle is found closed.

use crate::error::{CoreError, Result};
use crate::protocol::{accept, MessagePort, Origin, PostedMessage, WindowMessage};
use crate::store::SongId;
use crate::window::{OpenRequest, PlayerWindow, WindowOpener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "melodeck::connector";

/// Controller-side handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    NoWindow,
    AwaitingReady,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingPlaylist {
    song_ids: Vec<SongId>,
    current_index: usize,
}

/// The window the controller currently talks to, and the inbox only that
/// window can post into
struct OpenWindow {
    handle: Box<dyn PlayerWindow>,
    inbox: mpsc::UnboundedReceiver<PostedMessage>,
}

/// Controller end: opens the player window and hands it playlists
pub struct PlayerConnector {
    origin: Origin,
    opener: Arc<dyn WindowOpener>,
    window: Option<OpenWindow>,
    ready: bool,
    pending: Option<PendingPlaylist>,
    ready_timeout: Duration,
}

impl PlayerConnector {
    #[must_use]
    pub fn new(origin: Origin, opener: Arc<dyn WindowOpener>, ready_timeout: Duration) -> Self {
        Self {
            origin,
            opener,
            window: None,
            ready: false,
            pending: None,
            ready_timeout,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectorState {
        match &self.window {
            Some(window) if !window.handle.is_closed() => {
                if self.ready {
                    ConnectorState::Ready
                } else {
                    ConnectorState::AwaitingReady
                }
            }
            _ => ConnectorState::NoWindow,
        }
    }

    /// Whether a playlist is waiting for `playerReady`
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Play `song_id` with `song_ids` as the session.
    ///
    /// Opens a player window if none is open and waits, bounded by the ready
    /// timeout, for it to announce readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if a window cannot be opened or the open window
    /// rejects the message.
    pub async fn play_song(
        &mut self,
        song_id: SongId,
        song_ids: Vec<SongId>,
        current_index: usize,
    ) -> Result<()> {
        info!(target: LOG_TARGET, "Playing song {} at index {}", song_id, current_index);
        match self.state() {
            ConnectorState::NoWindow => {
                self.open_window(Some(song_id), song_ids, current_index).await
            }
            ConnectorState::AwaitingReady => {
                self.buffer(song_ids, current_index);
                Ok(())
            }
            ConnectorState::Ready => self.post(&WindowMessage::PlaySong {
                song_id,
                playlist: song_ids,
                current_index,
            }),
        }
    }

    /// Play a whole playlist from its first song.
    ///
    /// # Errors
    ///
    /// Returns an error if a window cannot be opened or the open window
    /// rejects the message.
    pub async fn play_playlist(&mut self, song_ids: Vec<SongId>) -> Result<()> {
        info!(target: LOG_TARGET, "Playing playlist with {} songs", song_ids.len());
        match self.state() {
            ConnectorState::NoWindow => {
                let first = song_ids.first().copied();
                self.open_window(first, song_ids, 0).await
            }
            ConnectorState::AwaitingReady => {
                self.buffer(song_ids, 0);
                Ok(())
            }
            ConnectorState::Ready => self.post(&WindowMessage::SetPlaylist {
                song_ids,
                current_index: 0,
                play_now: true,
            }),
        }
    }

    /// Apply one incoming message to the state machine.
    ///
    /// Returns the decoded message, or `None` if it was dropped.
    pub fn handle_message(&mut self, message: PostedMessage) -> Option<WindowMessage> {
        let message = accept(&self.origin, message)?;
        match &message {
            WindowMessage::PlayerReady => {
                info!(target: LOG_TARGET, "Player window ready");
                if self.state() == ConnectorState::NoWindow {
                    debug!(target: LOG_TARGET, "Ignoring playerReady with no open window");
                } else {
                    self.ready = true;
                    self.flush_pending();
                }
            }
            WindowMessage::PlayerClosed => {
                info!(target: LOG_TARGET, "Player window closed");
                self.reset();
            }
            other => {
                debug!(target: LOG_TARGET, "Ignoring {} on controller", other.kind());
            }
        }
        Some(message)
    }

    /// Process every message the current window already queued, without
    /// waiting
    pub fn process_pending(&mut self) {
        while let Some(message) = self
            .window
            .as_mut()
            .and_then(|window| window.inbox.try_recv().ok())
        {
            self.handle_message(message);
        }
    }

    /// Wait for the next accepted message from the current window and apply
    /// it. Returns `None` once there is no window left to hear from.
    pub async fn next_message(&mut self) -> Option<WindowMessage> {
        loop {
            let message = self.window.as_mut()?.inbox.recv().await?;
            if let Some(message) = self.handle_message(message) {
                return Some(message);
            }
        }
    }

    /// Wait until the player is ready, at most `limit`.
    ///
    /// Readiness comes only from `playerReady`. On timeout the buffered
    /// playlist stays buffered and a late `playerReady` still delivers it.
    pub async fn await_ready(&mut self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            match self.state() {
                ConnectorState::Ready => return true,
                ConnectorState::NoWindow => return false,
                ConnectorState::AwaitingReady => {}
            }

            let Some(window) = self.window.as_mut() else {
                return false;
            };
            match timeout_at(deadline, window.inbox.recv()).await {
                Ok(Some(message)) => {
                    self.handle_message(message);
                }
                Ok(None) => return false,
                Err(_) => {
                    warn!(target: LOG_TARGET, "Player window not ready after {:?}, continuing", limit);
                    return false;
                }
            }
        }
    }

    /// Close the player window, if any
    pub fn close(&mut self) {
        if let Some(window) = self.window.as_mut() {
            window.handle.close();
        }
        self.reset();
    }

    async fn open_window(
        &mut self,
        song_id: Option<SongId>,
        song_ids: Vec<SongId>,
        current_index: usize,
    ) -> Result<()> {
        info!(target: LOG_TARGET, "Opening new player window");
        self.reset();
        // A fresh inbox per window: whatever an earlier window still posts
        // goes nowhere
        let (controller, inbox) = mpsc::unbounded_channel();
        let handle = self
            .opener
            .open(OpenRequest {
                song_id,
                controller,
            })
            .await?;
        self.window = Some(OpenWindow { handle, inbox });
        self.buffer(song_ids, current_index);

        self.await_ready(self.ready_timeout).await;
        Ok(())
    }

    fn buffer(&mut self, song_ids: Vec<SongId>, current_index: usize) {
        // Only the latest request is delivered
        self.pending = Some(PendingPlaylist {
            song_ids,
            current_index,
        });
    }

    fn flush_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let message = WindowMessage::SetPlaylist {
            song_ids: pending.song_ids,
            current_index: pending.current_index,
            play_now: true,
        };
        if let Err(e) = self.post(&message) {
            warn!(target: LOG_TARGET, "Failed to send buffered playlist: {}", e);
        }
    }

    fn post(&mut self, message: &WindowMessage) -> Result<()> {
        let result = match &self.window {
            Some(window) => window.handle.post(message),
            None => Err(CoreError::WindowClosed),
        };
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn reset(&mut self) {
        self.window = None;
        self.ready = false;
        self.pending = None;
    }
}

/// Player end of the handshake
pub struct PlayerEndpoint {
    origin: Origin,
    opener: Option<MessagePort>,
}

impl PlayerEndpoint {
    /// `opener` is the port back to the window that opened this player, if any
    #[must_use]
    pub const fn new(origin: Origin, opener: Option<MessagePort>) -> Self {
        Self { origin, opener }
    }

    /// Tell the opener this window can receive messages.
    ///
    /// A player with no opener has nobody to tell.
    ///
    /// # Errors
    ///
    /// Returns an error if the opener is gone.
    pub fn announce_ready(&self) -> Result<()> {
        self.announce(&WindowMessage::PlayerReady)
    }

    /// Tell the opener this window is closing.
    ///
    /// # Errors
    ///
    /// Returns an error if the opener is gone.
    pub fn announce_closed(&self) -> Result<()> {
        self.announce(&WindowMessage::PlayerClosed)
    }

    /// Origin-check and decode an incoming message
    #[must_use]
    pub fn accept(&self, message: PostedMessage) -> Option<WindowMessage> {
        accept(&self.origin, message)
    }

    #[must_use]
    pub const fn has_opener(&self) -> bool {
        self.opener.is_some()
    }

    fn announce(&self, message: &WindowMessage) -> Result<()> {
        match &self.opener {
            Some(port) => port.post(message),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{LocalWindowOpener, PlayerWindowContext};
    use std::sync::Mutex;

    fn origin() -> Origin {
        "http://localhost:8080".parse().unwrap()
    }

    type Launched = Arc<Mutex<Vec<PlayerWindowContext>>>;

    fn connector() -> (PlayerConnector, Launched) {
        let launched: Launched = Arc::new(Mutex::new(Vec::new()));
        let slot = launched.clone();
        let opener = LocalWindowOpener::new(origin(), move |context| {
            slot.lock().unwrap().push(context);
            Ok(())
        });
        let connector = PlayerConnector::new(origin(), Arc::new(opener), Duration::from_secs(5));
        (connector, launched)
    }

    fn take_window(launched: &Launched) -> PlayerWindowContext {
        launched.lock().unwrap().remove(0)
    }

    fn ready_message() -> PostedMessage {
        PostedMessage {
            origin: origin(),
            data: serde_json::json!({"type": "playerReady"}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out_without_ready() {
        let (mut connector, launched) = connector();
        let start = Instant::now();
        connector.play_song(2, vec![1, 2, 3], 1).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(connector.state(), ConnectorState::AwaitingReady);
        assert!(connector.has_pending());

        let mut window = take_window(&launched);
        assert_eq!(window.requested_song, Some(2));
        assert!(window.inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ready_flushes_buffer_once() {
        let (mut connector, launched) = connector();
        connector.play_song(2, vec![1, 2, 3], 1).await.unwrap();
        let mut window = take_window(&launched);

        connector.handle_message(ready_message());
        connector.handle_message(ready_message());
        assert_eq!(connector.state(), ConnectorState::Ready);
        assert!(!connector.has_pending());

        let flushed = window.inbox.try_recv().unwrap();
        assert_eq!(
            accept(&origin(), flushed),
            Some(WindowMessage::SetPlaylist {
                song_ids: vec![1, 2, 3],
                current_index: 1,
                play_now: true,
            })
        );
        assert!(window.inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_while_awaiting_replaces_buffer() {
        let (mut connector, launched) = connector();
        connector.play_song(2, vec![1, 2, 3], 1).await.unwrap();
        connector.play_playlist(vec![9, 8]).await.unwrap();
        assert_eq!(launched.lock().unwrap().len(), 1);

        let mut window = take_window(&launched);
        connector.handle_message(ready_message());

        let flushed = accept(&origin(), window.inbox.try_recv().unwrap());
        assert_eq!(
            flushed,
            Some(WindowMessage::SetPlaylist {
                song_ids: vec![9, 8],
                current_index: 0,
                play_now: true,
            })
        );
        assert!(window.inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_posts_directly() {
        let (mut connector, launched) = connector();
        connector.play_song(1, vec![1, 2], 0).await.unwrap();
        let mut window = take_window(&launched);
        connector.handle_message(ready_message());
        let _ = window.inbox.try_recv();

        connector.play_song(2, vec![1, 2], 1).await.unwrap();
        assert_eq!(
            accept(&origin(), window.inbox.try_recv().unwrap()),
            Some(WindowMessage::PlaySong {
                song_id: 2,
                playlist: vec![1, 2],
                current_index: 1,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_ready_ignored() {
        let (mut connector, launched) = connector();
        connector.play_song(1, vec![1], 0).await.unwrap();
        let mut window = take_window(&launched);

        let foreign = PostedMessage {
            origin: "https://evil.example".parse().unwrap(),
            data: serde_json::json!({"type": "playerReady"}),
        };
        assert!(connector.handle_message(foreign).is_none());
        assert_eq!(connector.state(), ConnectorState::AwaitingReady);
        assert!(window.inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_closed_returns_to_no_window() {
        let (mut connector, launched) = connector();
        connector.play_song(1, vec![1], 0).await.unwrap();
        let _window = take_window(&launched);
        connector.handle_message(ready_message());

        connector.handle_message(PostedMessage {
            origin: origin(),
            data: serde_json::json!({"type": "playerClosed"}),
        });
        assert_eq!(connector.state(), ConnectorState::NoWindow);

        // Next request opens a fresh window
        connector.play_song(1, vec![1], 0).await.unwrap();
        assert_eq!(launched.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_window_detected() {
        let (mut connector, launched) = connector();
        connector.play_song(1, vec![1], 0).await.unwrap();
        drop(take_window(&launched));
        assert_eq!(connector.state(), ConnectorState::NoWindow);
    }

    /// A connector whose windows answer `playerReady` as soon as they launch
    fn eager_connector() -> (PlayerConnector, Launched) {
        let launched: Launched = Arc::new(Mutex::new(Vec::new()));
        let slot = launched.clone();
        let opener = LocalWindowOpener::new(origin(), move |context| {
            if let Some(opener) = &context.opener {
                opener.post(&WindowMessage::PlayerReady)?;
            }
            slot.lock().unwrap().push(context);
            Ok(())
        });
        let connector = PlayerConnector::new(origin(), Arc::new(opener), Duration::from_secs(5));
        (connector, launched)
    }

    #[tokio::test]
    async fn test_await_ready_pumps_inbox() {
        let (mut connector, launched) = eager_connector();
        connector.play_song(5, vec![5], 0).await.unwrap();

        assert_eq!(connector.state(), ConnectorState::Ready);
        let mut window = take_window(&launched);
        assert!(matches!(
            accept(&origin(), window.inbox.try_recv().unwrap()),
            Some(WindowMessage::SetPlaylist { .. })
        ));
    }

    #[tokio::test]
    async fn test_close() {
        let (mut connector, launched) = eager_connector();
        connector.play_song(5, vec![5], 0).await.unwrap();
        connector.close();
        assert_eq!(connector.state(), ConnectorState::NoWindow);
        assert!(take_window(&launched).close_token.is_cancelled());
        assert_eq!(connector.next_message().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_window_cannot_disturb_reopened_one() {
        let (mut connector, launched) = connector();
        connector.play_song(1, vec![1, 2], 0).await.unwrap();
        let first = take_window(&launched);
        let first_port = first.opener.clone().unwrap();
        first_port.post(&WindowMessage::PlayerReady).unwrap();
        connector.process_pending();
        assert_eq!(connector.state(), ConnectorState::Ready);

        connector.close();
        // The old window says goodbye after the controller moved on
        assert!(first_port.post(&WindowMessage::PlayerClosed).is_err());

        connector.play_song(2, vec![1, 2], 1).await.unwrap();
        let mut second = take_window(&launched);
        assert_eq!(connector.state(), ConnectorState::AwaitingReady);
        assert!(connector.has_pending());

        // Neither a stale ready nor a stale close reaches the new window's state
        assert!(first_port.post(&WindowMessage::PlayerReady).is_err());
        connector.process_pending();
        assert_eq!(connector.state(), ConnectorState::AwaitingReady);

        second
            .opener
            .as_ref()
            .unwrap()
            .post(&WindowMessage::PlayerReady)
            .unwrap();
        connector.process_pending();
        assert_eq!(connector.state(), ConnectorState::Ready);
        assert!(!connector.has_pending());
        assert_eq!(
            accept(&origin(), second.inbox.try_recv().unwrap()),
            Some(WindowMessage::SetPlaylist {
                song_ids: vec![1, 2],
                current_index: 1,
                play_now: true,
            })
        );
    }

    #[tokio::test]
    async fn test_endpoint_announces_to_opener() {
        let (port, mut inbox) = MessagePort::channel(origin());
        let endpoint = PlayerEndpoint::new(origin(), Some(port));
        endpoint.announce_ready().unwrap();
        endpoint.announce_closed().unwrap();
        assert_eq!(
            accept(&origin(), inbox.recv().await.unwrap()),
            Some(WindowMessage::PlayerReady)
        );
        assert_eq!(
            accept(&origin(), inbox.recv().await.unwrap()),
            Some(WindowMessage::PlayerClosed)
        );

        let standalone = PlayerEndpoint::new(origin(), None);
        assert!(standalone.announce_ready().is_ok());
        assert!(!standalone.has_opener());
    }
}
