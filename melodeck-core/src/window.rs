//! Window creation seam between the controller and player windows.

use crate::error::{CoreError, Result};
use crate::protocol::{MessagePort, Origin, PostedMessage, WindowMessage};
use crate::store::SongId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const LOG_TARGET: &str = "melodeck::window";

/// What the controller asks for when opening a player window
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Song the player should start with, like `player.html?id=..`
    pub song_id: Option<SongId>,
    /// Controller inbox reserved for messages from this window
    pub controller: mpsc::UnboundedSender<PostedMessage>,
}

/// Controller-side handle to an open player window
pub trait PlayerWindow: Send {
    /// Post a message to the player.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WindowClosed`] if the player is gone.
    fn post(&self, message: &WindowMessage) -> Result<()>;

    /// True once the player side has gone away
    fn is_closed(&self) -> bool;

    /// Ask the player window to close
    fn close(&mut self);
}

/// Opens player windows
#[async_trait]
pub trait WindowOpener: Send + Sync {
    /// Open a new player window.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WindowOpen`] if the window cannot be created.
    async fn open(&self, request: OpenRequest) -> Result<Box<dyn PlayerWindow>>;
}

/// Everything a freshly opened player window starts with
#[derive(Debug)]
pub struct PlayerWindowContext {
    /// Origin this window is served from
    pub origin: Origin,
    /// Messages posted to this window
    pub inbox: mpsc::UnboundedReceiver<PostedMessage>,
    /// Port back to the window that opened this one
    pub opener: Option<MessagePort>,
    pub requested_song: Option<SongId>,
    /// Cancelled when the controller closes this window
    pub close_token: CancellationToken,
}

type Launcher = dyn Fn(PlayerWindowContext) -> Result<()> + Send + Sync;

/// Opens player windows inside this process by handing a
/// [`PlayerWindowContext`] to a launcher callback
pub struct LocalWindowOpener {
    origin: Origin,
    launcher: Arc<Launcher>,
}

impl LocalWindowOpener {
    #[must_use]
    pub fn new(
        origin: Origin,
        launcher: impl Fn(PlayerWindowContext) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            origin,
            launcher: Arc::new(launcher),
        }
    }
}

#[async_trait]
impl WindowOpener for LocalWindowOpener {
    async fn open(&self, request: OpenRequest) -> Result<Box<dyn PlayerWindow>> {
        let (port, inbox) = MessagePort::channel(self.origin.clone());
        let close_token = CancellationToken::new();

        let context = PlayerWindowContext {
            origin: self.origin.clone(),
            inbox,
            opener: Some(MessagePort::from_sender(
                self.origin.clone(),
                request.controller,
            )),
            requested_song: request.song_id,
            close_token: close_token.clone(),
        };

        (self.launcher)(context).map_err(|e| CoreError::WindowOpen {
            reason: e.to_string(),
        })?;
        info!(target: LOG_TARGET, "Opened player window (song {:?})", request.song_id);

        Ok(Box::new(LocalWindow { port, close_token }))
    }
}

struct LocalWindow {
    port: MessagePort,
    close_token: CancellationToken,
}

impl PlayerWindow for LocalWindow {
    fn post(&self, message: &WindowMessage) -> Result<()> {
        if self.close_token.is_cancelled() {
            return Err(CoreError::WindowClosed);
        }
        self.port.post(message)
    }

    fn is_closed(&self) -> bool {
        self.close_token.is_cancelled() || self.port.is_closed()
    }

    fn close(&mut self) {
        self.close_token.cancel();
    }
}
