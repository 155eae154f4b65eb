//! Player window orchestration.
//!
//! [`Player`] ties the playback session, the audio output and the
//! highlighter together. [`Player::run`] is a single task: clock events,
//! frame ticks, user commands and cross-window messages are handled one at a
//! time, so a song change always completes (audio loaded, lyrics parsed)
//! before the next clock sample is looked at.

use crate::audio::{AudioOutput, ClockEvent};
use crate::config::PlayerConfig;
use crate::connector::PlayerEndpoint;
use crate::controls::{map_key, ControlAction, KeyPress};
use crate::error::StoreError;
use crate::highlight::{frame_interval, FrameCoalescer, Highlighter};
use crate::lrc::LyricsDocument;
use crate::protocol::{PostedMessage, WindowMessage};
use crate::render::HighlightTarget;
use crate::session::{Navigation, PlaybackSession};
use crate::store::{PlayerSettings, SettingsPatch, SettingsStore, SongId, SongRecord, SongStore};
use crate::window::PlayerWindowContext;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "melodeck::player";

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A short user-facing message, like a toast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Events published by the player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// A song was loaded and started
    SongChanged { song: SongRecord, index: usize },
    /// Nothing is loaded
    NoSong,
    LyricsLoaded {
        song_id: SongId,
        line_count: usize,
        enhanced: bool,
    },
    LyricsCleared,
    /// The active lyric line changed
    HighlightChanged {
        active_line: Option<usize>,
        text: Option<String>,
    },
    PlayStateChanged { playing: bool },
    ShuffleChanged(bool),
    RepeatChanged(bool),
    /// The last song finished and there is nothing after it
    PlaybackEnded,
    Notice(Notice),
}

/// Requests from the player window's own UI
pub enum PlayerCommand {
    TogglePlay,
    Next,
    Previous,
    ToggleShuffle,
    ToggleRepeat,
    Seek(f64),
    SetVolume(u8),
    LoadSong(SongId),
    Key(KeyPress),
    /// Show lyrics in a second view kept in lockstep with the main one
    OpenMirror(Box<dyn HighlightTarget>),
    CloseMirror,
}

impl std::fmt::Debug for PlayerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TogglePlay => f.write_str("TogglePlay"),
            Self::Next => f.write_str("Next"),
            Self::Previous => f.write_str("Previous"),
            Self::ToggleShuffle => f.write_str("ToggleShuffle"),
            Self::ToggleRepeat => f.write_str("ToggleRepeat"),
            Self::Seek(position) => f.debug_tuple("Seek").field(position).finish(),
            Self::SetVolume(volume) => f.debug_tuple("SetVolume").field(volume).finish(),
            Self::LoadSong(id) => f.debug_tuple("LoadSong").field(id).finish(),
            Self::Key(press) => f.debug_tuple("Key").field(press).finish(),
            Self::OpenMirror(_) => f.write_str("OpenMirror"),
            Self::CloseMirror => f.write_str("CloseMirror"),
        }
    }
}

/// Link between a player and the controller window that opened it
pub struct WindowLink {
    pub endpoint: PlayerEndpoint,
    pub inbox: mpsc::UnboundedReceiver<PostedMessage>,
    /// Cancelled when the controller closes this window
    pub close_token: CancellationToken,
}

impl WindowLink {
    /// Split a window context into the link and the song requested at launch
    #[must_use]
    pub fn from_context(context: PlayerWindowContext) -> (Self, Option<SongId>) {
        let link = Self {
            endpoint: PlayerEndpoint::new(context.origin, context.opener),
            inbox: context.inbox,
            close_token: context.close_token,
        };
        (link, context.requested_song)
    }
}

/// Event sources the player loop listens to
pub struct PlayerIo {
    pub clock: mpsc::UnboundedReceiver<ClockEvent>,
    pub commands: mpsc::Receiver<PlayerCommand>,
    pub window: Option<WindowLink>,
    pub requested_song: Option<SongId>,
}

/// The player window
pub struct Player {
    session: PlaybackSession,
    highlighter: Highlighter,
    coalescer: FrameCoalescer,
    songs: Arc<dyn SongStore>,
    settings: Arc<dyn SettingsStore>,
    audio: Arc<dyn AudioOutput>,
    config: PlayerConfig,
    current: Option<SongRecord>,
    /// Clock samples are stale until the loaded song reports its duration
    awaiting_duration: bool,
    event_tx: broadcast::Sender<PlayerEvent>,
}

impl Player {
    #[must_use]
    pub fn new(
        songs: Arc<dyn SongStore>,
        settings: Arc<dyn SettingsStore>,
        audio: Arc<dyn AudioOutput>,
        config: PlayerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            session: PlaybackSession::new(settings.clone()),
            highlighter: Highlighter::new(),
            coalescer: FrameCoalescer::new(),
            songs,
            settings,
            audio,
            config,
            current: None,
            awaiting_duration: false,
            event_tx,
        }
    }

    /// Use a seeded random source for shuffle
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.session = PlaybackSession::with_rng(self.settings.clone(), rng);
        self
    }

    /// Render lyrics into `target`
    #[must_use]
    pub fn with_primary(mut self, target: Box<dyn HighlightTarget>) -> Self {
        self.highlighter = Highlighter::with_primary(target);
        self
    }

    /// Subscribe to player events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub const fn session(&self) -> &PlaybackSession {
        &self.session
    }

    #[must_use]
    pub const fn current_song(&self) -> Option<&SongRecord> {
        self.current.as_ref()
    }

    #[must_use]
    pub const fn highlighter(&self) -> &Highlighter {
        &self.highlighter
    }

    /// Restore the persisted session and pick the first song.
    ///
    /// A song requested at launch wins: it is located in the restored
    /// playlist, or the playlist is rebuilt from the whole library. Without a
    /// request the persisted current song is loaded.
    pub async fn start(&mut self, requested: Option<SongId>) {
        let settings = match self.settings.get().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to read settings, using defaults: {}", e);
                PlayerSettings::default()
            }
        };
        self.session.restore(&settings);
        self.audio.set_volume(settings.volume).await;
        info!(
            target: LOG_TARGET,
            "Player starting: {} songs in session, shuffle={}, repeat={}",
            self.session.len(),
            self.session.shuffle(),
            self.session.repeat()
        );

        match requested {
            Some(id) => self.load_song(id).await,
            None if !self.session.is_empty() => {
                let index = self.session.current_index();
                if let Some(id) = self.session.go_to_index(index).await {
                    self.load_song(id).await;
                }
            }
            None => self.show_no_song(),
        }
    }

    /// Load `id`, show its lyrics and start playing.
    ///
    /// The session moves to `id`; a song outside the current playlist gets a
    /// playlist rebuilt from the whole library. Failures become notices;
    /// nothing plays.
    pub async fn load_song(&mut self, id: SongId) {
        let song = match self.songs.get_by_id(id).await {
            Ok(song) => song,
            Err(StoreError::NotFound { .. }) => {
                warn!(target: LOG_TARGET, "Song {} not found", id);
                self.notify(NoticeLevel::Error, "Song not found");
                self.show_no_song();
                return;
            }
            Err(e) => {
                error!(target: LOG_TARGET, "Failed to read song {}: {}", id, e);
                self.notify(NoticeLevel::Error, "Error loading song");
                self.show_no_song();
                return;
            }
        };

        if let Err(e) = self.audio.load(&song).await {
            error!(target: LOG_TARGET, "Failed to load audio for song {}: {}", id, e);
            self.notify(NoticeLevel::Error, "Error loading song");
            self.show_no_song();
            return;
        }
        self.awaiting_duration = true;
        self.coalescer.cancel();
        if !self.session.update_current_song(id).await {
            self.rebuild_playlist_around(id).await;
        }

        self.load_lyrics(&song);

        info!(target: LOG_TARGET, "Now playing: {} - {}", song.artist, song.title);
        self.current = Some(song.clone());
        let _ = self.event_tx.send(PlayerEvent::SongChanged {
            song,
            index: self.session.current_index(),
        });

        self.audio.play().await;
        self.emit_play_state().await;
    }

    /// Advance to the next song. Returns `false` at a boundary.
    pub async fn play_next(&mut self) -> bool {
        match self.session.next_index() {
            Navigation::To(index) => {
                self.go_to(index).await;
                true
            }
            Navigation::EndOfPlaylist => {
                self.notify(NoticeLevel::Info, "End of playlist");
                false
            }
            Navigation::StartOfPlaylist | Navigation::Empty => {
                self.notify(NoticeLevel::Warning, "Playlist is empty");
                false
            }
        }
    }

    /// Go back one song, or restart the current one if it has played long
    /// enough.
    pub async fn play_previous(&mut self) -> bool {
        if self.audio.current_time().await > self.config.restart_threshold_secs {
            debug!(target: LOG_TARGET, "Restarting current song");
            self.audio.restart().await;
            return true;
        }

        match self.session.previous_index() {
            Navigation::To(index) => {
                self.go_to(index).await;
                true
            }
            Navigation::StartOfPlaylist => {
                self.notify(NoticeLevel::Info, "At beginning of playlist");
                false
            }
            Navigation::EndOfPlaylist | Navigation::Empty => {
                self.notify(NoticeLevel::Warning, "Playlist is empty");
                false
            }
        }
    }

    pub async fn toggle_play(&mut self) {
        if !self.audio.has_song().await {
            self.notify(NoticeLevel::Warning, "No song loaded");
            return;
        }
        self.audio.toggle().await;
        self.emit_play_state().await;
    }

    pub async fn toggle_shuffle(&mut self) {
        let shuffle = self.session.toggle_shuffle().await;
        let _ = self.event_tx.send(PlayerEvent::ShuffleChanged(shuffle));
        self.notify(NoticeLevel::Info, if shuffle { "Shuffle On" } else { "Shuffle Off" });
    }

    pub async fn toggle_repeat(&mut self) {
        let repeat = self.session.toggle_repeat().await;
        let _ = self.event_tx.send(PlayerEvent::RepeatChanged(repeat));
        self.notify(NoticeLevel::Info, if repeat { "Repeat On" } else { "Repeat Off" });
    }

    pub async fn set_volume(&mut self, volume: u8) {
        let volume = self.audio.set_volume(volume).await;
        if let Err(e) = self.settings.set(SettingsPatch::volume(volume)).await {
            warn!(target: LOG_TARGET, "Failed to persist volume: {}", e);
        }
    }

    /// Attach a mirror view. Refused with a warning when no song is loaded.
    pub fn open_mirror(&mut self, target: Box<dyn HighlightTarget>) {
        if self.current.is_none() {
            self.notify(NoticeLevel::Warning, "No song loaded");
            return;
        }
        self.highlighter.attach_mirror(target);
        debug!(target: LOG_TARGET, "Mirror view opened");
    }

    pub fn close_mirror(&mut self) {
        if self.highlighter.detach_mirror().is_some() {
            debug!(target: LOG_TARGET, "Mirror view closed");
        }
    }

    /// Apply a command from the player UI
    pub async fn handle_command(&mut self, command: PlayerCommand) {
        debug!(target: LOG_TARGET, "Command: {:?}", command);
        match command {
            PlayerCommand::TogglePlay => self.toggle_play().await,
            PlayerCommand::Next => {
                self.play_next().await;
            }
            PlayerCommand::Previous => {
                self.play_previous().await;
            }
            PlayerCommand::ToggleShuffle => self.toggle_shuffle().await,
            PlayerCommand::ToggleRepeat => self.toggle_repeat().await,
            PlayerCommand::Seek(position) => self.audio.seek(position).await,
            PlayerCommand::SetVolume(volume) => self.set_volume(volume).await,
            PlayerCommand::LoadSong(id) => self.load_song(id).await,
            PlayerCommand::Key(press) => match map_key(press) {
                Some(ControlAction::TogglePlay) => self.toggle_play().await,
                Some(ControlAction::Next) => {
                    self.play_next().await;
                }
                Some(ControlAction::Previous) => {
                    self.play_previous().await;
                }
                Some(ControlAction::CloseMirror) => self.close_mirror(),
                None => {}
            },
            PlayerCommand::OpenMirror(target) => self.open_mirror(target),
            PlayerCommand::CloseMirror => self.close_mirror(),
        }
    }

    /// Apply a message from the controller window
    pub async fn handle_window_message(&mut self, message: WindowMessage) {
        info!(target: LOG_TARGET, "Received {} from controller", message.kind());
        match message {
            WindowMessage::PlaySong {
                song_id,
                playlist,
                current_index,
            } => {
                self.session.set_playlist(playlist, current_index).await;
                self.load_song(song_id).await;
            }
            WindowMessage::SetPlaylist {
                song_ids,
                current_index,
                play_now,
            } => {
                let song = song_ids.get(current_index).copied();
                self.session.set_playlist(song_ids, current_index).await;
                if let Some(id) = song.filter(|_| play_now) {
                    self.load_song(id).await;
                }
            }
            WindowMessage::PlayerReady | WindowMessage::PlayerClosed => {}
        }
    }

    /// Apply a clock event
    pub async fn handle_clock(&mut self, event: ClockEvent) {
        match event {
            ClockEvent::TimeUpdate { position } => {
                if !self.awaiting_duration {
                    self.coalescer.submit(position);
                }
            }
            ClockEvent::DurationKnown { duration } => {
                debug!(target: LOG_TARGET, "Duration known: {:.1}s", duration);
                self.awaiting_duration = false;
            }
            ClockEvent::Ended if self.awaiting_duration => {
                debug!(target: LOG_TARGET, "Ignoring end of the previous song");
            }
            ClockEvent::Ended => {
                debug!(target: LOG_TARGET, "Song ended");
                if !self.play_next().await {
                    let _ = self.event_tx.send(PlayerEvent::PlaybackEnded);
                    self.emit_play_state().await;
                }
            }
        }
    }

    /// Run the highlight for the latest pending sample, if any
    pub fn render_frame(&mut self) {
        let Some(time) = self.coalescer.take() else {
            return;
        };
        let Some(update) = self.highlighter.update(time) else {
            return;
        };
        if update.line_changed {
            let active_line = update.snapshot.state.active_line;
            let text = active_line.and_then(|index| {
                self.highlighter
                    .document()
                    .and_then(|doc| doc.lines.get(index))
                    .map(|line| line.text.clone())
            });
            let _ = self
                .event_tx
                .send(PlayerEvent::HighlightChanged { active_line, text });
        }
    }

    /// Run the player until cancelled or its window is closed
    pub async fn run(mut self, mut io: PlayerIo, cancel_token: CancellationToken) {
        self.start(io.requested_song).await;

        let (close_token, mut inbox, endpoint) = match io.window.take() {
            Some(link) => (link.close_token, Some(link.inbox), Some(link.endpoint)),
            None => (CancellationToken::new(), None, None),
        };
        if let Some(endpoint) = &endpoint {
            if let Err(e) = endpoint.announce_ready() {
                warn!(target: LOG_TARGET, "Failed to announce readiness: {}", e);
            }
        }

        let mut frames = frame_interval(self.config.frame_rate);
        info!(target: LOG_TARGET, "Player loop running at {} fps", self.config.frame_rate);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: LOG_TARGET, "Player shutting down");
                    break;
                }
                () = close_token.cancelled() => {
                    info!(target: LOG_TARGET, "Player window closed by controller");
                    break;
                }
                Some(event) = io.clock.recv() => self.handle_clock(event).await,
                _ = frames.tick(), if self.coalescer.is_pending() => self.render_frame(),
                Some(command) = io.commands.recv() => self.handle_command(command).await,
                Some(posted) = recv_optional(&mut inbox) => {
                    let accepted = endpoint.as_ref().and_then(|endpoint| endpoint.accept(posted));
                    if let Some(message) = accepted {
                        self.handle_window_message(message).await;
                    }
                }
            }
        }

        self.audio.pause().await;
        if let Some(endpoint) = &endpoint {
            // The controller may already be gone
            let _ = endpoint.announce_closed();
        }
    }

    async fn go_to(&mut self, index: usize) {
        if let Some(id) = self.session.go_to_index(index).await {
            self.load_song(id).await;
        }
    }

    async fn rebuild_playlist_around(&mut self, id: SongId) {
        match self.songs.get_all().await {
            Ok(songs) => {
                let ids: Vec<SongId> = songs.iter().map(|song| song.id).collect();
                let index = ids.iter().position(|song| *song == id).unwrap_or(0);
                self.session.set_playlist(ids, index).await;
            }
            Err(e) => warn!(target: LOG_TARGET, "Failed to list songs: {}", e),
        }
    }

    fn load_lyrics(&mut self, song: &SongRecord) {
        let document = song
            .lyrics
            .as_deref()
            .map(LyricsDocument::parse)
            .filter(|doc| !doc.is_empty());

        match document {
            Some(document) => {
                info!(
                    target: LOG_TARGET,
                    "Loaded {} lyric lines ({:?}) for song {}",
                    document.len(),
                    document.format,
                    song.id
                );
                let _ = self.event_tx.send(PlayerEvent::LyricsLoaded {
                    song_id: song.id,
                    line_count: document.len(),
                    enhanced: document.is_enhanced(),
                });
                self.highlighter.load(document);
            }
            None => {
                debug!(target: LOG_TARGET, "No lyrics for song {}", song.id);
                self.highlighter.clear();
                let _ = self.event_tx.send(PlayerEvent::LyricsCleared);
            }
        }
    }

    fn show_no_song(&mut self) {
        self.current = None;
        self.coalescer.cancel();
        self.highlighter.clear();
        let _ = self.event_tx.send(PlayerEvent::NoSong);
    }

    async fn emit_play_state(&self) {
        let playing = self.audio.is_playing().await;
        let _ = self.event_tx.send(PlayerEvent::PlayStateChanged { playing });
    }

    fn notify(&self, level: NoticeLevel, message: &str) {
        let _ = self.event_tx.send(PlayerEvent::Notice(Notice {
            level,
            message: message.to_string(),
        }));
    }
}

async fn recv_optional<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
