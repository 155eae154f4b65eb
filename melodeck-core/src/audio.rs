//! Audio output seam and the clock events that drive lyric highlighting.

use crate::error::{CoreError, Result};
use crate::store::{SongId, SongRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const LOG_TARGET: &str = "melodeck::audio";

/// Signals from the audio clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockEvent {
    /// Current playback position in seconds
    TimeUpdate { position: f64 },
    /// Duration of the loaded song became known
    DurationKnown { duration: f64 },
    /// The loaded song played to its end
    Ended,
}

/// Something that plays songs and reports a clock.
///
/// Clock events are delivered out of band, on the channel the
/// implementation was created with.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Load `song`, replacing whatever was loaded. Playback starts paused at 0.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AudioLoad`] if the song cannot be loaded.
    async fn load(&self, song: &SongRecord) -> Result<()>;

    async fn play(&self);

    async fn pause(&self);

    /// Flip between playing and paused. Returns `false` when no song is loaded.
    async fn toggle(&self) -> bool;

    /// Seek to the start of the loaded song.
    async fn restart(&self);

    async fn seek(&self, position: f64);

    /// Playback position in seconds
    async fn current_time(&self) -> f64;

    async fn is_playing(&self) -> bool;

    async fn has_song(&self) -> bool;

    /// Set volume, clamped to 0..=100, and return the applied value.
    async fn set_volume(&self, volume: u8) -> u8;
}

#[derive(Debug)]
struct ClockState {
    song: Option<SongId>,
    /// Position at `anchor`
    position: f64,
    anchor: Instant,
    duration: f64,
    playing: bool,
    volume: u8,
}

impl ClockState {
    fn position_now(&self) -> f64 {
        if !self.playing {
            return self.position;
        }
        let elapsed = self.anchor.elapsed().as_secs_f64();
        (self.position + elapsed).min(self.duration)
    }

    fn set_position(&mut self, position: f64) {
        self.position = position.clamp(0.0, self.duration);
        self.anchor = Instant::now();
    }
}

/// Audio output that advances a virtual position in wall time.
///
/// Nothing is decoded. While playing, [`SimulatedAudio::run`] emits a
/// `TimeUpdate` every tick and `Ended` once the duration is reached.
pub struct SimulatedAudio {
    state: RwLock<ClockState>,
    events: mpsc::UnboundedSender<ClockEvent>,
    tick_interval: Duration,
    fallback_duration: f64,
}

impl SimulatedAudio {
    /// Create an output and the receiver for its clock events
    #[must_use]
    pub fn new(
        tick_interval: Duration,
        fallback_duration: f64,
        volume: u8,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ClockEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let audio = Arc::new(Self {
            state: RwLock::new(ClockState {
                song: None,
                position: 0.0,
                anchor: Instant::now(),
                duration: 0.0,
                playing: false,
                volume: volume.min(100),
            }),
            events,
            tick_interval,
            fallback_duration,
        });
        (audio, rx)
    }

    /// Id of the loaded song
    pub async fn loaded_song(&self) -> Option<SongId> {
        self.state.read().await.song
    }

    pub async fn volume(&self) -> u8 {
        self.state.read().await.volume
    }

    /// Emit clock events until cancelled
    pub async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!(target: LOG_TARGET, "Simulated audio clock stopped");
                    break;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let mut state = self.state.write().await;
        if !state.playing {
            return;
        }

        let position = state.position_now();
        if position >= state.duration {
            let end = state.duration;
            state.set_position(end);
            state.playing = false;
            drop(state);
            self.emit(ClockEvent::TimeUpdate { position: end });
            self.emit(ClockEvent::Ended);
        } else {
            drop(state);
            self.emit(ClockEvent::TimeUpdate { position });
        }
    }

    fn emit(&self, event: ClockEvent) {
        // The player may have shut down first
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl AudioOutput for SimulatedAudio {
    async fn load(&self, song: &SongRecord) -> Result<()> {
        if song.src.trim().is_empty() {
            return Err(CoreError::AudioLoad {
                song_id: song.id,
                reason: "song has no audio source".to_string(),
            });
        }

        let duration = song
            .duration_secs
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(self.fallback_duration);

        {
            let mut state = self.state.write().await;
            state.song = Some(song.id);
            state.duration = duration;
            state.playing = false;
            state.set_position(0.0);
        }

        info!(target: LOG_TARGET, "Loaded song {} ({:.1}s): {}", song.id, duration, song.src);
        self.emit(ClockEvent::DurationKnown { duration });
        Ok(())
    }

    async fn play(&self) {
        let mut state = self.state.write().await;
        if state.song.is_none() || state.playing {
            return;
        }
        if state.position >= state.duration {
            state.set_position(0.0);
        }
        state.anchor = Instant::now();
        state.playing = true;
    }

    async fn pause(&self) {
        let mut state = self.state.write().await;
        if state.playing {
            let position = state.position_now();
            state.set_position(position);
            state.playing = false;
        }
    }

    async fn toggle(&self) -> bool {
        let (has_song, playing) = {
            let state = self.state.read().await;
            (state.song.is_some(), state.playing)
        };
        if !has_song {
            return false;
        }
        if playing {
            self.pause().await;
        } else {
            self.play().await;
        }
        true
    }

    async fn restart(&self) {
        self.seek(0.0).await;
    }

    async fn seek(&self, position: f64) {
        let position = {
            let mut state = self.state.write().await;
            if state.song.is_none() {
                return;
            }
            state.set_position(position);
            state.position
        };
        self.emit(ClockEvent::TimeUpdate { position });
    }

    async fn current_time(&self) -> f64 {
        self.state.read().await.position_now()
    }

    async fn is_playing(&self) -> bool {
        self.state.read().await.playing
    }

    async fn has_song(&self) -> bool {
        self.state.read().await.song.is_some()
    }

    async fn set_volume(&self, volume: u8) -> u8 {
        let volume = volume.min(100);
        self.state.write().await.volume = volume;
        volume
    }
}
