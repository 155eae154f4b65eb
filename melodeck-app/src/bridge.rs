use melodeck_core::{NoticeLevel, PlayerEvent};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "melodeck::bridge";

/// Log every player event until the player goes away
pub async fn log_player_events(mut rx: broadcast::Receiver<PlayerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_player_event(&event),
            Err(broadcast::error::RecvError::Closed) => {
                info!(target: LOG_TARGET, "Player event channel closed");
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                info!(target: LOG_TARGET, "Missed {} player events", n);
            }
        }
    }
}

fn log_player_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::SongChanged { song, index } => {
            info!(
                target: LOG_TARGET,
                "Song changed: {} - {} [{}] (#{} in playlist)",
                song.artist,
                song.title,
                song.album,
                index + 1
            );
        }
        PlayerEvent::NoSong => {
            info!(target: LOG_TARGET, "No song loaded");
        }
        PlayerEvent::LyricsLoaded {
            line_count,
            enhanced,
            ..
        } => {
            info!(
                target: LOG_TARGET,
                "Lyrics loaded: {} lines{}",
                line_count,
                if *enhanced { " (word timing)" } else { "" }
            );
        }
        PlayerEvent::LyricsCleared => {
            info!(target: LOG_TARGET, "No lyrics for current song");
        }
        PlayerEvent::HighlightChanged { .. } => {
            // Drawn by the console target
        }
        PlayerEvent::PlayStateChanged { playing } => {
            debug!(target: LOG_TARGET, "Playing: {}", playing);
        }
        PlayerEvent::ShuffleChanged(on) => {
            debug!(target: LOG_TARGET, "Shuffle: {}", on);
        }
        PlayerEvent::RepeatChanged(on) => {
            debug!(target: LOG_TARGET, "Repeat: {}", on);
        }
        PlayerEvent::PlaybackEnded => {
            info!(target: LOG_TARGET, "Playback ended");
        }
        PlayerEvent::Notice(notice) => match notice.level {
            NoticeLevel::Info => info!(target: LOG_TARGET, "{}", notice.message),
            NoticeLevel::Warning => warn!(target: LOG_TARGET, "{}", notice.message),
            NoticeLevel::Error => error!(target: LOG_TARGET, "{}", notice.message),
        },
    }
}
