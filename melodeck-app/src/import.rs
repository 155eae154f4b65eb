use melodeck_core::lrc::TRAILING_GRACE_SECS;
use melodeck_core::time::parse_timestamp;
use melodeck_core::{Library, LyricsDocument, NewSong, SongId};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "m4a", "flac", "wav"];

/// Add one song per `.lrc` file. Returns the ids of the songs added.
pub async fn import_files(library: &Library, files: &[PathBuf]) -> Vec<SongId> {
    let mut added = Vec::new();
    for path in files {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };

        let song = song_from_lrc(path, &content);
        match library.add_song(song).await {
            Ok(record) => {
                info!(
                    "Imported #{}: {} - {} ({})",
                    record.id,
                    record.artist,
                    record.title,
                    if record.has_lyrics() { "with lyrics" } else { "no lyrics" }
                );
                added.push(record.id);
            }
            Err(e) => error!("Failed to import {}: {}", path.display(), e),
        }
    }
    added
}

/// Build a song record from LRC text. Tags fill in the metadata; the file
/// name is the fallback title.
fn song_from_lrc(path: &Path, content: &str) -> NewSong {
    let document = LyricsDocument::parse(content);
    let metadata = &document.metadata;

    let title = metadata
        .title()
        .map(str::to_string)
        .or_else(|| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let duration_secs = metadata
        .get("length")
        .map(parse_timestamp)
        .filter(|secs| *secs > 0.0)
        .or_else(|| (!document.is_empty()).then(|| document.duration() + TRAILING_GRACE_SECS));

    if document.is_empty() {
        warn!("{} has no timed lyric lines", path.display());
    }

    NewSong {
        title,
        artist: metadata.artist().map(str::to_string),
        album: metadata.album().map(str::to_string),
        src: audio_source(path).to_string_lossy().into_owned(),
        lyrics: (!document.is_empty()).then(|| content.to_string()),
        duration_secs,
        ..NewSong::default()
    }
}

/// The audio file next to `lrc`, or a `.mp3` sibling if none exists yet
fn audio_source(lrc: &Path) -> PathBuf {
    AUDIO_EXTENSIONS
        .iter()
        .map(|ext| lrc.with_extension(ext))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| {
            debug!("No audio file found next to {}", lrc.display());
            lrc.with_extension("mp3")
        })
}
