//! Saved playlists from the command line.

use crate::cli::PlaylistCommand;
use melodeck_core::{
    Library, NewPlaylist, PlaylistRecord, PlaylistStore, PlaylistUpdate, SongId, StoreError,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("No playlist named {0:?}")]
    UnknownPlaylist(String),

    #[error("Playlist is empty: {0}")]
    EmptyPlaylist(String),

    #[error("Song {song} is not in playlist {playlist:?}")]
    NotInPlaylist { song: SongId, playlist: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Look up a playlist by name, ignoring case
pub async fn find(library: &Library, name: &str) -> Result<PlaylistRecord, PlaylistError> {
    library
        .find_playlist_by_name(name)
        .await?
        .ok_or_else(|| PlaylistError::UnknownPlaylist(name.to_string()))
}

/// The songs of a saved playlist and the index to start at: the position of
/// `song`, or the first song
pub async fn queue(
    library: &Library,
    name: &str,
    song: Option<SongId>,
) -> Result<(Vec<SongId>, usize), PlaylistError> {
    let playlist = find(library, name).await?;
    let song_ids = library.playlist_song_ids(playlist.id).await?;
    if song_ids.is_empty() {
        return Err(PlaylistError::EmptyPlaylist(playlist.name));
    }

    let index = match song {
        Some(song) => song_ids
            .iter()
            .position(|id| *id == song)
            .ok_or(PlaylistError::NotInPlaylist {
                song,
                playlist: playlist.name,
            })?,
        None => 0,
    };
    Ok((song_ids, index))
}

/// Append `songs` to the playlist called `name`, creating it first if needed.
/// Songs already in it are skipped.
pub async fn append(
    library: &Library,
    name: &str,
    songs: &[SongId],
) -> Result<PlaylistRecord, PlaylistError> {
    let playlist = match library.find_playlist_by_name(name).await? {
        Some(playlist) => playlist,
        None => {
            library
                .create_playlist(NewPlaylist {
                    name: name.to_string(),
                    ..NewPlaylist::default()
                })
                .await?
        }
    };

    let mut added = 0;
    for song in songs {
        match library.add_song_to_playlist(playlist.id, *song).await {
            Ok(position) => {
                debug!("Song {} is #{} in {}", song, position + 1, playlist.name);
                added += 1;
            }
            Err(StoreError::ConstraintViolation { reason }) => debug!("Skipped: {}", reason),
            Err(e) => return Err(e.into()),
        }
    }
    info!("Added {} song(s) to playlist {}", added, playlist.name);
    Ok(playlist)
}

/// Run one `melodeck playlist` subcommand
pub async fn run(library: &Library, command: PlaylistCommand) -> Result<(), PlaylistError> {
    match command {
        PlaylistCommand::List => {
            for playlist in library.get_playlists().await? {
                let count = library.playlist_song_ids(playlist.id).await?.len();
                println!("{:>4}  {} ({} songs)", playlist.id, playlist.name, count);
            }
        }
        PlaylistCommand::Show { name } => {
            let playlist = find(library, &name).await?;
            let full = library.playlist_with_songs(playlist.id).await?;
            println!("{}", full.playlist.name);
            if !full.playlist.description.is_empty() {
                println!("  {}", full.playlist.description);
            }
            for (position, song) in full.songs.iter().enumerate() {
                println!("{:>3}. #{} {} - {}", position + 1, song.id, song.artist, song.title);
            }
        }
        PlaylistCommand::Create { name, description } => {
            let playlist = library
                .create_playlist(NewPlaylist {
                    name,
                    description,
                    cover_image: None,
                })
                .await?;
            info!("Created playlist #{}: {}", playlist.id, playlist.name);
        }
        PlaylistCommand::Edit {
            name,
            rename,
            description,
        } => {
            let playlist = find(library, &name).await?;
            let updated = library
                .update_playlist(
                    playlist.id,
                    PlaylistUpdate {
                        name: rename,
                        description,
                        cover_image: None,
                    },
                )
                .await?;
            info!("Updated playlist #{}: {}", updated.id, updated.name);
        }
        PlaylistCommand::Delete { name } => {
            let playlist = find(library, &name).await?;
            library.delete_playlist(playlist.id).await?;
            info!("Deleted playlist {}", playlist.name);
        }
        PlaylistCommand::Add { name, song_ids } => {
            let playlist = find(library, &name).await?;
            for song in song_ids {
                library.add_song_to_playlist(playlist.id, song).await?;
            }
        }
        PlaylistCommand::Remove { name, song_ids } => {
            let playlist = find(library, &name).await?;
            for song in song_ids {
                library.remove_song_from_playlist(playlist.id, song).await?;
            }
        }
        PlaylistCommand::Order { name, song_ids } => {
            let playlist = find(library, &name).await?;
            library.reorder_playlist(playlist.id, &song_ids).await?;
        }
    }
    Ok(())
}
