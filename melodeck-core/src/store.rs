//! Storage seams for song records, named playlists and player settings.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Song identifier as used by the library and the cross-window protocol
pub type SongId = i64;

pub type PlaylistId = i64;

pub const DEFAULT_ARTIST: &str = "Unknown Artist";
pub const DEFAULT_ALBUM: &str = "Unknown Album";
pub const DEFAULT_VOLUME: u8 = 70;

/// A song as stored in the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRecord {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: Option<i32>,
    /// Audio source location
    pub src: String,
    pub image: Option<String>,
    /// Raw LRC text, standard or enhanced
    pub lyrics: Option<String>,
    pub duration_secs: Option<f64>,
}

impl SongRecord {
    #[must_use]
    pub fn has_lyrics(&self) -> bool {
        self.lyrics.as_deref().is_some_and(|text| !text.trim().is_empty())
    }
}

/// Fields for a song that has not been stored yet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSong {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i32>,
    pub src: String,
    pub image: Option<String>,
    pub lyrics: Option<String>,
    pub duration_secs: Option<f64>,
}

/// A named, ordered list of songs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRecord {
    pub id: PlaylistId,
    pub name: String,
    pub description: String,
    pub cover_image: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Fields for a playlist that has not been stored yet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPlaylist {
    pub name: String,
    pub description: Option<String>,
    pub cover_image: Option<String>,
}

/// Partial update for a playlist; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cover_image: Option<String>,
}

/// A playlist with its songs in playlist order
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistWithSongs {
    pub playlist: PlaylistRecord,
    pub songs: Vec<SongRecord>,
}

impl PlaylistWithSongs {
    #[must_use]
    pub fn song_ids(&self) -> Vec<SongId> {
        self.songs.iter().map(|song| song.id).collect()
    }
}

/// Persisted player state, shared by every player window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerSettings {
    pub shuffle: bool,
    pub repeat: bool,
    pub volume: u8,
    pub current_playlist: Vec<SongId>,
    pub current_song_index: usize,
    pub last_played: Option<DateTime<Utc>>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            shuffle: false,
            repeat: false,
            volume: DEFAULT_VOLUME,
            current_playlist: Vec::new(),
            current_song_index: 0,
            last_played: None,
        }
    }
}

impl PlayerSettings {
    /// Merge `patch` into these settings.
    ///
    /// Volume is clamped to 0..=100. A patch touching the playlist or the
    /// index stamps `last_played`.
    pub fn apply(&mut self, patch: SettingsPatch) {
        let position_changed =
            patch.current_playlist.is_some() || patch.current_song_index.is_some();

        if let Some(shuffle) = patch.shuffle {
            self.shuffle = shuffle;
        }
        if let Some(repeat) = patch.repeat {
            self.repeat = repeat;
        }
        if let Some(volume) = patch.volume {
            self.volume = volume.min(100);
        }
        if let Some(playlist) = patch.current_playlist {
            self.current_playlist = playlist;
        }
        if let Some(index) = patch.current_song_index {
            self.current_song_index = index;
        }
        if position_changed {
            self.last_played = Some(Utc::now());
        }
    }

    /// Song id at the persisted index, if the index is valid
    #[must_use]
    pub fn current_song(&self) -> Option<SongId> {
        self.current_playlist.get(self.current_song_index).copied()
    }
}

/// Partial update for [`PlayerSettings`]; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub shuffle: Option<bool>,
    pub repeat: Option<bool>,
    pub volume: Option<u8>,
    pub current_playlist: Option<Vec<SongId>>,
    pub current_song_index: Option<usize>,
}

impl SettingsPatch {
    #[must_use]
    pub fn position(playlist: Vec<SongId>, index: usize) -> Self {
        Self {
            current_playlist: Some(playlist),
            current_song_index: Some(index),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn shuffle(shuffle: bool) -> Self {
        Self {
            shuffle: Some(shuffle),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn repeat(repeat: bool) -> Self {
        Self {
            repeat: Some(repeat),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn volume(volume: u8) -> Self {
        Self {
            volume: Some(volume),
            ..Self::default()
        }
    }
}

/// Read access to the song library
#[async_trait]
pub trait SongStore: Send + Sync {
    /// Fetch one song.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no song has this id, or
    /// [`StoreError::Io`] if the store cannot be read.
    async fn get_by_id(&self, id: SongId) -> Result<SongRecord, StoreError>;

    /// All songs ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store cannot be read.
    async fn get_all(&self) -> Result<Vec<SongRecord>, StoreError>;
}

/// Named playlists and their ordered membership.
///
/// A song appears at most once per playlist. Positions are contiguous from 0.
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    /// Create a playlist with no songs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConstraintViolation`] if the name is blank or
    /// already taken, ignoring case.
    async fn create_playlist(&self, playlist: NewPlaylist) -> Result<PlaylistRecord, StoreError>;

    /// Merge `update` into a playlist and stamp `updated`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id, or
    /// [`StoreError::ConstraintViolation`] for a blank or taken name.
    async fn update_playlist(
        &self,
        id: PlaylistId,
        update: PlaylistUpdate,
    ) -> Result<PlaylistRecord, StoreError>;

    /// Delete a playlist and its membership. The songs stay in the library.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    async fn delete_playlist(&self, id: PlaylistId) -> Result<(), StoreError>;

    /// All playlists ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store cannot be read.
    async fn get_playlists(&self) -> Result<Vec<PlaylistRecord>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    async fn get_playlist(&self, id: PlaylistId) -> Result<PlaylistRecord, StoreError>;

    /// Case-insensitive lookup by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store cannot be read.
    async fn find_playlist_by_name(&self, name: &str)
        -> Result<Option<PlaylistRecord>, StoreError>;

    /// Song ids of a playlist in playlist order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown playlist.
    async fn playlist_song_ids(&self, id: PlaylistId) -> Result<Vec<SongId>, StoreError>;

    /// The playlist and its songs in playlist order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown playlist.
    async fn playlist_with_songs(&self, id: PlaylistId) -> Result<PlaylistWithSongs, StoreError>;

    /// Append a song and return its position.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the playlist or the song does not
    /// exist, or [`StoreError::ConstraintViolation`] if the song is already in
    /// the playlist.
    async fn add_song_to_playlist(
        &self,
        playlist: PlaylistId,
        song: SongId,
    ) -> Result<usize, StoreError>;

    /// Remove a song; the songs after it move up one place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the song is not in the playlist.
    async fn remove_song_from_playlist(
        &self,
        playlist: PlaylistId,
        song: SongId,
    ) -> Result<(), StoreError>;

    /// Put the songs of a playlist in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConstraintViolation`] unless `order` holds
    /// exactly the songs already in the playlist.
    async fn reorder_playlist(&self, playlist: PlaylistId, order: &[SongId])
        -> Result<(), StoreError>;
}

/// Persisted player settings.
///
/// Every writer does its own read-modify-write; concurrent writers from two
/// player windows overwrite each other and the last one wins.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stored settings, or defaults if nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or decoded.
    async fn get(&self) -> Result<PlayerSettings, StoreError>;

    /// Merge `patch` into the stored settings and return the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read, encoded or written.
    async fn set(&self, patch: SettingsPatch) -> Result<PlayerSettings, StoreError>;
}
