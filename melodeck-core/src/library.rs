use crate::error::StoreError;
use crate::store::{
    NewPlaylist, NewSong, PlayerSettings, PlaylistId, PlaylistRecord, PlaylistStore,
    PlaylistUpdate, PlaylistWithSongs, SettingsPatch, SettingsStore, SongId, SongRecord,
    SongStore, DEFAULT_ALBUM, DEFAULT_ARTIST,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

const LOG_TARGET: &str = "melodeck::library";

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS songs (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    album TEXT NOT NULL,
    year INTEGER,
    src TEXT NOT NULL,
    image TEXT,
    lyrics TEXT,
    duration_secs REAL
);

CREATE TABLE IF NOT EXISTS playlists (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    description TEXT NOT NULL DEFAULT '',
    cover_image TEXT,
    created TEXT NOT NULL,
    updated TEXT NOT NULL
);

-- Ordered membership; positions are contiguous from 0 within a playlist
CREATE TABLE IF NOT EXISTS playlist_songs (
    playlist_id INTEGER NOT NULL,
    song_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    added TEXT NOT NULL,
    PRIMARY KEY (playlist_id, song_id)
);

-- Key/value documents stored as JSON
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_songs_artist_title ON songs(artist, title);
CREATE INDEX IF NOT EXISTS idx_playlist_songs_position ON playlist_songs(playlist_id, position);
";

const SONG_COLUMNS: &str = "id, title, artist, album, year, src, image, lyrics, duration_secs";
const PLAYLIST_COLUMNS: &str = "id, name, description, cover_image, created, updated";
const PLAYER_SETTINGS_KEY: &str = "player_settings";

/// SQLite-backed song library and settings store
pub struct Library {
    conn: Connection,
}

impl Library {
    /// Open the library at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub async fn new() -> Result<Self, StoreError> {
        Self::open(&crate::paths::library_db_path()).await
    }

    /// Open a library at a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        info!(target: LOG_TARGET, "Opening library database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(tokio_rusqlite::Error::Other(Box::new(e))))?;
        }

        let conn = Connection::open(path).await?;
        Self::init(conn, true).await
    }

    /// Open a private in-memory library
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, false).await
    }

    async fn init(conn: Connection, wal: bool) -> Result<Self, StoreError> {
        conn.call(move |conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            if wal {
                conn.pragma_update(None, "journal_mode", "WAL")?;
            }
            Ok(())
        })
        .await?;

        info!(target: LOG_TARGET, "Library database initialized");
        Ok(Self { conn })
    }

    /// Insert a song and return it with its assigned id
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConstraintViolation`] if the title is blank, or
    /// [`StoreError::Io`] if the insert fails.
    pub async fn add_song(&self, song: NewSong) -> Result<SongRecord, StoreError> {
        let title = song.title.trim().to_string();
        if title.is_empty() {
            return Err(StoreError::ConstraintViolation {
                reason: "song title is required".to_string(),
            });
        }

        let mut record = SongRecord {
            id: 0,
            title,
            artist: non_blank(song.artist).unwrap_or_else(|| DEFAULT_ARTIST.to_string()),
            album: non_blank(song.album).unwrap_or_else(|| DEFAULT_ALBUM.to_string()),
            year: song.year,
            src: song.src,
            image: song.image,
            lyrics: song.lyrics,
            duration_secs: song.duration_secs,
        };
        info!(target: LOG_TARGET, "Adding song to library: {} - {}", record.artist, record.title);

        let row = record.clone();
        record.id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO songs (title, artist, album, year, src, image, lyrics, duration_secs)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
                    rusqlite::params![
                        row.title,
                        row.artist,
                        row.album,
                        row.year,
                        row.src,
                        row.image,
                        row.lyrics,
                        row.duration_secs
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        Ok(record)
    }

    /// Replace the lyrics of a song; `None` removes them
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no song has this id.
    pub async fn update_lyrics(&self, id: SongId, lyrics: Option<String>) -> Result<(), StoreError> {
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE songs SET lyrics = ?1 WHERE id = ?2",
                    rusqlite::params![lyrics, id],
                )?;
                Ok(updated)
            })
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound { entity: "song", id });
        }
        debug!(target: LOG_TARGET, "Updated lyrics for song {}", id);
        Ok(())
    }

    /// Checkpoint WAL for clean shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL checkpoint fails.
    pub async fn checkpoint(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn read_settings(&self) -> Result<Option<String>, StoreError> {
        self.conn
            .call(|conn| {
                let value = conn
                    .prepare_cached("SELECT value FROM settings WHERE key = ?1")?
                    .query_row([PLAYER_SETTINGS_KEY], |row| row.get::<_, String>(0))
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Into::into)
    }
}

/// Result of a playlist membership write, decided inside one transaction
enum MembershipWrite {
    Done(usize),
    MissingPlaylist,
    MissingSong,
    Rejected,
}

fn playlist_name(name: &str) -> Result<String, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::ConstraintViolation {
            reason: "playlist name is required".to_string(),
        });
    }
    Ok(name.to_string())
}

fn playlist_exists(conn: &rusqlite::Connection, id: PlaylistId) -> rusqlite::Result<bool> {
    conn.prepare_cached("SELECT 1 FROM playlists WHERE id = ?1")?
        .exists([id])
}

fn member_ids(conn: &rusqlite::Connection, id: PlaylistId) -> rusqlite::Result<Vec<SongId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT song_id FROM playlist_songs WHERE playlist_id = ?1 ORDER BY position",
    )?;
    let ids = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

fn timestamp(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn playlist_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlaylistRecord> {
    Ok(PlaylistRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        cover_image: row.get(3)?,
        created: timestamp(row, 4)?,
        updated: timestamp(row, 5)?,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn song_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SongRecord> {
    Ok(SongRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        year: row.get(4)?,
        src: row.get(5)?,
        image: row.get(6)?,
        lyrics: row.get(7)?,
        duration_secs: row.get(8)?,
    })
}

#[async_trait]
impl SongStore for Library {
    async fn get_by_id(&self, id: SongId) -> Result<SongRecord, StoreError> {
        debug!(target: LOG_TARGET, "Looking up song {}", id);
        let song = self
            .conn
            .call(move |conn| {
                let song = conn
                    .prepare_cached(&format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = ?1"))?
                    .query_row([id], song_from_row)
                    .optional()?;
                Ok(song)
            })
            .await?;

        song.ok_or(StoreError::NotFound { entity: "song", id })
    }

    async fn get_all(&self) -> Result<Vec<SongRecord>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare_cached(&format!("SELECT {SONG_COLUMNS} FROM songs ORDER BY id"))?;
                let songs = stmt
                    .query_map([], song_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(songs)
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl SettingsStore for Library {
    async fn get(&self) -> Result<PlayerSettings, StoreError> {
        match self.read_settings().await? {
            Some(value) => Ok(serde_json::from_str(&value)?),
            None => Ok(PlayerSettings::default()),
        }
    }

    async fn set(&self, patch: SettingsPatch) -> Result<PlayerSettings, StoreError> {
        let mut settings = SettingsStore::get(self).await?;
        settings.apply(patch);
        let value = serde_json::to_string(&settings)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO settings (key, value) VALUES (?1, ?2)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value
                ",
                    rusqlite::params![PLAYER_SETTINGS_KEY, value],
                )?;
                Ok(())
            })
            .await?;

        Ok(settings)
    }
}

#[async_trait]
impl PlaylistStore for Library {
    async fn create_playlist(&self, playlist: NewPlaylist) -> Result<PlaylistRecord, StoreError> {
        let name = playlist_name(&playlist.name)?;
        if self.find_playlist_by_name(&name).await?.is_some() {
            return Err(StoreError::ConstraintViolation {
                reason: format!("a playlist named {name:?} already exists"),
            });
        }

        let now = Utc::now();
        let mut record = PlaylistRecord {
            id: 0,
            name,
            description: playlist
                .description
                .map(|d| d.trim().to_string())
                .unwrap_or_default(),
            cover_image: non_blank(playlist.cover_image),
            created: now,
            updated: now,
        };
        info!(target: LOG_TARGET, "Creating playlist {:?}", record.name);

        let row = record.clone();
        record.id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO playlists (name, description, cover_image, created, updated)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                ",
                    rusqlite::params![
                        row.name,
                        row.description,
                        row.cover_image,
                        row.created.to_rfc3339(),
                        row.updated.to_rfc3339()
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        Ok(record)
    }

    async fn update_playlist(
        &self,
        id: PlaylistId,
        update: PlaylistUpdate,
    ) -> Result<PlaylistRecord, StoreError> {
        let mut record = self.get_playlist(id).await?;

        if let Some(name) = update.name {
            let name = playlist_name(&name)?;
            let taken = self
                .find_playlist_by_name(&name)
                .await?
                .is_some_and(|other| other.id != id);
            if taken {
                return Err(StoreError::ConstraintViolation {
                    reason: format!("a playlist named {name:?} already exists"),
                });
            }
            record.name = name;
        }
        if let Some(description) = update.description {
            record.description = description.trim().to_string();
        }
        if let Some(cover_image) = update.cover_image {
            record.cover_image = non_blank(Some(cover_image));
        }
        record.updated = Utc::now();

        let row = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    UPDATE playlists
                    SET name = ?1, description = ?2, cover_image = ?3, updated = ?4
                    WHERE id = ?5
                ",
                    rusqlite::params![
                        row.name,
                        row.description,
                        row.cover_image,
                        row.updated.to_rfc3339(),
                        row.id
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(target: LOG_TARGET, "Updated playlist {}", id);
        Ok(record)
    }

    async fn delete_playlist(&self, id: PlaylistId) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM playlist_songs WHERE playlist_id = ?1", [id])?;
                let deleted = tx.execute("DELETE FROM playlists WHERE id = ?1", [id])?;
                tx.commit()?;
                Ok(deleted)
            })
            .await?;

        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "playlist",
                id,
            });
        }
        info!(target: LOG_TARGET, "Deleted playlist {}", id);
        Ok(())
    }

    async fn get_playlists(&self) -> Result<Vec<PlaylistRecord>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare_cached(&format!("SELECT {PLAYLIST_COLUMNS} FROM playlists ORDER BY id"))?;
                let playlists = stmt
                    .query_map([], playlist_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(playlists)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_playlist(&self, id: PlaylistId) -> Result<PlaylistRecord, StoreError> {
        let playlist = self
            .conn
            .call(move |conn| {
                let playlist = conn
                    .prepare_cached(&format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"))?
                    .query_row([id], playlist_from_row)
                    .optional()?;
                Ok(playlist)
            })
            .await?;

        playlist.ok_or(StoreError::NotFound {
            entity: "playlist",
            id,
        })
    }

    async fn find_playlist_by_name(
        &self,
        name: &str,
    ) -> Result<Option<PlaylistRecord>, StoreError> {
        let name = name.trim().to_string();
        self.conn
            .call(move |conn| {
                let playlist = conn
                    .prepare_cached(&format!(
                        "SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE name = ?1 COLLATE NOCASE"
                    ))?
                    .query_row([name], playlist_from_row)
                    .optional()?;
                Ok(playlist)
            })
            .await
            .map_err(Into::into)
    }

    async fn playlist_song_ids(&self, id: PlaylistId) -> Result<Vec<SongId>, StoreError> {
        let ids = self
            .conn
            .call(move |conn| {
                if !playlist_exists(conn, id)? {
                    return Ok(None);
                }
                Ok(Some(member_ids(conn, id)?))
            })
            .await?;

        ids.ok_or(StoreError::NotFound {
            entity: "playlist",
            id,
        })
    }

    async fn playlist_with_songs(&self, id: PlaylistId) -> Result<PlaylistWithSongs, StoreError> {
        let playlist = self.get_playlist(id).await?;
        let songs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    r"
                    SELECT {SONG_COLUMNS} FROM playlist_songs
                    JOIN songs ON songs.id = playlist_songs.song_id
                    WHERE playlist_songs.playlist_id = ?1
                    ORDER BY playlist_songs.position
                "
                ))?;
                let songs = stmt
                    .query_map([id], song_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(songs)
            })
            .await?;

        Ok(PlaylistWithSongs { playlist, songs })
    }

    async fn add_song_to_playlist(
        &self,
        playlist: PlaylistId,
        song: SongId,
    ) -> Result<usize, StoreError> {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let outcome = if !playlist_exists(&tx, playlist)? {
                    MembershipWrite::MissingPlaylist
                } else if !tx
                    .prepare_cached("SELECT 1 FROM songs WHERE id = ?1")?
                    .exists([song])?
                {
                    MembershipWrite::MissingSong
                } else if tx
                    .prepare_cached(
                        "SELECT 1 FROM playlist_songs WHERE playlist_id = ?1 AND song_id = ?2",
                    )?
                    .exists([playlist, song])?
                {
                    MembershipWrite::Rejected
                } else {
                    let position: usize = tx.query_row(
                        "SELECT COUNT(*) FROM playlist_songs WHERE playlist_id = ?1",
                        [playlist],
                        |row| row.get(0),
                    )?;
                    tx.execute(
                        r"
                        INSERT INTO playlist_songs (playlist_id, song_id, position, added)
                        VALUES (?1, ?2, ?3, ?4)
                    ",
                        rusqlite::params![playlist, song, position, Utc::now().to_rfc3339()],
                    )?;
                    MembershipWrite::Done(position)
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            MembershipWrite::Done(position) => {
                debug!(target: LOG_TARGET, "Added song {} to playlist {} at {}", song, playlist, position);
                Ok(position)
            }
            MembershipWrite::MissingPlaylist => Err(StoreError::NotFound {
                entity: "playlist",
                id: playlist,
            }),
            MembershipWrite::MissingSong => Err(StoreError::NotFound {
                entity: "song",
                id: song,
            }),
            MembershipWrite::Rejected => Err(StoreError::ConstraintViolation {
                reason: format!("song {song} is already in playlist {playlist}"),
            }),
        }
    }

    async fn remove_song_from_playlist(
        &self,
        playlist: PlaylistId,
        song: SongId,
    ) -> Result<(), StoreError> {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let position: Option<usize> = tx
                    .query_row(
                        "SELECT position FROM playlist_songs WHERE playlist_id = ?1 AND song_id = ?2",
                        [playlist, song],
                        |row| row.get(0),
                    )
                    .optional()?;
                let outcome = match position {
                    Some(position) => {
                        tx.execute(
                            "DELETE FROM playlist_songs WHERE playlist_id = ?1 AND song_id = ?2",
                            [playlist, song],
                        )?;
                        tx.execute(
                            r"
                            UPDATE playlist_songs SET position = position - 1
                            WHERE playlist_id = ?1 AND position > ?2
                        ",
                            rusqlite::params![playlist, position],
                        )?;
                        MembershipWrite::Done(position)
                    }
                    None if playlist_exists(&tx, playlist)? => MembershipWrite::MissingSong,
                    None => MembershipWrite::MissingPlaylist,
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;

        match outcome {
            MembershipWrite::Done(_) => {
                debug!(target: LOG_TARGET, "Removed song {} from playlist {}", song, playlist);
                Ok(())
            }
            MembershipWrite::MissingPlaylist => Err(StoreError::NotFound {
                entity: "playlist",
                id: playlist,
            }),
            MembershipWrite::MissingSong | MembershipWrite::Rejected => Err(StoreError::NotFound {
                entity: "playlist song",
                id: song,
            }),
        }
    }

    async fn reorder_playlist(
        &self,
        playlist: PlaylistId,
        order: &[SongId],
    ) -> Result<(), StoreError> {
        let order = order.to_vec();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if !playlist_exists(&tx, playlist)? {
                    return Ok(MembershipWrite::MissingPlaylist);
                }

                let mut current = member_ids(&tx, playlist)?;
                let mut wanted = order.clone();
                current.sort_unstable();
                wanted.sort_unstable();
                if current != wanted {
                    return Ok(MembershipWrite::Rejected);
                }

                for (position, song) in order.iter().enumerate() {
                    tx.execute(
                        "UPDATE playlist_songs SET position = ?1 WHERE playlist_id = ?2 AND song_id = ?3",
                        rusqlite::params![position, playlist, song],
                    )?;
                }
                tx.commit()?;
                Ok(MembershipWrite::Done(order.len()))
            })
            .await?;

        match outcome {
            MembershipWrite::Done(_) => Ok(()),
            MembershipWrite::MissingPlaylist => Err(StoreError::NotFound {
                entity: "playlist",
                id: playlist,
            }),
            MembershipWrite::MissingSong | MembershipWrite::Rejected => {
                Err(StoreError::ConstraintViolation {
                    reason: "new order must hold exactly the songs of the playlist".to_string(),
                })
            }
        }
    }
}
