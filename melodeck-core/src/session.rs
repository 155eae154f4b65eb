//! Playback session: the active playlist, the current position and the
//! shuffle/repeat flags of one player window.

use crate::store::{PlayerSettings, SettingsPatch, SettingsStore, SongId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, warn};

const LOG_TARGET: &str = "melodeck::session";

/// Outcome of asking the session where to go next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// Move to this playlist index
    To(usize),
    /// Forward past the last song with repeat off
    EndOfPlaylist,
    /// Backward past the first song with repeat off
    StartOfPlaylist,
    /// Nothing to navigate
    Empty,
}

impl Navigation {
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::To(index) => Some(index),
            _ => None,
        }
    }
}

/// Playlist navigator.
///
/// Every state change is written to the settings store. A failed write is
/// logged and otherwise ignored; the in-memory session stays authoritative.
pub struct PlaybackSession {
    song_ids: Vec<SongId>,
    current_index: usize,
    current_song: Option<SongId>,
    shuffle: bool,
    repeat: bool,
    rng: StdRng,
    settings: Arc<dyn SettingsStore>,
}

impl PlaybackSession {
    #[must_use]
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Session with a caller-supplied random source for shuffle
    #[must_use]
    pub fn with_rng(settings: Arc<dyn SettingsStore>, rng: StdRng) -> Self {
        Self {
            song_ids: Vec::new(),
            current_index: 0,
            current_song: None,
            shuffle: false,
            repeat: false,
            rng,
            settings,
        }
    }

    /// Adopt persisted state without writing it back.
    pub fn restore(&mut self, settings: &PlayerSettings) {
        self.song_ids.clone_from(&settings.current_playlist);
        self.current_index = clamp_index(settings.current_song_index, self.song_ids.len());
        self.current_song = self.song_ids.get(self.current_index).copied();
        self.shuffle = settings.shuffle;
        self.repeat = settings.repeat;
        debug!(target: LOG_TARGET, "Restored session: {} songs, index {}", self.song_ids.len(), self.current_index);
    }

    /// Replace the playlist. `start_index` past the end is clamped to the
    /// last song.
    pub async fn set_playlist(&mut self, song_ids: Vec<SongId>, start_index: usize) {
        self.current_index = clamp_index(start_index, song_ids.len());
        self.current_song = song_ids.get(self.current_index).copied();
        self.song_ids = song_ids;
        self.persist_position().await;
    }

    /// Where "next" leads from the current position
    pub fn next_index(&mut self) -> Navigation {
        let len = self.song_ids.len();
        if len == 0 {
            return Navigation::Empty;
        }
        if self.shuffle {
            return Navigation::To(self.random_other_index());
        }
        if self.current_index + 1 < len {
            Navigation::To(self.current_index + 1)
        } else if self.repeat {
            Navigation::To(0)
        } else {
            Navigation::EndOfPlaylist
        }
    }

    /// Where "previous" leads from the current position.
    ///
    /// Under shuffle this is a fresh random pick, not the song played before;
    /// shuffle keeps no history.
    pub fn previous_index(&mut self) -> Navigation {
        let len = self.song_ids.len();
        if len == 0 {
            return Navigation::Empty;
        }
        if self.shuffle {
            return Navigation::To(self.random_other_index());
        }
        if self.current_index > 0 {
            Navigation::To(self.current_index - 1)
        } else if self.repeat {
            Navigation::To(len - 1)
        } else {
            Navigation::StartOfPlaylist
        }
    }

    /// Move to `index` and persist. Returns the song to load, or `None` if
    /// the index is outside the playlist.
    pub async fn go_to_index(&mut self, index: usize) -> Option<SongId> {
        let song = self.song_ids.get(index).copied()?;
        self.current_index = index;
        self.current_song = Some(song);
        self.persist_position().await;
        Some(song)
    }

    /// Flip shuffle, persist it and return the new value.
    pub async fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        self.persist(SettingsPatch::shuffle(self.shuffle)).await;
        self.shuffle
    }

    /// Flip repeat, persist it and return the new value.
    pub async fn toggle_repeat(&mut self) -> bool {
        self.repeat = !self.repeat;
        self.persist(SettingsPatch::repeat(self.repeat)).await;
        self.repeat
    }

    /// Record `id` as playing and move the index to it, persisting a moved
    /// index. Returns `false` and changes nothing if `id` is not in the
    /// playlist.
    pub async fn update_current_song(&mut self, id: SongId) -> bool {
        if self.song_ids.get(self.current_index) == Some(&id) {
            self.current_song = Some(id);
            return true;
        }
        let Some(index) = self.position_of(id) else {
            debug!(target: LOG_TARGET, "Song {} is not in the playlist", id);
            return false;
        };
        self.current_index = index;
        self.current_song = Some(id);
        self.persist_position().await;
        true
    }

    #[must_use]
    pub fn position_of(&self, id: SongId) -> Option<usize> {
        self.song_ids.iter().position(|song| *song == id)
    }

    #[must_use]
    pub const fn current_song(&self) -> Option<SongId> {
        self.current_song
    }

    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn song_ids(&self) -> &[SongId] {
        &self.song_ids
    }

    #[must_use]
    pub const fn shuffle(&self) -> bool {
        self.shuffle
    }

    #[must_use]
    pub const fn repeat(&self) -> bool {
        self.repeat
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.song_ids.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.song_ids.len()
    }

    fn random_other_index(&mut self) -> usize {
        let len = self.song_ids.len();
        if len <= 1 {
            return 0;
        }
        loop {
            let candidate = self.rng.gen_range(0..len);
            if candidate != self.current_index {
                return candidate;
            }
        }
    }

    async fn persist_position(&self) {
        self.persist(SettingsPatch::position(self.song_ids.clone(), self.current_index))
            .await;
    }

    async fn persist(&self, patch: SettingsPatch) {
        if let Err(e) = self.settings.set(patch).await {
            warn!(target: LOG_TARGET, "Failed to persist session state: {}", e);
        }
    }
}

const fn clamp_index(index: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else if index >= len {
        len - 1
    } else {
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemorySettings {
        settings: Mutex<PlayerSettings>,
        fail: bool,
    }

    #[async_trait]
    impl SettingsStore for MemorySettings {
        async fn get(&self) -> Result<PlayerSettings, StoreError> {
            Ok(self.settings.lock().await.clone())
        }

        async fn set(&self, patch: SettingsPatch) -> Result<PlayerSettings, StoreError> {
            if self.fail {
                return Err(StoreError::ConstraintViolation {
                    reason: "read-only".to_string(),
                });
            }
            let mut settings = self.settings.lock().await;
            settings.apply(patch);
            Ok(settings.clone())
        }
    }

    fn session() -> (PlaybackSession, Arc<MemorySettings>) {
        let store = Arc::new(MemorySettings::default());
        let session = PlaybackSession::with_rng(store.clone(), StdRng::seed_from_u64(7));
        (session, store)
    }

    #[tokio::test]
    async fn test_next_at_end_without_repeat() {
        let (mut session, _) = session();
        session.set_playlist(vec![10, 20, 30], 2).await;
        assert_eq!(session.next_index(), Navigation::EndOfPlaylist);
    }

    #[tokio::test]
    async fn test_next_at_end_with_repeat_wraps() {
        let (mut session, _) = session();
        session.set_playlist(vec![10, 20, 30], 2).await;
        assert!(session.toggle_repeat().await);
        assert_eq!(session.next_index(), Navigation::To(0));
    }

    #[tokio::test]
    async fn test_previous_boundaries() {
        let (mut session, _) = session();
        session.set_playlist(vec![10, 20, 30], 0).await;
        assert_eq!(session.previous_index(), Navigation::StartOfPlaylist);

        session.toggle_repeat().await;
        assert_eq!(session.previous_index(), Navigation::To(2));
    }

    #[tokio::test]
    async fn test_sequential_navigation() {
        let (mut session, _) = session();
        session.set_playlist(vec![10, 20, 30], 0).await;
        assert_eq!(session.next_index(), Navigation::To(1));
        assert_eq!(session.go_to_index(1).await, Some(20));
        assert_eq!(session.previous_index(), Navigation::To(0));
        assert_eq!(session.current_song(), Some(20));
    }

    #[tokio::test]
    async fn test_empty_playlist() {
        let (mut session, _) = session();
        session.set_playlist(Vec::new(), 3).await;
        assert!(session.is_empty());
        assert_eq!(session.current_song(), None);
        assert_eq!(session.next_index(), Navigation::Empty);
        assert_eq!(session.previous_index(), Navigation::Empty);
        assert_eq!(session.go_to_index(0).await, None);
    }

    #[tokio::test]
    async fn test_set_playlist_clamps_start_index() {
        let (mut session, store) = session();
        session.set_playlist(vec![10, 20, 30], 99).await;
        assert_eq!(session.current_index(), 2);
        assert_eq!(session.current_song(), Some(30));

        let persisted = store.get().await.unwrap();
        assert_eq!(persisted.current_playlist, vec![10, 20, 30]);
        assert_eq!(persisted.current_song_index, 2);
    }

    #[tokio::test]
    async fn test_shuffle_single_song_returns_zero() {
        let (mut session, _) = session();
        session.set_playlist(vec![10], 0).await;
        session.toggle_shuffle().await;
        for _ in 0..10 {
            assert_eq!(session.next_index(), Navigation::To(0));
            assert_eq!(session.previous_index(), Navigation::To(0));
        }
    }

    #[tokio::test]
    async fn test_shuffle_never_repeats_current() {
        let (mut session, _) = session();
        session.set_playlist(vec![1, 2, 3, 4], 2).await;
        session.toggle_shuffle().await;
        for _ in 0..200 {
            let next = session.next_index().index().unwrap();
            assert!(next < 4);
            assert_ne!(next, 2);
        }
    }

    #[tokio::test]
    async fn test_shuffle_previous_is_random_not_history() {
        let (mut session, _) = session();
        session.set_playlist(vec![1, 2, 3, 4, 5], 0).await;
        session.toggle_shuffle().await;
        session.go_to_index(3).await;

        // Previous under shuffle draws a fresh index; over many draws it
        // lands on more than just the song played before.
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..100 {
            let previous = session.previous_index().index().unwrap();
            assert_ne!(previous, 3);
            seen.insert(previous);
        }
        assert!(seen.len() > 1);
    }

    #[tokio::test]
    async fn test_toggles_persist_flags() {
        let (mut session, store) = session();
        assert!(session.toggle_shuffle().await);
        assert!(store.get().await.unwrap().shuffle);
        assert!(!session.toggle_shuffle().await);
        assert!(!store.get().await.unwrap().shuffle);
        assert!(session.toggle_repeat().await);
        assert!(store.get().await.unwrap().repeat);
    }

    #[tokio::test]
    async fn test_go_to_index_persists() {
        let (mut session, store) = session();
        session.set_playlist(vec![5, 6, 7], 0).await;
        session.go_to_index(2).await;
        assert_eq!(store.get().await.unwrap().current_song(), Some(7));
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_session_state() {
        let store = Arc::new(MemorySettings {
            fail: true,
            ..MemorySettings::default()
        });
        let mut session = PlaybackSession::with_rng(store, StdRng::seed_from_u64(1));
        session.set_playlist(vec![1, 2], 1).await;
        assert_eq!(session.current_song(), Some(2));
        assert!(session.toggle_repeat().await);
    }

    #[test]
    fn test_restore_clamps_index() {
        let (mut session, _) = session();
        session.restore(&PlayerSettings {
            shuffle: true,
            current_playlist: vec![4, 5],
            current_song_index: 7,
            ..PlayerSettings::default()
        });
        assert!(session.shuffle());
        assert_eq!(session.current_index(), 1);
        assert_eq!(session.current_song(), Some(5));
    }

    #[tokio::test]
    async fn test_update_current_song_follows_playlist() {
        let (mut session, store) = session();
        session.set_playlist(vec![10, 20, 30], 0).await;
        assert!(session.update_current_song(30).await);
        assert_eq!(session.current_index(), 2);
        assert_eq!(store.get().await.unwrap().current_song_index, 2);
    }

    #[tokio::test]
    async fn test_update_current_song_outside_playlist_changes_nothing() {
        let (mut session, store) = session();
        session.set_playlist(vec![10, 20, 30], 1).await;
        assert!(!session.update_current_song(99).await);
        assert_eq!(session.current_song(), Some(20));
        assert_eq!(session.current_index(), 1);
        assert_eq!(store.get().await.unwrap().current_song_index, 1);
    }

    #[tokio::test]
    async fn test_update_current_song_keeps_duplicate_position() {
        let (mut session, _) = session();
        session.set_playlist(vec![10, 20, 10], 2).await;
        assert!(session.update_current_song(10).await);
        assert_eq!(session.current_index(), 2);
    }
}
