pub mod audio;
pub mod config;
pub mod connector;
pub mod controls;
pub mod error;
pub mod highlight;
pub mod library;
pub mod lrc;
pub mod paths;
pub mod player;
pub mod protocol;
pub mod render;
pub mod session;
pub mod store;
pub mod time;
pub mod window;

pub use audio::{AudioOutput, ClockEvent, SimulatedAudio};
pub use config::{AudioConfig, Config, LoggingConfig, PlayerConfig, StorageConfig, WindowConfig};
pub use connector::{ConnectorState, PlayerConnector, PlayerEndpoint};
pub use controls::{map_key, ControlAction, Key, KeyPress, ParseKeyError};

/// Re-export toml error type for config parsing error handling
pub use toml::de::Error as TomlParseError;
pub use error::{CoreError, StoreError};
pub use highlight::{
    compute_highlight, FrameCoalescer, HighlightSnapshot, HighlightState, HighlightUpdate,
    Highlighter,
};
pub use library::Library;
pub use lrc::{LrcFormat, LrcMetadata, LyricLine, LyricWord, LyricsDocument};
pub use paths::{
    config_dir, config_path, library_db_path, log_file_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    LIBRARY_DB_FILE_NAME, LOG_FILE_NAME,
};
pub use player::{
    Notice, NoticeLevel, Player, PlayerCommand, PlayerEvent, PlayerIo, WindowLink,
};
pub use protocol::{MessagePort, Origin, PostedMessage, WindowMessage};
pub use render::{HighlightTarget, LineClass, RenderedLyrics, WatchTarget};
pub use session::{Navigation, PlaybackSession};
pub use store::{
    NewPlaylist, NewSong, PlayerSettings, PlaylistId, PlaylistRecord, PlaylistStore,
    PlaylistUpdate, PlaylistWithSongs, SettingsPatch, SettingsStore, SongId, SongRecord,
    SongStore,
};
pub use window::{LocalWindowOpener, OpenRequest, PlayerWindow, PlayerWindowContext, WindowOpener};
