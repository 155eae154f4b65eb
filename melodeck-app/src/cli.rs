use clap::{Parser, Subcommand};
use melodeck_core::SongId;
use std::path::PathBuf;

/// Music player with synchronized LRC lyrics
#[derive(Parser, Debug)]
#[command(name = "melodeck", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Play the whole library or a saved playlist
    Play {
        /// Song to start with
        song_id: Option<SongId>,

        /// Play this saved playlist instead of the whole library
        #[arg(long, short)]
        playlist: Option<String>,
    },

    /// Add songs from LRC files
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Also append the imported songs to this playlist, creating it if needed
        #[arg(long, short)]
        playlist: Option<String>,
    },

    /// Manage saved playlists
    #[command(subcommand)]
    Playlist(PlaylistCommand),
}

impl Default for Command {
    fn default() -> Self {
        Self::Play {
            song_id: None,
            playlist: None,
        }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum PlaylistCommand {
    /// List saved playlists
    List,

    /// Show the songs of a playlist in order
    Show { name: String },

    /// Create an empty playlist
    Create {
        name: String,

        #[arg(long, short)]
        description: Option<String>,
    },

    /// Rename a playlist or change its description
    Edit {
        name: String,

        #[arg(long)]
        rename: Option<String>,

        #[arg(long, short)]
        description: Option<String>,
    },

    /// Delete a playlist. Its songs stay in the library.
    Delete { name: String },

    /// Append songs to a playlist
    Add {
        name: String,

        #[arg(required = true)]
        song_ids: Vec<SongId>,
    },

    /// Remove songs from a playlist
    Remove {
        name: String,

        #[arg(required = true)]
        song_ids: Vec<SongId>,
    },

    /// Put the songs of a playlist in this order
    Order {
        name: String,

        #[arg(required = true)]
        song_ids: Vec<SongId>,
    },
}
