mod bridge;
mod cli;
mod console;
mod import;
mod playlists;

use crate::cli::{Cli, Command};
use crate::console::{ConsoleTarget, Input};
use clap::Parser;
use melodeck_core::{
    Config, CoreError, Library, LocalWindowOpener, Player, PlayerCommand, PlayerConnector,
    PlayerIo, PlayerWindowContext, SimulatedAudio, SongId, SongStore, WindowLink, WindowMessage,
};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const APP_NAME: &str = "Melodeck";

type CommandSlot = watch::Sender<Option<mpsc::Sender<PlayerCommand>>>;

fn main() {
    let cli = Cli::parse();

    // Check config for logging.enabled before full config load
    let file_logging_enabled = check_file_logging_enabled();
    init_tracing(file_logging_enabled);

    // Load config or create template on first run
    let config = match Config::load_or_create() {
        Ok(config) => config,
        Err(CoreError::ConfigParseError(parse_error)) => {
            error!(
                "Config file {} has a syntax error: {parse_error}",
                Config::config_path().display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let library = runtime.block_on(async {
        match Library::open(&config.storage.database_path()).await {
            Ok(library) => Arc::new(library),
            Err(e) => {
                error!("Failed to open song library: {}", e);
                std::process::exit(1);
            }
        }
    });

    let mut exit_code = 0;
    match cli.command.unwrap_or_default() {
        Command::Import { files, playlist } => runtime.block_on(async {
            let added = import::import_files(&library, &files).await;
            info!("Imported {} of {} file(s)", added.len(), files.len());
            if let Some(name) = playlist {
                if let Err(e) = playlists::append(&library, &name, &added).await {
                    error!("{e}");
                    exit_code = 1;
                }
            }
        }),
        Command::Playlist(command) => {
            if let Err(e) = runtime.block_on(playlists::run(&library, command)) {
                error!("{e}");
                exit_code = 1;
            }
        }
        Command::Play { song_id, playlist } => {
            // Create shared cancellation token for graceful shutdown
            let cancel_token = CancellationToken::new();

            let ctrlc_token = cancel_token.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                info!("Received Ctrl+C, shutting down gracefully...");
                ctrlc_token.cancel();
            }) {
                error!("Failed to set Ctrl+C handler: {}", e);
            }

            info!("Starting {APP_NAME}");
            let request = PlayRequest { song_id, playlist };
            runtime.block_on(run_controller(&config, &library, &request, &cancel_token));
        }
    }

    if let Err(e) = runtime.block_on(library.checkpoint()) {
        warn!("Failed to checkpoint library: {}", e);
    }

    // Stdin reads park a blocking thread that never returns on its own
    runtime.shutdown_timeout(Duration::from_millis(500));
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// What `melodeck play` was asked to play
struct PlayRequest {
    song_id: Option<SongId>,
    /// Saved playlist name; the whole library when absent
    playlist: Option<String>,
}

/// Controller side: open the player window, hand it the playlist and wait
/// for it to close
async fn run_controller(
    config: &Config,
    library: &Arc<Library>,
    request: &PlayRequest,
    cancel_token: &CancellationToken,
) {
    let origin = match config.window.origin() {
        Ok(origin) => origin,
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    let (song_ids, index) = match &request.playlist {
        Some(name) => match playlists::queue(library, name, request.song_id).await {
            Ok(queue) => queue,
            Err(e) => {
                error!("{e}");
                return;
            }
        },
        None => {
            let song_ids: Vec<SongId> = match library.get_all().await {
                Ok(songs) => songs.iter().map(|song| song.id).collect(),
                Err(e) => {
                    error!("Failed to list songs: {}", e);
                    return;
                }
            };
            if song_ids.is_empty() {
                warn!("The library is empty. Add songs with `melodeck import <file.lrc>`");
                return;
            }
            let index = request
                .song_id
                .and_then(|id| song_ids.iter().position(|song| *song == id))
                .unwrap_or(0);
            (song_ids, index)
        }
    };

    let tracker = TaskTracker::new();
    let (command_slot, command_rx) = watch::channel(None);
    let opener = LocalWindowOpener::new(
        origin.clone(),
        player_launcher(config, library, &tracker, cancel_token, command_slot),
    );
    let mut connector =
        PlayerConnector::new(origin, Arc::new(opener), config.window.ready_timeout());

    let started = match request.song_id {
        Some(id) => connector.play_song(id, song_ids, index).await,
        None => connector.play_playlist(song_ids).await,
    };
    if let Err(e) = started {
        error!("Failed to start playback: {}", e);
        return;
    }

    tokio::spawn(read_console_input(command_rx, cancel_token.clone()));

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            message = connector.next_message() => match message {
                Some(WindowMessage::PlayerClosed) | None => {
                    info!("Player window closed");
                    break;
                }
                Some(other) => debug!("Controller received {}", other.kind()),
            },
        }
    }

    connector.close();
    tracker.close();
    if tokio::time::timeout(Duration::from_secs(2), tracker.wait())
        .await
        .is_err()
    {
        warn!("Player did not stop in time");
    }
}

/// Builds the callback that brings up a player "window": a player task, its
/// audio clock and an event logger
fn player_launcher(
    config: &Config,
    library: &Arc<Library>,
    tracker: &TaskTracker,
    cancel_token: &CancellationToken,
    command_slot: CommandSlot,
) -> impl Fn(PlayerWindowContext) -> melodeck_core::error::Result<()> + Send + Sync + 'static {
    let config = config.clone();
    let library = library.clone();
    let tracker = tracker.clone();
    let cancel_token = cancel_token.clone();

    move |context| {
        let (audio, clock) = SimulatedAudio::new(
            config.audio.tick_interval(),
            config.audio.fallback_duration_secs,
            config.player.default_volume,
        );
        let player = Player::new(
            library.clone(),
            library.clone(),
            audio.clone(),
            config.player.clone(),
        )
        .with_primary(Box::new(ConsoleTarget::new("lyrics")));

        let (commands_tx, commands) = mpsc::channel(16);
        command_slot.send_replace(Some(commands_tx));

        let (window, requested_song) = WindowLink::from_context(context);
        let io = PlayerIo {
            clock,
            commands,
            window: Some(window),
            requested_song,
        };

        let player_token = cancel_token.child_token();
        tracker.spawn(bridge::log_player_events(player.subscribe()));
        tracker.spawn(audio.run(player_token.clone()));
        tracker.spawn(async move {
            player.run(io, player_token.clone()).await;
            // Stops the audio clock when the window closes on its own
            player_token.cancel();
        });
        Ok(())
    }
}

/// Forward typed lines to the current player window
async fn read_console_input(
    commands: watch::Receiver<Option<mpsc::Sender<PlayerCommand>>>,
    cancel_token: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Type space, ctrl+right, ctrl+left, mirror, esc, shuffle, repeat, seek <s>, vol <n> or quit");

    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };

        match Input::parse(&line) {
            Some(Input::Quit) => {
                cancel_token.cancel();
                break;
            }
            Some(input) => {
                let sender = commands.borrow().clone();
                if let (Some(tx), Some(command)) = (sender, input.into_command()) {
                    if tx.send(command).await.is_err() {
                        debug!("Player window is gone");
                    }
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!("Unknown input: {}", line.trim()),
        }
    }
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled() -> bool {
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }
    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        enabled: bool,
    }

    let Ok(content) = std::fs::read_to_string(Config::config_path()) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.enabled)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer();

    if file_logging_enabled {
        let log_path = melodeck_core::paths::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
