use melodeck_core::{
    ConnectorState, Library, LocalWindowOpener, MessagePort, NewSong, Origin, Player,
    PlayerCommand, PlayerConfig, PlayerConnector, PlayerEndpoint, PlayerEvent, PlayerIo,
    SettingsPatch, SettingsStore, SimulatedAudio, SongId, WindowLink, WindowMessage,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

fn app_origin() -> Origin {
    "http://localhost:8080".parse().unwrap()
}

async fn library_with_songs() -> (Arc<Library>, Vec<SongId>) {
    let library = Arc::new(Library::open_in_memory().await.unwrap());
    let mut ids = Vec::new();
    for title in ["Intro", "Verse", "Outro"] {
        let song = library
            .add_song(NewSong {
                title: title.to_string(),
                src: format!("{}.mp3", title.to_lowercase()),
                lyrics: Some("[00:00.50]la\n[00:02.00]la la".to_string()),
                duration_secs: Some(30.0),
                ..NewSong::default()
            })
            .await
            .unwrap();
        ids.push(song.id);
    }
    (library, ids)
}

fn player(library: &Arc<Library>) -> (Player, PlayerIo, mpsc::Sender<PlayerCommand>) {
    let (audio, clock) = SimulatedAudio::new(Duration::from_millis(250), 180.0, 70);
    let player = Player::new(
        library.clone(),
        library.clone(),
        audio,
        PlayerConfig::default(),
    );
    let (commands_tx, commands) = mpsc::channel(16);
    let io = PlayerIo {
        clock,
        commands,
        window: None,
        requested_song: None,
    };
    (player, io, commands_tx)
}

async fn next_song_change(events: &mut broadcast::Receiver<PlayerEvent>) -> SongId {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let PlayerEvent::SongChanged { song, .. } = events.recv().await.unwrap() {
                return song.id;
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_for_song(events: &mut broadcast::Receiver<PlayerEvent>, id: SongId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while next_song_change(events).await != id {}
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_controller_opens_player_and_hands_over_playlist() {
    let (library, ids) = library_with_songs().await;
    let cancel = CancellationToken::new();

    let events_slot: Arc<Mutex<Option<broadcast::Receiver<PlayerEvent>>>> =
        Arc::new(Mutex::new(None));
    let commands_slot = Arc::new(Mutex::new(Vec::new()));

    let opener = {
        let library = library.clone();
        let cancel = cancel.clone();
        let events_slot = events_slot.clone();
        let commands_slot = commands_slot.clone();
        LocalWindowOpener::new(app_origin(), move |context| {
            let (player, mut io, commands_tx) = player(&library);
            *events_slot.lock().unwrap() = Some(player.subscribe());
            commands_slot.lock().unwrap().push(commands_tx);

            let (link, requested) = WindowLink::from_context(context);
            io.window = Some(link);
            io.requested_song = requested;
            tokio::spawn(player.run(io, cancel.child_token()));
            Ok(())
        })
    };

    let mut connector = PlayerConnector::new(app_origin(), Arc::new(opener), Duration::from_secs(5));
    connector.play_song(ids[1], ids.clone(), 1).await.unwrap();

    assert_eq!(connector.state(), ConnectorState::Ready);
    assert!(!connector.has_pending());

    let mut events = events_slot.lock().unwrap().take().unwrap();
    // Launched with ?id, then the buffered playlist arrives after playerReady
    assert_eq!(next_song_change(&mut events).await, ids[1]);

    let settings = library.get().await.unwrap();
    assert_eq!(settings.current_playlist, ids);
    assert_eq!(settings.current_song_index, 1);

    // Ready window: requests go straight through
    connector.play_song(ids[2], ids.clone(), 2).await.unwrap();
    wait_for_song(&mut events, ids[2]).await;

    cancel.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(5), connector.next_message())
        .await
        .unwrap();
    assert_eq!(closed, Some(WindowMessage::PlayerClosed));
    assert_eq!(connector.state(), ConnectorState::NoWindow);
}

#[tokio::test]
async fn test_player_announces_ready_after_restoring_session() {
    let (library, ids) = library_with_songs().await;
    library
        .set(SettingsPatch::position(ids.clone(), 2))
        .await
        .unwrap();

    let (controller_port, mut controller_inbox) = MessagePort::channel(app_origin());
    let (player_port, player_inbox) = MessagePort::channel(app_origin());
    let (player, mut io, _commands) = player(&library);
    let mut events = player.subscribe();
    let close_token = CancellationToken::new();
    io.window = Some(WindowLink {
        endpoint: PlayerEndpoint::new(app_origin(), Some(controller_port)),
        inbox: player_inbox,
        close_token: close_token.clone(),
    });
    let handle = tokio::spawn(player.run(io, CancellationToken::new()));

    let ready = controller_inbox.recv().await.unwrap();
    assert_eq!(
        serde_json::from_value::<WindowMessage>(ready.data).unwrap(),
        WindowMessage::PlayerReady
    );
    // The persisted song was loaded before readiness was announced
    assert_eq!(next_song_change(&mut events).await, ids[2]);

    drop(player_port);
    close_token.cancel();
    handle.await.unwrap();
    let closed = controller_inbox.recv().await.unwrap();
    assert_eq!(
        serde_json::from_value::<WindowMessage>(closed.data).unwrap(),
        WindowMessage::PlayerClosed
    );
}

#[tokio::test]
async fn test_player_ignores_messages_from_foreign_origin() {
    let (library, ids) = library_with_songs().await;
    let (player_port, player_inbox) = MessagePort::channel(app_origin());
    let (player, mut io, _commands) = player(&library);
    let mut events = player.subscribe();
    io.window = Some(WindowLink {
        endpoint: PlayerEndpoint::new(app_origin(), None),
        inbox: player_inbox,
        close_token: CancellationToken::new(),
    });
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(player.run(io, cancel.clone()));

    let evil = player_port.with_origin("https://evil.example".parse().unwrap());
    evil.post(&WindowMessage::PlaySong {
        song_id: ids[0],
        playlist: ids.clone(),
        current_index: 0,
    })
    .unwrap();
    player_port
        .post(&WindowMessage::PlaySong {
            song_id: ids[2],
            playlist: ids.clone(),
            current_index: 2,
        })
        .unwrap();

    assert_eq!(next_song_change(&mut events).await, ids[2]);

    cancel.cancel();
    handle.await.unwrap();
    let settings = library.get().await.unwrap();
    assert_eq!(settings.current_song_index, 2);
}
