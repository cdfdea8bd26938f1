//! End-to-end session behavior over the in-memory broker and directory.

use parley_core::{
    ConnectionState, EngineConfig, MemoryDirectory, RecordingNotifier, Room, SessionController,
    SessionError, ValidationError,
};
use parley_protocol::{ChatMessage, RoomId, Timestamp, MAX_CONTENT_CHARS};
use parley_transport::MemoryBroker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

const DELAY: Duration = Duration::from_secs(5);

struct Harness {
    broker: MemoryBroker,
    directory: Arc<MemoryDirectory>,
    notifier: Arc<RecordingNotifier>,
    session: SessionController,
}

fn harness_with(broker: MemoryBroker) -> Harness {
    let directory = Arc::new(MemoryDirectory::new());
    for id in ["lobby", "random"] {
        directory.add_room(Room::new(
            room(id),
            format!("#{id}"),
            "admin",
            Timestamp::from_millis(0),
        ));
    }
    let notifier = Arc::new(RecordingNotifier::new());
    let config = EngineConfig::new("memory://chat").with_reconnect_delay(DELAY);
    let session = SessionController::new(
        "me",
        config,
        directory.clone(),
        Arc::new(broker.clone()),
        notifier.clone(),
    );
    Harness {
        broker,
        directory,
        notifier,
        session,
    }
}

fn harness() -> Harness {
    harness_with(MemoryBroker::new())
}

fn room(id: &str) -> RoomId {
    RoomId::parse(id).unwrap()
}

fn msg(sender: &str, content: &str, t: i64) -> ChatMessage {
    ChatMessage::new(sender, content, Timestamp::from_millis(t))
}

async fn wait_for(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    timeout(Duration::from_secs(60), rx.wait_for(|s| *s == want))
        .await
        .expect("state change timed out")
        .expect("state sender dropped");
}

#[tokio::test(start_paused = true)]
async fn history_then_live_message() {
    let mut h = harness();
    let lobby = room("lobby");
    h.directory.record(&lobby, msg("A", "yo", 1));
    h.directory.record(&lobby, msg("A", "hi", 3));

    let mut states = h.session.watch_connection();
    let mut events = h.session.subscribe_messages();

    let entered = h.session.enter(lobby.clone()).await.unwrap();
    assert_eq!(entered.name, "#lobby");
    assert_eq!(h.session.room(), Some(&entered));
    assert_eq!(h.session.current_log(), vec![msg("A", "yo", 1), msg("A", "hi", 3)]);

    wait_for(&mut states, ConnectionState::Connected).await;
    h.session.attention().set_visible(false);
    h.session.attention().set_permission_granted(true);
    h.broker.inject_message(&lobby, &msg("B", "hey", 5));

    assert_eq!(events.recv().await.unwrap(), msg("B", "hey", 5));
    assert_eq!(
        h.session.current_log(),
        vec![msg("A", "yo", 1), msg("A", "hi", 3), msg("B", "hey", 5)]
    );
    assert_eq!(h.notifier.shown().len(), 1);
    assert_eq!(h.notifier.sounds(), 1);

    // Redelivery of something already in the log changes nothing.
    h.broker.inject_message(&lobby, &msg("A", "hi", 3));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.session.current_log().len(), 3);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn live_frames_during_history_load_are_kept() {
    let h = harness();
    let lobby = room("lobby");
    h.directory.record(&lobby, msg("A", "old", 1));
    h.directory.set_history_delay(Duration::from_secs(2));

    let Harness {
        broker,
        mut session,
        ..
    } = h;

    let entering = {
        let lobby = lobby.clone();
        tokio::spawn(async move {
            let result = session.enter(lobby).await;
            (session, result)
        })
    };

    // The subscription is live while history is still loading.
    let topic = lobby.topic();
    while broker.subscriber_count(&topic) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    broker.inject_message(&lobby, &msg("B", "early", 50));
    broker.inject_message(&lobby, &msg("A", "old", 1));

    let (session, result) = entering.await.unwrap();
    result.unwrap();
    assert_eq!(
        session.current_log(),
        vec![msg("A", "old", 1), msg("B", "early", 50)]
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_text_never_reaches_the_network() {
    let mut h = harness();
    let mut states = h.session.watch_connection();
    h.session.enter(room("lobby")).await.unwrap();
    wait_for(&mut states, ConnectionState::Connected).await;

    assert!(matches!(
        h.session.send_message("   ").await,
        Err(SessionError::Validation(ValidationError::Empty))
    ));
    let long = "x".repeat(MAX_CONTENT_CHARS + 1);
    assert!(matches!(
        h.session.send_message(&long).await,
        Err(SessionError::Validation(ValidationError::TooLong { .. }))
    ));
    assert!(h.broker.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sending_while_not_connected_is_refused() {
    let mut h = harness();
    assert!(matches!(
        h.session.send_message("hello").await,
        Err(SessionError::NotConnected)
    ));

    h.broker.refuse_connections(true);
    let mut states = h.session.watch_connection();
    h.session.enter(room("lobby")).await.unwrap();
    wait_for(&mut states, ConnectionState::Disconnected).await;

    assert!(matches!(
        h.session.send_message("hello").await,
        Err(SessionError::NotConnected)
    ));
    assert!(h.broker.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn sent_message_arrives_through_the_subscription() {
    let mut h = harness_with(MemoryBroker::with_chat_echo());
    let mut states = h.session.watch_connection();
    let mut events = h.session.subscribe_messages();

    h.session.enter(room("lobby")).await.unwrap();
    wait_for(&mut states, ConnectionState::Connected).await;

    h.session.send_message("hello world").await.unwrap();
    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "/app/sendMessage/lobby");
    let envelope: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(envelope["sender"], "me");
    assert_eq!(envelope["content"], "hello world");

    let echoed = events.recv().await.unwrap();
    assert_eq!(echoed.sender, "me");
    assert_eq!(echoed.content, "hello world");
    assert!(echoed.id.is_some());
    assert_eq!(h.session.current_log(), vec![echoed]);
}

#[tokio::test(start_paused = true)]
async fn unknown_room_opens_no_connection() {
    let mut h = harness();
    let err = h.session.enter(room("ghost")).await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound(id) if id.as_str() == "ghost"));

    tokio::time::sleep(DELAY * 2).await;
    assert_eq!(h.broker.connect_attempts(), 0);
    assert_eq!(h.session.connection_state(), ConnectionState::Idle);
    assert!(h.session.room().is_none());
}

#[tokio::test(start_paused = true)]
async fn unavailable_history_starts_empty() {
    let mut h = harness();
    h.directory.set_history_unavailable(true);
    let mut states = h.session.watch_connection();

    h.session.enter(room("lobby")).await.unwrap();
    assert!(h.session.current_log().is_empty());
    wait_for(&mut states, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn leave_then_enter_recovers_from_failure() {
    let mut h = harness();
    h.broker.reject_handshakes(true);
    let mut states = h.session.watch_connection();

    h.session.enter(room("lobby")).await.unwrap();
    wait_for(&mut states, ConnectionState::Failed).await;

    h.session.leave().await;
    assert_eq!(h.session.connection_state(), ConnectionState::Idle);
    assert!(h.session.current_log().is_empty());
    assert!(h.session.room().is_none());

    h.broker.reject_handshakes(false);
    h.session.enter(room("random")).await.unwrap();
    wait_for(&mut states, ConnectionState::Connected).await;
    assert_eq!(h.session.room().map(|r| r.name.as_str()), Some("#random"));
}

#[tokio::test(start_paused = true)]
async fn switching_rooms_discards_the_old_log() {
    let mut h = harness();
    let lobby = room("lobby");
    let random = room("random");
    h.directory.record(&lobby, msg("A", "lobby talk", 1));
    h.directory.record(&random, msg("B", "random talk", 2));
    let mut states = h.session.watch_connection();

    h.session.enter(lobby.clone()).await.unwrap();
    wait_for(&mut states, ConnectionState::Connected).await;

    h.session.enter(random.clone()).await.unwrap();
    wait_for(&mut states, ConnectionState::Connected).await;
    assert_eq!(h.session.current_log(), vec![msg("B", "random talk", 2)]);

    h.broker.inject_message(&lobby, &msg("A", "stray", 3));
    h.broker.inject_message(&random, &msg("B", "fresh", 4));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let contents: Vec<_> = h
        .session
        .current_log()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, ["random talk", "fresh"]);
}

#[tokio::test(start_paused = true)]
async fn hidden_surface_notifies_for_others_only() {
    let mut h = harness();
    let lobby = room("lobby");
    let mut states = h.session.watch_connection();
    let mut events = h.session.subscribe_messages();

    h.session.enter(lobby.clone()).await.unwrap();
    wait_for(&mut states, ConnectionState::Connected).await;

    h.session.attention().set_visible(false);
    h.session.attention().set_permission_granted(true);

    h.broker.inject_message(&lobby, &msg("me", "mine", 1));
    h.broker.inject_message(&lobby, &msg("bob", "ping", 2));
    events.recv().await.unwrap();
    events.recv().await.unwrap();

    let shown = h.notifier.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "New message from bob");
    assert_eq!(h.notifier.sounds(), 1);

    h.session.attention().set_visible(true);
    h.broker.inject_message(&lobby, &msg("bob", "again", 3));
    events.recv().await.unwrap();
    assert_eq!(h.notifier.shown().len(), 1);
}
