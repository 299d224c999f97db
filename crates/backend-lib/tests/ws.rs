//! End-to-end WebSocket flow over a real listener: two clients
//! authenticate, share a room, run a race to completion, and leave.
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use typerace_backend_lib::auth::StaticVerifier;
use typerace_backend_lib::store::{FlatFileStore, RoomRecord, Store};
use typerace_backend_lib::{ws_router, AppState};
use typerace_common::{ClientMessage, ServerMessage};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ROOM: &str = "room-1";

async fn serve() -> (SocketAddr, TempDir) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let temp_dir = TempDir::new().unwrap();
    let store = FlatFileStore::new(temp_dir.path()).unwrap();
    store
        .upsert_room(&RoomRecord {
            id: ROOM.to_string(),
            name: "Speed Demons".to_string(),
            admin_id: "u-admin".to_string(),
            admin_name: "admin".to_string(),
            is_active: true,
            is_private: false,
            password: None,
        })
        .await
        .unwrap();

    let verifier = StaticVerifier::default()
        .with_token("tok-admin", "u-admin", "admin")
        .with_token("tok-alice", "u-alice", "alice");
    let state = Arc::new(AppState::new(store, Arc::new(verifier)));
    let app = ws_router::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, temp_dir)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send(client: &mut WsClient, msg: &ClientMessage) {
    let json = serde_json::to_string(msg).unwrap();
    client.send(Message::Text(json.into())).await.unwrap();
}

async fn recv(client: &mut WsClient) -> ServerMessage {
    let frame = timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .expect("websocket error");
    serde_json::from_str(frame.to_text().unwrap()).expect("unparseable server frame")
}

/// Drain frames until one satisfies the predicate. Race broadcasts
/// interleave with membership ones, so most assertions scan.
async fn recv_until<F>(client: &mut WsClient, mut pred: F) -> ServerMessage
where
    F: FnMut(&ServerMessage) -> bool,
{
    for _ in 0..10 {
        let msg = recv(client).await;
        if pred(&msg) {
            return msg;
        }
    }
    panic!("expected frame never arrived");
}

async fn authenticate(client: &mut WsClient, token: &str) {
    send(
        client,
        &ClientMessage::Authenticate {
            token: token.to_string(),
        },
    )
    .await;
    match recv(client).await {
        ServerMessage::Authenticate { success: true, .. } => {},
        other => panic!("expected authenticate success, got {other:?}"),
    }
}

#[tokio::test]
async fn full_race_flow_over_websocket() {
    let (addr, _temp_dir) = serve().await;

    let mut admin = connect(addr).await;
    let mut alice = connect(addr).await;

    authenticate(&mut admin, "tok-admin").await;
    authenticate(&mut alice, "tok-alice").await;

    // Admin joins first, then alice; admin hears user_joined.
    send(
        &mut admin,
        &ClientMessage::JoinRoom {
            room_id: ROOM.to_string(),
        },
    )
    .await;
    match recv(&mut admin).await {
        ServerMessage::JoinRoom { room, participants, race } => {
            assert_eq!(room.id, ROOM);
            assert!(!room.has_active_race);
            assert!(race.is_none());
            assert_eq!(participants.len(), 1);
        },
        other => panic!("expected join_room reply, got {other:?}"),
    }

    send(
        &mut alice,
        &ClientMessage::JoinRoom {
            room_id: ROOM.to_string(),
        },
    )
    .await;
    match recv(&mut alice).await {
        ServerMessage::JoinRoom { participants, .. } => assert_eq!(participants.len(), 2),
        other => panic!("expected join_room reply, got {other:?}"),
    }
    match recv(&mut admin).await {
        ServerMessage::UserJoined { user_id, .. } => assert_eq!(user_id, "u-alice"),
        other => panic!("expected user_joined, got {other:?}"),
    }

    // Start the race with the default text; both hear race_started.
    send(&mut admin, &ClientMessage::StartRace { text_content: None }).await;
    let race_id = match recv(&mut admin).await {
        ServerMessage::RaceStarted {
            race_id,
            countdown_seconds,
            text_content,
            ..
        } => {
            assert_eq!(countdown_seconds, 10);
            assert!(text_content.contains("quick brown fox"));
            race_id
        },
        other => panic!("expected race_started, got {other:?}"),
    };
    match recv(&mut alice).await {
        ServerMessage::RaceStarted { race_id: id, .. } => assert_eq!(id, race_id),
        other => panic!("expected race_started, got {other:?}"),
    }

    // Admin makes progress so the race stays open past alice's finish.
    send(
        &mut admin,
        &ClientMessage::RaceProgress {
            race_id: race_id.clone(),
            progress: 40,
            wpm: 60,
            accuracy: 95,
            is_finished: false,
        },
    )
    .await;
    let standings = recv_until(&mut alice, |m| {
        matches!(m, ServerMessage::RaceProgress { .. })
    })
    .await;
    match standings {
        ServerMessage::RaceProgress { participants, .. } => {
            let admin_entry = participants.iter().find(|p| p.user_id == "u-admin").unwrap();
            assert_eq!(admin_entry.progress, 40);
            assert_eq!(participants.len(), 2);
        },
        other => panic!("expected race_progress, got {other:?}"),
    }

    // Alice finishes first, admin second; that closes the race.
    send(
        &mut alice,
        &ClientMessage::RaceProgress {
            race_id: race_id.clone(),
            progress: 100,
            wpm: 92,
            accuracy: 99,
            is_finished: true,
        },
    )
    .await;
    send(
        &mut admin,
        &ClientMessage::RaceProgress {
            race_id: race_id.clone(),
            progress: 100,
            wpm: 61,
            accuracy: 95,
            is_finished: true,
        },
    )
    .await;

    let finished = recv_until(&mut alice, |m| {
        matches!(m, ServerMessage::RaceFinished { .. })
    })
    .await;
    match finished {
        ServerMessage::RaceFinished { race_id: id, results } => {
            assert_eq!(id, race_id);
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].user_id, "u-alice");
            assert_eq!(results[0].position, Some(1));
            assert_eq!(results[1].user_id, "u-admin");
            assert_eq!(results[1].position, Some(2));
            assert!(results.iter().all(|p| p.finish_time.is_some()));
        },
        other => panic!("expected race_finished, got {other:?}"),
    }

    // Progress against the finished race now fails.
    send(
        &mut alice,
        &ClientMessage::RaceProgress {
            race_id: race_id.clone(),
            progress: 100,
            wpm: 92,
            accuracy: 99,
            is_finished: true,
        },
    )
    .await;
    let rejection = recv_until(&mut alice, |m| matches!(m, ServerMessage::Error { .. })).await;
    match rejection {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code, typerace_common::ErrorCode::RaceNotFound);
        },
        other => panic!("expected error, got {other:?}"),
    }

    // Alice leaves; admin hears user_left.
    send(&mut alice, &ClientMessage::LeaveRoom {}).await;
    let left_reply = recv_until(&mut alice, |m| {
        matches!(m, ServerMessage::LeaveRoom { .. })
    })
    .await;
    assert!(matches!(left_reply, ServerMessage::LeaveRoom { success: true }));
    let heard = recv_until(&mut admin, |m| matches!(m, ServerMessage::UserLeft { .. })).await;
    match heard {
        ServerMessage::UserLeft { user_id, .. } => assert_eq!(user_id, "u-alice"),
        other => panic!("expected user_left, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_and_unauthenticated_frames_get_error_replies() {
    let (addr, _temp_dir) = serve().await;
    let mut client = connect(addr).await;

    // Not JSON at all.
    client
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    match recv(&mut client).await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code, typerace_common::ErrorCode::InvalidFormat);
        },
        other => panic!("expected error, got {other:?}"),
    }

    // Well-formed but unauthenticated.
    send(
        &mut client,
        &ClientMessage::JoinRoom {
            room_id: ROOM.to_string(),
        },
    )
    .await;
    match recv(&mut client).await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code, typerace_common::ErrorCode::NotAuthenticated);
        },
        other => panic!("expected error, got {other:?}"),
    }

    // Bad token, then a good one on the same connection.
    send(
        &mut client,
        &ClientMessage::Authenticate {
            token: "bogus".to_string(),
        },
    )
    .await;
    match recv(&mut client).await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code, typerace_common::ErrorCode::AuthFailed);
        },
        other => panic!("expected error, got {other:?}"),
    }
    authenticate(&mut client, "tok-admin").await;
}
