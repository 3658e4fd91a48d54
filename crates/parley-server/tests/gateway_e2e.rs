use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parley::config::ServerConfig;
use parley_db::Database;
use parley_types::api::{ConnectedUsers, LoginResponse, RegisterResponse, UserPresence};
use parley_types::events::{ClientCommand, ServerEvent};

const SECRET: &str = "e2e-test-secret";

async fn spawn_server() -> SocketAddr {
    let config = ServerConfig {
        jwt_secret: SECRET.into(),
        ..ServerConfig::default()
    };
    let db = Database::open_in_memory().unwrap();
    let state = parley::build_state(db, &config).unwrap();
    let app = parley::build_app(state, None).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Peer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/gateway")).await.unwrap();
        Self { ws }
    }

    async fn joined(addr: SocketAddr, username: &str) -> Self {
        let mut peer = Self::connect(addr).await;
        peer.send(ClientCommand::Join {
            username: username.into(),
            token: None,
        })
        .await;
        assert_eq!(
            peer.next_event().await,
            ServerEvent::Ready {
                username: username.into()
            }
        );
        peer
    }

    async fn send(&mut self, cmd: ClientCommand) {
        let json = serde_json::to_string(&cmd).unwrap();
        self.ws.send(Message::text(json)).await.unwrap();
    }

    async fn try_next_event(&mut self, wait: Duration) -> Option<ServerEvent> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next()).await.ok()??;
            if let Message::Text(text) = frame.unwrap() {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
        }
    }

    async fn next_event(&mut self) -> ServerEvent {
        self.try_next_event(Duration::from_secs(5))
            .await
            .expect("expected an event")
    }

    async fn assert_silent(&mut self) {
        if let Some(event) = self.try_next_event(Duration::from_millis(200)).await {
            panic!("unexpected event: {event:?}");
        }
    }
}

#[tokio::test]
async fn handshake_then_message_relay() {
    let addr = spawn_server().await;
    let mut alice = Peer::joined(addr, "alice").await;
    let mut bob = Peer::joined(addr, "bob").await;

    alice
        .send(ClientCommand::SubmitRequest {
            sender: "alice".into(),
            receiver: "bob".into(),
            key_blob: "K1".into(),
        })
        .await;
    assert_eq!(
        bob.next_event().await,
        ServerEvent::RequestReceived {
            sender: "alice".into(),
            key_blob: "K1".into()
        }
    );

    bob.send(ClientCommand::SubmitResponse {
        sender: "alice".into(),
        receiver: "bob".into(),
        accepted: true,
        key_blob: Some("K2".into()),
    })
    .await;
    assert_eq!(
        alice.next_event().await,
        ServerEvent::RequestAccepted {
            receiver: "bob".into(),
            key_blob: "K2".into()
        }
    );

    alice
        .send(ClientCommand::SendMessage {
            sender: "alice".into(),
            receiver: "bob".into(),
            text: "c1".into(),
        })
        .await;
    assert_eq!(
        bob.next_event().await,
        ServerEvent::MessageReceived {
            sender: "alice".into(),
            text: "c1".into()
        }
    );

    bob.send(ClientCommand::EndSession {
        sender: "bob".into(),
        peer: "alice".into(),
    })
    .await;
    assert_eq!(
        alice.next_event().await,
        ServerEvent::SessionEnded { peer: "bob".into() }
    );
}

#[tokio::test]
async fn request_to_absent_user_is_dropped_silently() {
    let addr = spawn_server().await;
    let mut carol = Peer::joined(addr, "carol").await;

    carol
        .send(ClientCommand::SubmitRequest {
            sender: "carol".into(),
            receiver: "ghost".into(),
            key_blob: "K2".into(),
        })
        .await;
    carol.assert_silent().await;

    // The connection is still usable afterwards
    carol
        .send(ClientCommand::Join {
            username: "carol".into(),
            token: None,
        })
        .await;
    assert_eq!(
        carol.next_event().await,
        ServerEvent::Ready {
            username: "carol".into()
        }
    );
}

#[tokio::test]
async fn reconnect_routes_to_latest_connection() {
    let addr = spawn_server().await;
    let mut dave_old = Peer::joined(addr, "dave").await;
    let mut erin_old = Peer::joined(addr, "erin").await;
    let mut dave = Peer::joined(addr, "dave").await;
    let mut erin = Peer::joined(addr, "erin").await;

    dave.send(ClientCommand::SendMessage {
        sender: "dave".into(),
        receiver: "erin".into(),
        text: "hi".into(),
    })
    .await;
    assert_eq!(
        erin.next_event().await,
        ServerEvent::MessageReceived {
            sender: "dave".into(),
            text: "hi".into()
        }
    );

    erin.send(ClientCommand::SendMessage {
        sender: "erin".into(),
        receiver: "dave".into(),
        text: "hey".into(),
    })
    .await;
    assert_eq!(
        dave.next_event().await,
        ServerEvent::MessageReceived {
            sender: "erin".into(),
            text: "hey".into()
        }
    );

    dave_old.assert_silent().await;
    erin_old.assert_silent().await;

    // Closing a stale connection must not unregister the live one
    dave_old.ws.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    erin.send(ClientCommand::SendMessage {
        sender: "erin".into(),
        receiver: "dave".into(),
        text: "still there?".into(),
    })
    .await;
    assert_eq!(
        dave.next_event().await,
        ServerEvent::MessageReceived {
            sender: "erin".into(),
            text: "still there?".into()
        }
    );
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_connection() {
    let addr = spawn_server().await;
    let mut frank = Peer::connect(addr).await;

    frank.ws.send(Message::text("not json")).await.unwrap();
    frank
        .ws
        .send(Message::text(r#"{"type":"teleport","data":{}}"#))
        .await
        .unwrap();
    // Commands before join are refused
    frank
        .send(ClientCommand::SendMessage {
            sender: "frank".into(),
            receiver: "anyone".into(),
            text: "x".into(),
        })
        .await;
    frank.assert_silent().await;

    frank
        .send(ClientCommand::Join {
            username: "frank".into(),
            token: None,
        })
        .await;
    assert_eq!(
        frank.next_event().await,
        ServerEvent::Ready {
            username: "frank".into()
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registration_yields_one_winner() {
    let addr = spawn_server().await;
    let url = format!("http://{addr}/api/users/register");
    let http = reqwest::Client::new();

    for round in 0..3 {
        let username = format!("racer{round}");
        let attempts = (0..4).map(|_| {
            let http = http.clone();
            let url = url.clone();
            let body = serde_json::json!({ "username": username, "password": "correct horse" });
            tokio::spawn(async move { http.post(url).json(&body).send().await.unwrap().status() })
        });

        let mut statuses = Vec::new();
        for attempt in attempts.collect::<Vec<_>>() {
            statuses.push(attempt.await.unwrap());
        }
        statuses.sort();

        assert_eq!(
            statuses,
            vec![
                reqwest::StatusCode::CREATED,
                reqwest::StatusCode::CONFLICT,
                reqwest::StatusCode::CONFLICT,
                reqwest::StatusCode::CONFLICT,
            ]
        );
    }
}

#[tokio::test]
async fn directory_reports_login_and_live_connections() {
    let addr = spawn_server().await;
    let base = format!("http://{addr}/api/users");
    let http = reqwest::Client::new();

    let registered: RegisterResponse = http
        .post(format!("{base}/register"))
        .json(&serde_json::json!({ "username": "alice", "password": "correct horse" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!registered.token.is_empty());

    let duplicate = http
        .post(format!("{base}/register"))
        .json(&serde_json::json!({ "username": "alice", "password": "another one" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), reqwest::StatusCode::CONFLICT);

    let bad_login = http
        .post(format!("{base}/login"))
        .json(&serde_json::json!({ "username": "alice", "password": "wrong password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_login.status(), reqwest::StatusCode::UNAUTHORIZED);

    let login: LoginResponse = http
        .post(format!("{base}/login"))
        .json(&serde_json::json!({ "username": "alice", "password": "correct horse" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(login.username, "alice");

    let unauthorized = http.get(format!("{base}/online")).send().await.unwrap();
    assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);

    let online: Vec<UserPresence> = http
        .get(format!("{base}/online"))
        .bearer_auth(&login.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(online.len(), 1);
    assert!(online[0].is_online);

    let _alice = Peer::joined(addr, "alice").await;
    let connected: ConnectedUsers = http
        .get(format!("{base}/connected"))
        .bearer_auth(&login.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(connected.usernames, vec!["alice".to_string()]);

    let logout = http
        .post(format!("{base}/logout"))
        .bearer_auth(&login.token)
        .send()
        .await
        .unwrap();
    assert!(logout.status().is_success());

    let online: Vec<UserPresence> = http
        .get(format!("{base}/online"))
        .bearer_auth(&login.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!online[0].is_online);
}
