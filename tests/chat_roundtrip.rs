use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use circlo_chat::api::{ApiClient, HistoryLoader};
use circlo_chat::network::{Command, Frame, ReconnectPolicy, TransportSettings};
use circlo_chat::storage::SessionStore;
use circlo_chat::ui::ChatApp;
use circlo_chat::{ChatClient, ChatError, ConnectionState, Message, MessageKind, Session};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Delivery {
    /// `force`: gửi cả cho kết nối chưa subscribe.
    Publish {
        topic: String,
        body: String,
        force: bool,
    },
    /// Đóng mọi socket.
    Kick,
}

/// Broker STOMP giả chạy trong test.
struct FakeBroker {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Frame>>>,
    feed: broadcast::Sender<Delivery>,
}

impl FakeBroker {
    async fn start(reject_connect: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (feed, _) = broadcast::channel(64);
        let counter = Arc::new(AtomicU64::new(0));

        let accept_received = received.clone();
        let accept_feed = feed.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(serve(
                    tcp,
                    accept_received.clone(),
                    accept_feed.clone(),
                    counter.clone(),
                    reject_connect,
                ));
            }
        });

        Self {
            addr,
            received,
            feed,
        }
    }

    fn settings(&self) -> TransportSettings {
        TransportSettings {
            ws_url: format!("ws://{}/ws/websocket", self.addr),
            heartbeat_ms: 0,
            handshake_timeout: Duration::from_secs(2),
            reconnect: ReconnectPolicy {
                initial_delay_ms: 50,
                max_delay_ms: 200,
                multiplier: 2,
                max_attempts: 5,
            },
        }
    }

    fn frames(&self, command: Command) -> Vec<Frame> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.command == command)
            .cloned()
            .collect()
    }

    async fn wait_for<F>(&self, what: &str, check: F)
    where
        F: Fn(&[Frame]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let done = check(self.received.lock().unwrap().as_slice());
            if done {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "broker never saw {what}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn inject(&self, group_id: &str, id: &str, content: &str) {
        let body = serde_json::json!({
            "id": id,
            "senderId": "u7",
            "senderName": "Bao",
            "content": content,
            "type": "TEXT",
            "sentAt": "2026-10-17T09:00:00Z",
        });
        self.feed
            .send(Delivery::Publish {
                topic: format!("/topic/chat/{group_id}"),
                body: body.to_string(),
                force: true,
            })
            .unwrap();
    }
}

async fn serve(
    tcp: TcpStream,
    received: Arc<Mutex<Vec<Frame>>>,
    feed: broadcast::Sender<Delivery>,
    counter: Arc<AtomicU64>,
    reject_connect: bool,
) {
    let Ok(mut ws) = accept_async(tcp).await else {
        return;
    };
    let mut deliveries = feed.subscribe();
    // destination -> subscription id
    let mut subscriptions: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            incoming = ws.next() => {
                let payload = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                    Some(Ok(WsMessage::Binary(bytes))) => bytes,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let Ok(frames) = Frame::decode_all(&payload) else {
                    return;
                };
                for frame in frames {
                    received.lock().unwrap().push(frame.clone());
                    match frame.command {
                        Command::Connect | Command::Stomp => {
                            let reply = if reject_connect {
                                Frame::new(Command::Error)
                                    .header("message", "Unauthorized")
                                    .with_body("invalid token")
                            } else {
                                Frame::new(Command::Connected)
                                    .header("version", "1.2")
                                    .header("heart-beat", "0,0")
                            };
                            let _ = ws.send(text(&reply)).await;
                            if reject_connect {
                                let _ = ws.close(None).await;
                                return;
                            }
                        }
                        Command::Subscribe => {
                            if let (Some(id), Some(destination)) =
                                (frame.get("id"), frame.get("destination"))
                            {
                                subscriptions.insert(destination.to_string(), id.to_string());
                            }
                        }
                        Command::Unsubscribe => {
                            if let Some(id) = frame.get("id") {
                                subscriptions.retain(|_, sub| sub.as_str() != id);
                            }
                        }
                        Command::Send => {
                            let destination = frame.get("destination").unwrap_or_default();
                            let group = destination.trim_start_matches("/app/chat/");
                            let sent: serde_json::Value =
                                serde_json::from_slice(&frame.body).unwrap_or_default();
                            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                            let body = serde_json::json!({
                                "id": format!("m{n}"),
                                "groupId": group,
                                "senderId": "u1",
                                "senderName": "Ana",
                                "content": sent["content"],
                                "type": sent["type"],
                                "sentAt": "2026-10-17T09:00:00Z",
                            });
                            let _ = feed.send(Delivery::Publish {
                                topic: format!("/topic/chat/{group}"),
                                body: body.to_string(),
                                force: false,
                            });
                        }
                        Command::Disconnect => {
                            if let Some(receipt) = frame.get("receipt") {
                                let reply = Frame::new(Command::Receipt).header("receipt-id", receipt);
                                let _ = ws.send(text(&reply)).await;
                            }
                        }
                        _ => {}
                    }
                }
            }

            delivery = deliveries.recv() => {
                let Ok(delivery) = delivery else {
                    return;
                };
                match delivery {
                    Delivery::Kick => {
                        let _ = ws.close(None).await;
                        return;
                    }
                    Delivery::Publish { topic, body, force } => {
                        let subscription = match subscriptions.get(&topic) {
                            Some(id) => id.clone(),
                            None if force => "sub-999".to_string(),
                            None => continue,
                        };
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        let message = Frame::new(Command::Message)
                            .header("destination", topic)
                            .header("subscription", subscription)
                            .header("message-id", format!("mid-{n}"))
                            .header("content-type", "application/json")
                            .with_body(body);
                        if ws.send(text(&message)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn text(frame: &Frame) -> WsMessage {
    WsMessage::Text(String::from_utf8(frame.encode()).unwrap())
}

fn collector() -> (
    impl Fn(Message) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Message>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |message| {
            let _ = tx.send(message);
        },
        rx,
    )
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no message delivered in time")
        .expect("callback channel closed")
}

#[tokio::test]
async fn sent_message_comes_back_through_the_group_callback() {
    let broker = FakeBroker::start(false).await;
    let client = ChatClient::new(broker.settings());

    client.connect("token-123").await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let (on_message, mut rx) = collector();
    client.join("g42", on_message).unwrap();
    // Join lần hai không gửi frame nào.
    client.join("g42", |_| panic!("replaced callback must never run")).unwrap();

    client.send("g42", "hi", MessageKind::Text).unwrap();
    let message = next(&mut rx).await;
    assert_eq!(message.content, "hi");
    assert_eq!(message.sender_id, "u1");
    assert_eq!(message.group_id, "g42");
    assert_eq!(message.kind, MessageKind::Text);
    assert!(message.sent_at.is_some());

    let connect = &broker.frames(Command::Connect)[0];
    assert_eq!(connect.get("Authorization"), Some("Bearer token-123"));
    assert_eq!(connect.get("heart-beat"), Some("0,0"));

    let subscribes = broker.frames(Command::Subscribe);
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0].get("destination"), Some("/topic/chat/g42"));

    let send = &broker.frames(Command::Send)[0];
    assert_eq!(send.get("destination"), Some("/app/chat/g42"));
    assert_eq!(send.get("Authorization"), Some("Bearer token-123"));
    let body: serde_json::Value = serde_json::from_slice(&send.body).unwrap();
    assert_eq!(body, serde_json::json!({"content": "hi", "type": "TEXT"}));

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    broker
        .wait_for("UNSUBSCRIBE then DISCONNECT", |frames| {
            let unsubscribe = frames.iter().position(|f| f.command == Command::Unsubscribe);
            let disconnect = frames.iter().position(|f| f.command == Command::Disconnect);
            matches!((unsubscribe, disconnect), (Some(u), Some(d)) if u < d)
        })
        .await;
    assert!(matches!(
        client.send("g42", "late", MessageKind::Text),
        Err(ChatError::NotConnected)
    ));
}

#[tokio::test]
async fn switching_groups_isolates_callbacks() {
    let broker = FakeBroker::start(false).await;
    let client = ChatClient::new(broker.settings());
    client.connect("token").await.unwrap();

    let (first, mut first_rx) = collector();
    let (second, mut second_rx) = collector();
    client.join("g1", first).unwrap();
    assert!(client.leave("g1"));
    client.join("g2", second).unwrap();

    broker
        .wait_for("SUBSCRIBE for g2", |frames| {
            frames.iter().any(|f| {
                f.command == Command::Subscribe && f.get("destination") == Some("/topic/chat/g2")
            })
        })
        .await;

    broker.inject("g1", "stale", "for g1 only");
    broker.inject("g2", "fresh", "for g2");

    let message = next(&mut second_rx).await;
    assert_eq!(message.id, "fresh");
    assert_eq!(message.group_id, "g2");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(second_rx.try_recv().is_err());
    assert!(first_rx.try_recv().is_err());

    client.disconnect().await;
}

#[tokio::test]
async fn rejected_handshake_is_reported() {
    let broker = FakeBroker::start(true).await;
    let client = ChatClient::new(broker.settings());

    let err = client.connect("expired").await.unwrap_err();
    match err {
        ChatError::Handshake(reason) => assert!(reason.contains("Unauthorized")),
        other => panic!("expected a handshake failure, got {other:?}"),
    }
    assert!(matches!(client.state(), ConnectionState::ConnectFailed(_)));
    assert!(!client.is_connected());
    assert!(matches!(client.join("g42", |_| {}), Err(ChatError::NotConnected)));
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resubscribes() {
    let broker = FakeBroker::start(false).await;
    let client = ChatClient::new(broker.settings());
    client.connect("token").await.unwrap();

    let (on_message, mut rx) = collector();
    client.join("g42", on_message).unwrap();
    broker
        .wait_for("first SUBSCRIBE", |frames| {
            frames.iter().any(|f| f.command == Command::Subscribe)
        })
        .await;

    let mut states = client.watch_state();
    broker.feed.send(Delivery::Kick).unwrap();

    broker
        .wait_for("second CONNECT and SUBSCRIBE", |frames| {
            let count = |command: Command| frames.iter().filter(|f| f.command == command).count();
            count(Command::Connect) == 2 && count(Command::Subscribe) == 2
        })
        .await;
    tokio::time::timeout(WAIT, states.wait_for(|state| state.is_connected()))
        .await
        .unwrap()
        .unwrap();

    let subscribes = broker.frames(Command::Subscribe);
    assert_eq!(subscribes[0].get("id"), subscribes[1].get("id"));

    client.send("g42", "back again", MessageKind::Text).unwrap();
    assert_eq!(next(&mut rx).await.content, "back again");

    client.disconnect().await;
}

/// Màn hình terminal ghi vào bộ nhớ.
#[derive(Clone, Default)]
struct Screen(Arc<Mutex<Vec<u8>>>);

impl Screen {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    async fn wait_for(&self, needle: &str) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !self.text().contains(needle) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "screen never showed {needle:?}:\n{}",
                self.text()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Write for Screen {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn ana() -> Session {
    Session {
        user: serde_json::from_value(serde_json::json!({"id": "u1", "name": "Ana"})).unwrap(),
        token: "token".into(),
        refresh_token: None,
    }
}

fn chat_app(client: &Arc<ChatClient>, api_base_url: &str) -> (ChatApp<Screen>, Screen) {
    let store = Arc::new(SessionStore::in_memory().unwrap());
    let api = ApiClient::new(api_base_url, Duration::from_secs(1), store).unwrap();
    let screen = Screen::default();
    let app = ChatApp::new(
        client.clone(),
        HistoryLoader::new(api),
        ana(),
        50,
        screen.clone(),
    );
    (app, screen)
}

// Không có REST server nào nghe ở cổng này.
const NO_REST: &str = "http://127.0.0.1:9/api/v1";

async fn history(Path(group): Path<String>) -> Result<Json<serde_json::Value>, StatusCode> {
    if group != "g42" {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(serde_json::json!([
        {"id": "h1", "groupId": "g42", "senderId": "u7", "senderName": "Bao",
         "content": "earlier", "type": "TEXT", "sentAt": "2026-10-17T08:00:00Z"},
    ])))
}

async fn rest_backend() -> String {
    let router = Router::new().route("/api/v1/chat/groups/:group/messages", get(history));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}/api/v1")
}

fn left_before_disconnect(frames: &[Frame]) -> bool {
    let unsubscribe = frames.iter().position(|f| f.command == Command::Unsubscribe);
    let disconnect = frames.iter().position(|f| f.command == Command::Disconnect);
    matches!((unsubscribe, disconnect), (Some(u), Some(d)) if u < d)
}

fn subscribed_to(group_id: &str) -> impl Fn(&[Frame]) -> bool {
    let destination = format!("/topic/chat/{group_id}");
    move |frames: &[Frame]| {
        frames.iter().any(|f| {
            f.command == Command::Subscribe && f.get("destination") == Some(destination.as_str())
        })
    }
}

#[tokio::test]
async fn chat_screen_sends_shows_and_leaves_on_quit() {
    let broker = FakeBroker::start(false).await;
    let client = Arc::new(ChatClient::new(broker.settings()));
    let (mut app, screen) = chat_app(&client, NO_REST);
    let (mut keyboard, input) = tokio::io::duplex(256);

    let typing = async {
        screen.wait_for("could not load history").await;
        keyboard.write_all(b"hi\n").await.unwrap();
        screen.wait_for("you: hi").await;
        keyboard.write_all(b"/quit\n").await.unwrap();
    };
    let (result, ()) = tokio::join!(app.run("g42", BufReader::new(input)), typing);
    result.unwrap();

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.registry().is_empty());
    broker
        .wait_for("UNSUBSCRIBE before DISCONNECT", left_before_disconnect)
        .await;
}

#[tokio::test]
async fn chat_screen_leaves_when_input_ends() {
    let broker = FakeBroker::start(false).await;
    let client = Arc::new(ChatClient::new(broker.settings()));
    let (mut app, _screen) = chat_app(&client, NO_REST);
    let (keyboard, input) = tokio::io::duplex(256);

    let broker_ref = &broker;
    let typing = async move {
        broker_ref.wait_for("SUBSCRIBE for g42", subscribed_to("g42")).await;
        drop(keyboard);
    };
    let (result, ()) = tokio::join!(app.run("g42", BufReader::new(input)), typing);
    result.unwrap();

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.registry().is_empty());
    broker
        .wait_for("UNSUBSCRIBE before DISCONNECT", left_before_disconnect)
        .await;
}

#[tokio::test]
async fn expired_session_on_switch_ends_the_screen_after_leaving() {
    let broker = FakeBroker::start(false).await;
    let client = Arc::new(ChatClient::new(broker.settings()));
    let api_base_url = rest_backend().await;
    let (mut app, screen) = chat_app(&client, &api_base_url);
    let (mut keyboard, input) = tokio::io::duplex(256);

    let broker_ref = &broker;
    let typing = async {
        screen.wait_for("Bao: earlier").await;
        broker_ref.wait_for("SUBSCRIBE for g42", subscribed_to("g42")).await;

        // Tải lại lịch sử in dưới một dòng phân cách.
        keyboard.write_all(b"/history\n").await.unwrap();
        screen.wait_for("== group g42 (history) ==").await;
        let text = screen.text();
        let (before, after) = text.split_once("== group g42 (history) ==").unwrap();
        assert_eq!(before.matches("Bao: earlier").count(), 1);
        assert_eq!(after.matches("Bao: earlier").count(), 1);

        keyboard.write_all(b"/switch locked\n").await.unwrap();
    };
    let (result, ()) = tokio::join!(app.run("g42", BufReader::new(input)), typing);
    assert!(matches!(result, Err(ChatError::Unauthorized)));

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.registry().is_empty());
    broker
        .wait_for("UNSUBSCRIBE before DISCONNECT", left_before_disconnect)
        .await;
}

#[tokio::test]
async fn group_opened_while_reconnecting_is_joined_once_connected() {
    let broker = FakeBroker::start(false).await;
    let mut settings = broker.settings();
    settings.reconnect.initial_delay_ms = 500;
    settings.reconnect.max_delay_ms = 1_000;
    let client = Arc::new(ChatClient::new(settings));
    let (mut app, screen) = chat_app(&client, NO_REST);
    let (mut keyboard, input) = tokio::io::duplex(256);

    let broker_ref = &broker;
    let client_ref = &client;
    let typing = async {
        broker_ref.wait_for("SUBSCRIBE for g42", subscribed_to("g42")).await;
        broker_ref.feed.send(Delivery::Kick).unwrap();
        screen.wait_for("reconnecting (attempt 1)").await;

        keyboard.write_all(b"/switch g7\n").await.unwrap();
        screen.wait_for("live updates paused").await;

        broker_ref.wait_for("SUBSCRIBE for g7", subscribed_to("g7")).await;
        let deadline = tokio::time::Instant::now() + WAIT;
        while !client_ref.registry().is_joined("g7") {
            assert!(tokio::time::Instant::now() < deadline, "g7 never joined");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        keyboard.write_all(b"hello\n").await.unwrap();
        screen.wait_for("you: hello").await;
        keyboard.write_all(b"/quit\n").await.unwrap();
    };
    let (result, ()) = tokio::join!(app.run("g42", BufReader::new(input)), typing);
    result.unwrap();

    assert!(client.registry().is_empty());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
