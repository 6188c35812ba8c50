use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::backoff::{Backoff, ReconnectPolicy};
use super::dispatcher::Dispatcher;
use super::frame::{Command, Frame, Heartbeat};
use super::publisher::{Credentials, Publisher};
use super::registry::SubscriptionRegistry;
use super::transport::{self, FrameSink, HandshakeParams, Link, SessionEnd, WsStream};
use crate::common::{Message, MessageKind};
use crate::error::{ChatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    ConnectFailed(String),
    Disconnected,
    /// Hết lượt thử; chỉ `connect` mới thoát được.
    GaveUp { attempts: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::ConnectFailed(reason) => write!(f, "connect failed: {reason}"),
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::GaveUp { attempts } => {
                write!(f, "offline; gave up after {attempts} reconnect attempts")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub ws_url: String,
    pub heartbeat_ms: u64,
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

struct Shared {
    settings: TransportSettings,
    link: Arc<Link>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    credentials: Credentials,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        log::info!("Chat connection {state}");
        self.state.send_replace(state);
    }

    fn handshake_params<'a>(&'a self, token: &'a str) -> HandshakeParams<'a> {
        HandshakeParams {
            url: &self.settings.ws_url,
            token,
            heartbeat_ms: self.settings.heartbeat_ms,
            timeout: self.settings.handshake_timeout,
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Quản lý kết nối chat: một WebSocket và registry của nó.
pub struct ChatClient {
    shared: Arc<Shared>,
    publisher: Publisher,
    running: Mutex<Option<Running>>,
}

impl ChatClient {
    pub fn new(settings: TransportSettings) -> Self {
        let link = Arc::new(Link::new());
        let sink: Arc<dyn FrameSink> = link.clone();
        let registry = Arc::new(SubscriptionRegistry::new(sink.clone()));
        let credentials: Credentials = Arc::new(RwLock::new(None));
        let (state, _) = watch::channel(ConnectionState::Idle);

        Self {
            publisher: Publisher::new(sink, credentials.clone()),
            shared: Arc::new(Shared {
                settings,
                link,
                dispatcher: Dispatcher::new(registry.clone()),
                registry,
                credentials,
                state,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    pub async fn connect(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ChatError::MissingToken);
        }
        if self.is_connected() {
            log::debug!("connect() while already connected; ignoring");
            return Ok(());
        }
        // Task cũ có thể vẫn đang chờ kết nối lại.
        self.stop().await;

        self.shared.set_state(ConnectionState::Connecting);
        let (ws, heartbeat) = match transport::open(self.shared.handshake_params(token)).await {
            Ok(opened) => opened,
            Err(err) => {
                self.shared
                    .set_state(ConnectionState::ConnectFailed(err.to_string()));
                return Err(err);
            }
        };

        *self
            .shared
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.shared.link.attach(outbound_tx);
        self.shared.set_state(ConnectionState::Connected);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            self.shared.clone(),
            token.to_string(),
            ws,
            heartbeat,
            outbound_rx,
            shutdown_rx,
        ));
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Running { shutdown, task });
        Ok(())
    }

    pub fn join<F>(&self, group_id: &str, on_message: F) -> Result<()>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.shared.registry.join(group_id, on_message)
    }

    pub fn leave(&self, group_id: &str) -> bool {
        self.shared.registry.leave(group_id)
    }

    pub fn send(&self, group_id: &str, content: &str, kind: MessageKind) -> Result<()> {
        self.publisher.send(group_id, content, kind)
    }

    /// Rời mọi nhóm, gửi DISCONNECT rồi đóng socket.
    pub async fn disconnect(&self) {
        self.shared.registry.clear();
        if self.shared.link.is_connected() {
            let goodbye =
                Frame::new(Command::Disconnect).header("receipt", Uuid::new_v4().to_string());
            if let Err(err) = self.shared.link.send_frame(goodbye) {
                log::debug!("DISCONNECT not sent: {err}");
            }
        }
        self.stop().await;
        self.shared.link.detach();
        *self
            .shared
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Running { shutdown, task }) = running {
            shutdown.send_replace(true);
            if let Err(err) = task.await {
                log::warn!("Chat connection task ended abnormally: {err}");
            }
        }
    }
}

async fn supervise(
    shared: Arc<Shared>,
    token: String,
    mut ws: WsStream,
    mut heartbeat: Heartbeat,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(shared.settings.reconnect);

    loop {
        let end =
            transport::run_session(ws, &mut outbound, &shared.dispatcher, heartbeat, &mut shutdown)
                .await;
        shared.link.detach();

        let reason = match end {
            SessionEnd::Closed => return,
            SessionEnd::Dropped(reason) => reason,
        };
        log::warn!("Chat connection lost: {reason}");

        loop {
            let Some(delay) = backoff.next_delay() else {
                log::error!(
                    "Giving up on the chat connection after {} attempts",
                    backoff.attempts()
                );
                shared.set_state(ConnectionState::GaveUp {
                    attempts: backoff.attempts(),
                });
                return;
            };
            shared.set_state(ConnectionState::Reconnecting {
                attempt: backoff.attempts(),
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }

            match transport::open(shared.handshake_params(&token)).await {
                Ok((new_ws, negotiated)) => {
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    shared.link.attach(outbound_tx);
                    outbound = outbound_rx;
                    if let Err(err) = shared.registry.resubscribe_all() {
                        log::warn!("Resubscribing after reconnect failed: {err}");
                    }
                    ws = new_ws;
                    heartbeat = negotiated;
                    backoff.reset();
                    shared.set_state(ConnectionState::Connected);
                    break;
                }
                Err(err) => log::warn!("Reconnect attempt {} failed: {err}", backoff.attempts()),
            }
        }
    }
}
