//! Handshake STOMP và vòng lặp I/O của một kết nối.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::dispatcher::Dispatcher;
use super::frame::{Command, Frame, Heartbeat};
use crate::error::{ChatError, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Chiều gửi của kết nối.
pub trait FrameSink: Send + Sync {
    fn is_connected(&self) -> bool;
    fn send_frame(&self, frame: Frame) -> Result<()>;
}

#[derive(Default)]
pub struct Link {
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, sender: mpsc::UnboundedSender<Frame>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    pub(crate) fn detach(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl FrameSink for Link {
    fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    fn send_frame(&self, frame: Frame) -> Result<()> {
        let guard = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(ChatError::NotConnected)?;
        sender.send(frame).map_err(|_| ChatError::NotConnected)
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeParams<'a> {
    pub url: &'a str,
    pub token: &'a str,
    pub heartbeat_ms: u64,
    pub timeout: Duration,
}

/// Mọi lỗi trước CONNECTED đều thành [`ChatError::Handshake`].
pub async fn open(params: HandshakeParams<'_>) -> Result<(WsStream, Heartbeat)> {
    match tokio::time::timeout(params.timeout, handshake(&params)).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::Handshake(format!(
            "no CONNECTED within {:?}",
            params.timeout
        ))),
    }
}

async fn handshake(params: &HandshakeParams<'_>) -> Result<(WsStream, Heartbeat)> {
    let host = params
        .url
        .parse::<Uri>()
        .ok()
        .and_then(|uri| uri.authority().map(|authority| authority.host().to_string()))
        .unwrap_or_else(|| "localhost".to_string());

    let (mut ws, _) = connect_async(params.url)
        .await
        .map_err(|err| ChatError::Handshake(format!("{}: {err}", params.url)))?;

    let connect = Frame::new(Command::Connect)
        .header("accept-version", "1.2,1.1")
        .header("host", host)
        .header(
            "heart-beat",
            format!("{},{}", params.heartbeat_ms, params.heartbeat_ms),
        )
        .header("Authorization", format!("Bearer {}", params.token));
    ws.send(to_ws(&connect))
        .await
        .map_err(|err| ChatError::Handshake(format!("sending CONNECT: {err}")))?;

    loop {
        let payload = match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
            Some(Ok(WsMessage::Binary(bytes))) => bytes,
            Some(Ok(WsMessage::Close(reason))) => {
                return Err(ChatError::Handshake(format!(
                    "broker closed the socket: {reason:?}"
                )));
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(ChatError::Handshake(err.to_string())),
            None => return Err(ChatError::Handshake("socket closed".into())),
        };

        let frames = Frame::decode_all(&payload)
            .map_err(|err| ChatError::Handshake(err.to_string()))?;
        let Some(frame) = frames.into_iter().next() else {
            continue;
        };
        return match frame.command {
            Command::Connected => {
                let heartbeat = Heartbeat::negotiate(
                    (params.heartbeat_ms, params.heartbeat_ms),
                    frame.get("heart-beat"),
                );
                log::info!(
                    "STOMP session established (version {}, heartbeat {:?})",
                    frame.get("version").unwrap_or("1.0"),
                    heartbeat
                );
                Ok((ws, heartbeat))
            }
            Command::Error => Err(ChatError::Handshake(error_reason(&frame))),
            other => Err(ChatError::Handshake(format!(
                "expected CONNECTED, got {other}"
            ))),
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Closed,
    Dropped(String),
}

// Callback được gọi tuần tự, không bao giờ song song.
pub async fn run_session(
    ws: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
    dispatcher: &Dispatcher,
    heartbeat: Heartbeat,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut writer, mut reader) = ws.split();

    let tick_every = [heartbeat.send_every, heartbeat.expect_within]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(Duration::from_secs(3600));
    let mut ticker = tokio::time::interval(tick_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_read = Instant::now();
    let mut last_write = Instant::now();

    loop {
        tokio::select! {
            biased;

            queued = outbound.recv() => {
                let Some(frame) = queued else {
                    return SessionEnd::Closed;
                };
                let is_disconnect = frame.command == Command::Disconnect;
                if let Err(err) = writer.send(to_ws(&frame)).await {
                    return SessionEnd::Dropped(format!("write failed: {err}"));
                }
                last_write = Instant::now();
                if is_disconnect {
                    let _ = writer.close().await;
                    return SessionEnd::Closed;
                }
            }

            changed = shutdown.changed() => {
                let stop = changed.is_err() || *shutdown.borrow();
                if stop {
                    let _ = writer.close().await;
                    return SessionEnd::Closed;
                }
            }

            incoming = reader.next() => {
                let payload = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                    Some(Ok(WsMessage::Binary(bytes))) => bytes,
                    Some(Ok(WsMessage::Close(reason))) => {
                        return SessionEnd::Dropped(format!("broker closed the socket: {reason:?}"));
                    }
                    Some(Ok(_)) => {
                        last_read = Instant::now();
                        continue;
                    }
                    Some(Err(err)) => return SessionEnd::Dropped(format!("read failed: {err}")),
                    None => return SessionEnd::Dropped("socket closed".into()),
                };
                last_read = Instant::now();

                let frames = match Frame::decode_all(&payload) {
                    Ok(frames) => frames,
                    Err(err) => {
                        log::warn!("Dropping undecodable payload: {err}");
                        continue;
                    }
                };
                for frame in frames {
                    match frame.command {
                        Command::Message => {
                            if let Err(err) = dispatcher.dispatch(&frame) {
                                log::warn!("Dropping inbound message: {err}");
                            }
                        }
                        Command::Receipt => {
                            log::debug!("Receipt {}", frame.get("receipt-id").unwrap_or("?"));
                        }
                        Command::Error => {
                            let reason = error_reason(&frame);
                            log::error!("Broker reported an error: {reason}");
                            return SessionEnd::Dropped(reason);
                        }
                        other => log::debug!("Ignoring {other} frame"),
                    }
                }
            }

            _ = ticker.tick() => {
                if let Some(limit) = heartbeat.expect_within {
                    if last_read.elapsed() > limit * 2 {
                        return SessionEnd::Dropped(format!(
                            "no heartbeat from broker for {:?}",
                            last_read.elapsed()
                        ));
                    }
                }
                if let Some(every) = heartbeat.send_every {
                    if last_write.elapsed() >= every {
                        if let Err(err) = writer.send(WsMessage::Text("\n".into())).await {
                            return SessionEnd::Dropped(format!("heartbeat failed: {err}"));
                        }
                        last_write = Instant::now();
                    }
                }
            }
        }
    }
}

fn to_ws(frame: &Frame) -> WsMessage {
    match String::from_utf8(frame.encode()) {
        Ok(text) => WsMessage::Text(text),
        Err(err) => WsMessage::Binary(err.into_bytes()),
    }
}

fn error_reason(frame: &Frame) -> String {
    let summary = frame.get("message").unwrap_or("broker error");
    let detail = frame.body_text();
    if detail.trim().is_empty() {
        summary.to_string()
    } else {
        format!("{summary}: {}", detail.trim())
    }
}
