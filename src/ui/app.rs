use std::io::Write;
use std::sync::Arc;

use chrono::Local;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use super::render::{format_message, format_state};
use super::state::ChatState;
use crate::api::HistoryLoader;
use crate::common::{ChatCommand, ChatEvent, GroupId, MessageKind, Session};
use crate::error::{ChatError, Result};
use crate::network::ChatClient;

/// Màn hình chat trên terminal. Luôn rời nhóm đang mở trước khi ngắt kết nối.
pub struct ChatApp<W: Write> {
    client: Arc<ChatClient>,
    history: HistoryLoader,
    session: Session,
    page_size: u32,
    state: ChatState,
    out: W,
    events_tx: mpsc::UnboundedSender<ChatEvent>,
    events_rx: mpsc::UnboundedReceiver<ChatEvent>,
}

impl<W: Write> ChatApp<W> {
    pub fn new(
        client: Arc<ChatClient>,
        history: HistoryLoader,
        session: Session,
        page_size: u32,
        out: W,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client,
            history,
            session,
            page_size,
            state: ChatState::new(),
            out,
            events_tx,
            events_rx,
        }
    }

    pub async fn run<R>(&mut self, group_id: &str, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.show(&format_state(&crate::ConnectionState::Connecting))?;
        if let Err(err) = self.client.connect(&self.session.token).await {
            self.show(&format!("!! {err}"))?;
            return Err(err);
        }

        let result = self.screen(group_id, input).await;

        if let Some(active) = self.state.active().map(str::to_string) {
            self.client.leave(&active);
        }
        self.client.disconnect().await;
        result
    }

    async fn screen<R>(&mut self, group_id: &str, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut state_rx = self.client.watch_state();
        self.show(&format_state(&state_rx.borrow().clone()))?;
        self.open_group(group_id).await?;

        let mut lines = input.lines();
        let mut watching = true;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        return Ok(());
                    };
                    match ChatCommand::parse(&line) {
                        Some(ChatCommand::Quit) => return Ok(()),
                        Some(command) => self.handle(command).await?,
                        None => {}
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    let own = self.session.user_id().to_string();
                    if let Some(message) = self.state.apply(event) {
                        let line = format_message(message, &own, &Local);
                        writeln!(self.out, "{line}")?;
                    }
                }

                changed = state_rx.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let current = state_rx.borrow_and_update().clone();
                    self.show(&format_state(&current))?;
                    let connected = current.is_connected();
                    self.state.apply(ChatEvent::StateChanged(current));
                    if connected {
                        self.resume_live_updates()?;
                    }
                }
            }
        }
    }

    async fn handle(&mut self, command: ChatCommand) -> Result<()> {
        match command {
            ChatCommand::Send(text) => {
                let Some(active) = self.state.active().map(str::to_string) else {
                    return self.show("!! no group open");
                };
                match self.client.send(&active, &text, MessageKind::Text) {
                    Ok(()) => Ok(()),
                    Err(ChatError::NotConnected) => {
                        self.show("!! not connected; message not sent")
                    }
                    Err(err) => Err(err),
                }
            }
            ChatCommand::SwitchGroup(next) => {
                if self.state.active() == Some(next.as_str()) {
                    return Ok(());
                }
                if let Some(previous) = self.state.active().map(str::to_string) {
                    self.client.leave(&previous);
                    self.state.set_active(None);
                }
                self.open_group(&next).await
            }
            ChatCommand::History => {
                let Some(active) = self.state.active().map(str::to_string) else {
                    return self.show("!! no group open");
                };
                self.load_history(&active).await?;
                self.show(&format!("== group {active} (history) =="))?;
                self.redraw()
            }
            ChatCommand::Quit => Ok(()),
        }
    }

    async fn open_group(&mut self, group_id: &str) -> Result<()> {
        self.state.set_active(Some(group_id.to_string()));
        self.show(&format!("== group {group_id} =="))?;
        self.load_history(group_id).await?;
        self.redraw()?;
        self.subscribe(group_id)
    }

    // Nhóm mở lúc mất kết nối chưa có trong registry nên không được resubscribe.
    fn resume_live_updates(&mut self) -> Result<()> {
        let Some(active) = self.state.active().map(str::to_string) else {
            return Ok(());
        };
        if self.client.registry().is_joined(&active) {
            return Ok(());
        }
        self.subscribe(&active)
    }

    fn subscribe(&mut self, group_id: &str) -> Result<()> {
        let events = self.events_tx.clone();
        let group: GroupId = group_id.to_string();
        let joined = self.client.join(group_id, move |message| {
            let event = ChatEvent::MessageReceived {
                group_id: group.clone(),
                message,
            };
            if events.send(event).is_err() {
                log::debug!("Chat screen closed; dropping message for {group}");
            }
        });
        match joined {
            Ok(()) => Ok(()),
            Err(ChatError::NotConnected) => self.show("!! not connected; live updates paused"),
            Err(err) => Err(err),
        }
    }

    // Lỗi REST chỉ hiển thị ra màn hình, riêng 401 thì thoát.
    async fn load_history(&mut self, group_id: &str) -> Result<()> {
        match self.history.load(group_id, 0, self.page_size).await {
            Ok(messages) => {
                self.state.load_history(group_id, messages);
                Ok(())
            }
            Err(ChatError::Unauthorized) => Err(ChatError::Unauthorized),
            Err(err) => {
                log::warn!("Loading history for {group_id} failed: {err}");
                self.show(&format!("!! could not load history: {err}"))
            }
        }
    }

    fn redraw(&mut self) -> Result<()> {
        let own = self.session.user_id();
        let lines: Vec<String> = self
            .state
            .active_timeline()
            .map(|timeline| {
                timeline
                    .messages()
                    .iter()
                    .map(|message| format_message(message, own, &Local))
                    .collect()
            })
            .unwrap_or_default();
        for line in lines {
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn show(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        Ok(())
    }
}
