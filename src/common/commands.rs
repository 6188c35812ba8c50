use super::types::GroupId;

/// Lệnh từ màn hình chat gửi xuống tầng mạng.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Send(String),
    SwitchGroup(GroupId),
    History,
    Quit,
}

impl ChatCommand {
    /// Dòng trống hoặc lệnh không hợp lệ trả về `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Some(ChatCommand::Send(line.to_string()));
        };

        let mut parts = command.splitn(2, char::is_whitespace);
        match parts.next()? {
            "quit" | "q" | "exit" => Some(ChatCommand::Quit),
            "history" => Some(ChatCommand::History),
            "switch" => {
                let group = parts.next()?.trim();
                (!group.is_empty()).then(|| ChatCommand::SwitchGroup(group.to_string()))
            }
            other => {
                log::debug!("Unknown chat command `/{other}`");
                None
            }
        }
    }
}
