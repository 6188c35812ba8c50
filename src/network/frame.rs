//! Frame STOMP 1.2 trên WebSocket.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        let command = match value {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }

    // Header của CONNECT/CONNECTED không escape.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Header lặp lại thì lấy cái đầu tiên.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if !self.body.is_empty() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Bỏ qua EOL heartbeat giữa các frame.
    pub fn decode_all(input: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut pos = 0;
        loop {
            while pos < input.len() && matches!(input[pos], b'\n' | b'\r') {
                pos += 1;
            }
            if pos >= input.len() {
                break;
            }
            let (frame, consumed) = decode_one(&input[pos..])?;
            frames.push(frame);
            pos += consumed;
        }
        Ok(frames)
    }
}

fn decode_one(buf: &[u8]) -> Result<(Frame, usize)> {
    let mut cursor = 0;

    let line = next_line(buf, &mut cursor)
        .ok_or_else(|| ChatError::Decode("frame without command line".into()))?;
    let text = utf8(line)?;
    let command = Command::parse(text)
        .ok_or_else(|| ChatError::Decode(format!("unknown command `{text}`")))?;

    let escaped = command.escapes_headers();
    let mut headers = Vec::new();
    loop {
        let line = next_line(buf, &mut cursor)
            .ok_or_else(|| ChatError::Decode(format!("unterminated headers in {command}")))?;
        if line.is_empty() {
            break;
        }
        let text = utf8(line)?;
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| ChatError::Decode(format!("header without colon: `{text}`")))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let rest = &buf[cursor..];
    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| ChatError::Decode(format!("bad content-length `{value}`")))
        })
        .transpose()?;

    let (body, consumed) = match content_length {
        Some(len) => {
            if rest.len() <= len || rest[len] != 0 {
                return Err(ChatError::Decode(format!(
                    "{command} body does not match content-length {len}"
                )));
            }
            (rest[..len].to_vec(), len + 1)
        }
        None => {
            let end = rest
                .iter()
                .position(|byte| *byte == 0)
                .ok_or_else(|| ChatError::Decode(format!("{command} frame missing NUL")))?;
            (rest[..end].to_vec(), end + 1)
        }
    };

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        cursor + consumed,
    ))
}

fn next_line<'a>(buf: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let start = *cursor;
    let offset = buf[start..].iter().position(|byte| *byte == b'\n')?;
    *cursor = start + offset + 1;
    let line = &buf[start..start + offset];
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|err| ChatError::Decode(format!("invalid utf-8: {err}")))
}

fn escape_header(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '\n', '\r', ':']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

fn unescape_header(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ChatError::Decode(format!(
                    "invalid header escape `\\{}`",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// Chu kỳ mình phải gửi.
    pub send_every: Option<Duration>,
    /// Chu kỳ broker hứa gửi.
    pub expect_within: Option<Duration>,
}

impl Heartbeat {
    pub fn negotiate(client: (u64, u64), server_header: Option<&str>) -> Self {
        let (server_out, server_in) = server_header.and_then(parse_heartbeat).unwrap_or((0, 0));
        let (client_out, client_in) = client;

        let pick = |ours: u64, theirs: u64| {
            (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
        };

        Self {
            send_every: pick(client_out, server_in),
            expect_within: pick(client_in, server_out),
        }
    }
}

fn parse_heartbeat(value: &str) -> Option<(u64, u64)> {
    let (out, inc) = value.split_once(',')?;
    Some((out.trim().parse().ok()?, inc.trim().parse().ok()?))
}
