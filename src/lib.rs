//! Client chat nhóm realtime cho các activity của Circlo.

pub mod api;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod storage;
pub mod ui;

pub use common::{ChatCommand, ChatEvent, Group, GroupId, Message, MessageKind, Session, User};
pub use error::{ChatError, Result};
pub use network::{ChatClient, ConnectionState};
