//! Channel trait and the event types every transport produces.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Trigger id of the "new task" button.
pub const NEW_TASK_TRIGGER: &str = "new_task";

/// Label of the "new task" button.
pub const NEW_TASK_LABEL: &str = "Новая задача";

/// Opaque, stable identity of a user as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A slash command the bot understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
    /// Anything else; ignored by the dialog.
    Other(String),
}

impl Command {
    /// Parse `/name`, `/name@botname` or `/name args` into a command.
    ///
    /// Returns `None` when `text` is not a command at all.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix('/')?;
        let word = rest.split_whitespace().next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default().to_lowercase();

        Some(match name.as_str() {
            "start" => Self::Start,
            "cancel" => Self::Cancel,
            _ => Self::Other(name),
        })
    }
}

/// What the user did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Command(Command),
    /// A button press, carrying the button's trigger id.
    Trigger(String),
    /// A plain text message.
    Text(String),
}

impl EventKind {
    /// Classify raw message text as a command or plain text.
    pub fn from_text(text: &str) -> Self {
        match Command::parse(text) {
            Some(command) => Self::Command(command),
            None => Self::Text(text.to_string()),
        }
    }
}

/// An inbound event tagged with the user who caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: UserId,
    /// Where replies go (a Telegram chat id, or a fixed id for the console).
    pub chat_id: String,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(user_id: impl Into<UserId>, chat_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            kind,
        }
    }

    pub fn command(user_id: impl Into<UserId>, chat_id: impl Into<String>, command: Command) -> Self {
        Self::new(user_id, chat_id, EventKind::Command(command))
    }

    pub fn trigger(
        user_id: impl Into<UserId>,
        chat_id: impl Into<String>,
        trigger: impl Into<String>,
    ) -> Self {
        Self::new(user_id, chat_id, EventKind::Trigger(trigger.into()))
    }

    pub fn text(user_id: impl Into<UserId>, chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(user_id, chat_id, EventKind::Text(text.into()))
    }
}

/// A labeled, user-activatable action attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affordance {
    pub label: String,
    pub trigger: String,
}

impl Affordance {
    pub fn new(label: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            trigger: trigger.into(),
        }
    }

    /// The "start a new task" button.
    pub fn new_task() -> Self {
        Self::new(NEW_TASK_LABEL, NEW_TASK_TRIGGER)
    }
}

/// Stream of inbound events from a channel.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// A chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving events.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Send a text message, optionally with buttons.
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        affordances: &[Affordance],
    ) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
