//! Dialog state machine — tracks where each user is in the conversation.

use serde::{Deserialize, Serialize};

/// The states of the planning dialog.
///
/// Progresses: Idle → AwaitingEnvironment → AwaitingTask → Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogState {
    #[default]
    Idle,
    AwaitingEnvironment,
    AwaitingTask,
}

impl std::fmt::Display for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingEnvironment => "awaiting_environment",
            Self::AwaitingTask => "awaiting_task",
        };
        write!(f, "{s}")
    }
}

/// Per-user dialog progress and partially collected context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub state: DialogState,
    /// Room description, present only while awaiting the task.
    pub environment: Option<String>,
}

impl Session {
    /// Waiting for the room description, with nothing collected yet.
    pub fn awaiting_environment() -> Self {
        Self {
            state: DialogState::AwaitingEnvironment,
            environment: None,
        }
    }

    /// Room description collected, waiting for the task.
    pub fn awaiting_task(environment: impl Into<String>) -> Self {
        Self {
            state: DialogState::AwaitingTask,
            environment: Some(environment.into()),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == DialogState::Idle
    }
}
