//! Dialog engine — applies inbound events to a user's session.
//!
//! Legal moves:
//!
//! | state                 | event           | next                  |
//! |-----------------------|-----------------|-----------------------|
//! | any                   | `/start`        | Idle                  |
//! | any                   | `new_task` tap  | AwaitingEnvironment   |
//! | AwaitingEnvironment   | text            | AwaitingTask          |
//! | AwaitingTask          | text            | Idle (plan sent)      |
//! | any                   | `/cancel`       | Idle                  |
//!
//! Everything else is ignored. The session is only written after the
//! outbound messages for a move went through, so a failed move leaves the
//! user where they were.

use std::sync::Arc;

use tracing::debug;

use crate::channels::{
    Affordance, Channel, Command, EventKind, InboundEvent, NEW_TASK_TRIGGER, UserId,
};
use crate::error::Error;
use crate::planner::{PlanGenerator, prompt};

use super::observer::ErrorObserver;
use super::state::{DialogState, Session};
use super::store::SessionStore;

pub const GREETING: &str = "Здравствуйте! Нажмите кнопку ниже, чтобы начать новую задачу.";
pub const ASK_ENVIRONMENT: &str = "Пожалуйста, введите описание комнаты.";
pub const ASK_TASK: &str = "Спасибо! Теперь введите задание, которое нужно выполнить.";
pub const PLAN_LABEL: &str = "План действий:";
pub const OFFER_NEW_TASK: &str = "Для составления нового плана, нажмите кнопку снизу";
pub const CANCELLED: &str = "Диалог завершен.";

/// Everything the engine needs, bundled to keep the constructor short.
pub struct DialogDeps {
    pub store: Arc<SessionStore>,
    pub generator: Arc<PlanGenerator>,
    /// Where replies are sent.
    pub outbox: Arc<dyn Channel>,
    pub observer: Arc<dyn ErrorObserver>,
}

/// The finite-state controller for the planning dialog.
pub struct DialogEngine {
    deps: DialogDeps,
}

impl DialogEngine {
    pub fn new(deps: DialogDeps) -> Self {
        Self { deps }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.deps.store
    }

    /// Handle an event and report any failure to the observer.
    pub async fn dispatch(&self, event: &InboundEvent) {
        if let Err(e) = self.handle(event).await {
            self.deps.observer.report(&event.user_id, &e);
        }
    }

    /// Apply one event to its user's session and return the resulting state.
    ///
    /// Generation and transport errors are returned unchanged; the session
    /// is not touched in that case.
    pub async fn handle(&self, event: &InboundEvent) -> Result<DialogState, Error> {
        let user = &event.user_id;
        let session = self.deps.store.get(user).await;

        let next = match (&event.kind, session.state) {
            (EventKind::Command(Command::Start), _) => {
                self.reply(event, GREETING, &[Affordance::new_task()]).await?;
                self.deps.store.clear(user).await;
                DialogState::Idle
            }

            (EventKind::Command(Command::Cancel), _) => {
                self.reply(event, CANCELLED, &[]).await?;
                self.deps.store.clear(user).await;
                DialogState::Idle
            }

            (EventKind::Trigger(trigger), _) if trigger == NEW_TASK_TRIGGER => {
                self.reply(event, ASK_ENVIRONMENT, &[]).await?;
                self.deps
                    .store
                    .set(user, Session::awaiting_environment())
                    .await;
                DialogState::AwaitingEnvironment
            }

            (EventKind::Text(text), DialogState::AwaitingEnvironment) => {
                self.reply(event, ASK_TASK, &[]).await?;
                self.deps.store.set(user, Session::awaiting_task(text)).await;
                DialogState::AwaitingTask
            }

            (EventKind::Text(task), DialogState::AwaitingTask) => {
                let environment = session.environment.as_deref().unwrap_or_default();
                self.complete_plan(event, environment, task).await?;
                DialogState::Idle
            }

            (EventKind::Text(_), DialogState::Idle)
            | (EventKind::Command(Command::Other(_)), _)
            | (EventKind::Trigger(_), _) => {
                debug!(user_id = %user, state = %session.state, "Ignoring event");
                return Ok(session.state);
            }
        };

        debug!(user_id = %user, from = %session.state, to = %next, "Dialog transition");
        Ok(next)
    }

    /// Build the prompt, generate, and send the plan followed by the offer
    /// to start over. Nothing is sent if generation fails.
    ///
    /// The session is cleared once the plan itself is delivered; a failed
    /// offer afterwards does not put the user back to awaiting a task.
    async fn complete_plan(
        &self,
        event: &InboundEvent,
        environment: &str,
        task: &str,
    ) -> Result<(), Error> {
        let prompt = prompt::build(environment, task)?;
        let plan = self.deps.generator.generate(&prompt).await?;

        self.reply(event, PLAN_LABEL, &[]).await?;
        self.reply(event, &plan, &[]).await?;
        self.deps.store.clear(&event.user_id).await;

        self.reply(event, OFFER_NEW_TASK, &[Affordance::new_task()])
            .await?;
        Ok(())
    }

    async fn reply(
        &self,
        event: &InboundEvent,
        text: &str,
        affordances: &[Affordance],
    ) -> Result<(), Error> {
        self.deps
            .outbox
            .send_text(&event.chat_id, text, affordances)
            .await?;
        Ok(())
    }

    /// Current session for `user`, mainly for diagnostics.
    pub async fn session(&self, user: &UserId) -> Session {
        self.deps.store.get(user).await
    }
}
