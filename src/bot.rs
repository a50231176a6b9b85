//! Main bot loop — pulls events off the channel and fans them out per user.
//!
//! Each user gets a queue and a worker task. Events for one user run in
//! arrival order; different users never wait on each other, so a slow
//! generation for one user does not hold up anyone else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channels::{Channel, InboundEvent, UserId};
use crate::dialog::DialogEngine;
use crate::error::Error;

/// A worker with nothing to do for this long shuts down.
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// A user's queue and the task draining it.
struct UserWorker {
    tx: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

/// Routes events to per-user workers.
///
/// Workers exit once idle; the next event for that user starts a new one.
pub struct Dispatcher {
    engine: Arc<DialogEngine>,
    idle_timeout: Duration,
    workers: HashMap<UserId, UserWorker>,
}

impl Dispatcher {
    pub fn new(engine: Arc<DialogEngine>) -> Self {
        Self::with_idle_timeout(engine, WORKER_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(engine: Arc<DialogEngine>, idle_timeout: Duration) -> Self {
        Self {
            engine,
            idle_timeout,
            workers: HashMap::new(),
        }
    }

    /// Queue an event behind any earlier events from the same user.
    pub fn submit(&mut self, event: InboundEvent) {
        self.workers.retain(|_, worker| !worker.handle.is_finished());

        let user = event.user_id.clone();
        let (event, previous) = match self.workers.remove(&user) {
            Some(worker) => match worker.tx.send(event) {
                Ok(()) => {
                    self.workers.insert(user, worker);
                    return;
                }
                // The worker went idle (or panicked) and closed its queue; it
                // may still be finishing earlier events.
                Err(mpsc::error::SendError(event)) => (event, Some(worker.handle)),
            },
            None => (event, None),
        };

        let worker = spawn_worker(
            Arc::clone(&self.engine),
            user.clone(),
            self.idle_timeout,
            previous,
        );
        if worker.tx.send(event).is_err() {
            tracing::error!(user_id = %user, "Freshly spawned worker rejected an event");
        }
        self.workers.insert(user, worker);
    }

    /// Number of users whose worker is still running.
    pub fn active_users(&self) -> usize {
        self.workers
            .values()
            .filter(|worker| !worker.handle.is_finished())
            .count()
    }

    /// Close every queue and wait for queued events to finish.
    pub async fn finish(self) {
        for (user, worker) in self.workers {
            drop(worker.tx);
            if let Err(e) = worker.handle.await {
                tracing::warn!(user_id = %user, "Worker ended abnormally: {e}");
            }
        }
    }

    /// Stop all workers without waiting for queued events.
    pub fn abort(self) {
        for worker in self.workers.into_values() {
            worker.handle.abort();
        }
    }
}

/// Start a worker for `user`. If `previous` is set, it runs to completion
/// before this worker touches its own queue.
fn spawn_worker(
    engine: Arc<DialogEngine>,
    user: UserId,
    idle_timeout: Duration,
    previous: Option<JoinHandle<()>>,
) -> UserWorker {
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
    tracing::debug!(user_id = %user, "Starting user worker");

    let handle = tokio::spawn(async move {
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        loop {
            match tokio::time::timeout(idle_timeout, rx.recv()).await {
                Ok(Some(event)) => engine.dispatch(&event).await,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        // Idle: refuse new events, then finish whatever slipped in.
        rx.close();
        while let Some(event) = rx.recv().await {
            engine.dispatch(&event).await;
        }
        tracing::debug!(user_id = %user, "User worker idle, stopping");
    });

    UserWorker { tx, handle }
}

/// The running bot: one channel, one dialog engine.
pub struct Bot {
    channel: Arc<dyn Channel>,
    dispatcher: Dispatcher,
}

impl Bot {
    pub fn new(channel: Arc<dyn Channel>, engine: Arc<DialogEngine>) -> Self {
        Self {
            channel,
            dispatcher: Dispatcher::new(engine),
        }
    }

    /// Run until Ctrl+C or until the channel's event stream ends.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut events = self.channel.start().await?;

        tracing::info!(channel = self.channel.name(), "Bot ready and listening");

        let interrupted = loop {
            let event = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break true;
                }
                event = events.next() => event,
            };

            match event {
                Some(event) => self.dispatcher.submit(event),
                None => {
                    tracing::info!("Channel stream ended, shutting down...");
                    break false;
                }
            }
        };

        if interrupted {
            self.dispatcher.abort();
        } else {
            self.dispatcher.finish().await;
        }

        self.channel.shutdown().await?;
        Ok(())
    }
}
