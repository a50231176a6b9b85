//! Dialog system — per-user conversation that collects a room description
//! and a task, then hands both to the planner.

pub mod engine;
pub mod observer;
pub mod state;
pub mod store;

pub use engine::{DialogDeps, DialogEngine};
pub use observer::{ErrorObserver, TracingErrorObserver};
pub use state::{DialogState, Session};
pub use store::SessionStore;
