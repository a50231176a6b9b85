//! Error observer — where failed events are reported.

use crate::channels::UserId;
use crate::error::Error;

/// Receives every error the dialog could not handle.
pub trait ErrorObserver: Send + Sync {
    fn report(&self, user_id: &UserId, error: &Error);
}

/// Logs errors through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorObserver;

impl ErrorObserver for TracingErrorObserver {
    fn report(&self, user_id: &UserId, error: &Error) {
        tracing::error!(user_id = %user_id, error = %error, "Error while handling an update");
    }
}
