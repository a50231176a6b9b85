//! LLM integration for Plan Assist.
//!
//! Supports:
//! - **GigaChat**: direct REST access with OAuth token exchange
//!
//! The rest of the crate talks to the `LlmProvider` trait only.

pub mod gigachat;
pub mod provider;

pub use gigachat::GigaChatClient;
pub use provider::*;

use std::sync::Arc;

use crate::config::GigaChatConfig;
use crate::error::LlmError;

/// Create the GigaChat provider from configuration.
pub fn create_provider(config: &GigaChatConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let client = GigaChatClient::new(config)?;
    tracing::info!(
        model = %config.model,
        verify_ssl = config.verify_ssl_certs,
        "Using GigaChat"
    );
    Ok(Arc::new(client))
}
