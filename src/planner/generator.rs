//! Plan generator — sends a rendered prompt to the LLM and returns the plan text.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{LlmError, PlanError};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Configuration for plan generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// LLM sampling temperature.
    pub temperature: f32,
    /// Nucleus-sampling cutoff.
    pub top_p: f32,
    /// Upper bound on a single provider call.
    pub timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            top_p: 0.9,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Turns a prompt into a plan with exactly one provider call.
pub struct PlanGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl PlanGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate a plan for an already-rendered prompt.
    ///
    /// No retries: any provider failure, a timeout, or an empty answer is
    /// returned as [`PlanError::GenerationUnavailable`].
    pub async fn generate(&self, prompt: &str) -> Result<String, PlanError> {
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(self.config.temperature)
            .with_top_p(self.config.top_p);

        info!(
            model = self.llm.model_name(),
            prompt_chars = prompt.chars().count(),
            "Generating plan"
        );

        let response = tokio::time::timeout(self.config.timeout, self.llm.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.llm.model_name().to_string(),
                timeout: self.config.timeout,
            })??;

        let plan = response.content.trim();
        if plan.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty plan".to_string(),
            }
            .into());
        }

        debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            finish_reason = ?response.finish_reason,
            "Plan generated"
        );

        Ok(plan.to_string())
    }
}
