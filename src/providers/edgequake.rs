//! Adapter exposing any edgequake-llm provider as a [`VisionModel`].
//!
//! Lets the pipeline run against Anthropic, Gemini, Mistral, Ollama and the
//! other providers edgequake-llm knows, selected by name. Each provider reads
//! its own API key variable (`ANTHROPIC_API_KEY`, `GEMINI_API_KEY`, …).
//!
//! Content blocks reach us two ways: a successful response whose
//! `finish_reason` is `content_filter` (Gemini passes `SAFETY` through
//! unmapped), or an [`LlmError::ApiError`] whose message names the content
//! filter. Everything else is a [`ProviderError`] and gets retried.

use crate::error::{AnalysisError, ProviderError};
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::llm::{GenerationOptions, ModelResponse, VisionModel};
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ImageData, LLMProvider, LLMResponse, LlmError, ProviderFactory,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Finish reasons that mean the provider withheld the output.
const BLOCKING_FINISH_REASONS: &[&str] = &["content_filter", "safety"];

/// Content-filter markers edgequake-llm providers put in `ApiError` text.
static RE_CONTENT_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)finish_reason=content_filter|content[ _]filter|content[ _]policy[ _]violation")
        .unwrap()
});

/// A [`VisionModel`] backed by an edgequake-llm provider.
pub struct EdgequakeVisionClient {
    provider: Arc<dyn LLMProvider>,
    label: String,
    timeout: Duration,
}

impl EdgequakeVisionClient {
    /// Wrap a provider the caller already built.
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        label: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            provider,
            label: label.into(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// Instantiate a named provider through [`ProviderFactory`].
    pub fn from_name(name: &str, model: &str, timeout_secs: u64) -> Result<Self, AnalysisError> {
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            AnalysisError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider, name, timeout_secs))
    }
}

#[async_trait]
impl VisionModel for EdgequakeVisionClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn analyze(
        &self,
        image: &EncodedImage,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ModelResponse, ProviderError> {
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![ImageData::new(image.data.clone(), image.mime_type).with_detail("high")],
        )];
        let completion = CompletionOptions {
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_tokens),
            ..Default::default()
        };

        let call = self.provider.chat(&messages, Some(&completion));
        let response = match timeout(self.timeout, call).await {
            Err(_) => {
                return Err(ProviderError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => return classify_error(e, self.timeout.as_secs()),
            Ok(Ok(r)) => r,
        };

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        Ok(classify_response(response))
    }
}

fn classify_response(response: LLMResponse) -> ModelResponse {
    if let Some(reason) = response.finish_reason.as_deref() {
        if BLOCKING_FINISH_REASONS
            .iter()
            .any(|r| r.eq_ignore_ascii_case(reason))
        {
            return ModelResponse::Blocked {
                reason: reason.to_ascii_lowercase(),
            };
        }
    }
    ModelResponse::from_text(&response.content)
}

fn classify_error(err: LlmError, timeout_secs: u64) -> Result<ModelResponse, ProviderError> {
    match err {
        LlmError::ApiError(message) if RE_CONTENT_FILTER.is_match(&message) => {
            Ok(ModelResponse::Blocked { reason: message })
        }
        LlmError::RateLimited(_) => Err(ProviderError::RateLimited {
            retry_after_secs: None,
        }),
        LlmError::AuthError(detail) => Err(ProviderError::Auth { detail }),
        LlmError::NetworkError(detail) => Err(ProviderError::Transport { detail }),
        LlmError::Timeout => Err(ProviderError::Timeout { secs: timeout_secs }),
        other => Err(ProviderError::Api {
            message: other.to_string(),
        }),
    }
}
