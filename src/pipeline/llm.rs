//! VLM interaction: the client seam and the retry loop around it.
//!
//! [`VisionModel`] is the only thing the pipeline knows about the provider:
//! send one image and one prompt, get text (or a refusal) back. Concrete
//! clients live in [`crate::providers`]; tests substitute scripted fakes.
//!
//! ## Retry Strategy
//!
//! Any [`ProviderError`] is retried. With `max_attempts = 3` and a 1 s base
//! delay the calls go out at t = 0 s, 1 s and 3 s (waits of 1 s then 2 s),
//! after which the last error is returned. A refusal
//! ([`ModelResponse::Blocked`]) or an empty reply is a successful call and
//! is never retried.

use crate::error::ProviderError;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Text substituted when the provider returned nothing.
pub const NO_RESPONSE_SENTINEL: &str = "[No response generated]";

/// Sampling settings for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// Outcome of a call the provider answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelResponse {
    /// Generated text, trimmed.
    Text(String),
    /// The provider declined to generate (safety filter, refusal).
    Blocked { reason: String },
    /// The provider answered with no content.
    Empty,
}

impl ModelResponse {
    /// Build from raw provider text; blank text becomes [`ModelResponse::Empty`].
    pub fn from_text(text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim();
        if text.is_empty() {
            ModelResponse::Empty
        } else {
            ModelResponse::Text(text.to_string())
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, ModelResponse::Blocked { .. })
    }

    /// The text to record, with sentinels standing in for refusals and
    /// empty replies.
    pub fn into_text(self) -> String {
        match self {
            ModelResponse::Text(t) => t,
            ModelResponse::Blocked { reason } => format!("[Response blocked: {reason}]"),
            ModelResponse::Empty => NO_RESPONSE_SENTINEL.to_string(),
        }
    }
}

/// A vision-capable model: one image plus one prompt in, text out.
///
/// Implementations hold only connection state and credentials; they must be
/// safe to share across concurrent requests and must not cache results.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Short provider label for logs, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// Make exactly one call. No retries here.
    async fn analyze(
        &self,
        image: &EncodedImage,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ModelResponse, ProviderError>;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Treated as at least 1.
    pub max_attempts: u32,
    /// Wait after the first failure; doubles after each later one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after the failure of 0-based `attempt`: base × 2^attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Every wait the policy can produce, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.max(1) - 1)
            .map(|a| self.delay_after(a))
            .collect()
    }
}

/// Call `model` until it answers or the policy's attempts run out.
///
/// Returns the first successful [`ModelResponse`]; otherwise the error of
/// the final attempt.
pub async fn analyze_with_retry(
    model: &dyn VisionModel,
    image: &EncodedImage,
    prompt: &str,
    options: &GenerationOptions,
    policy: &RetryPolicy,
) -> Result<ModelResponse, ProviderError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match model.analyze(image, prompt, options).await {
            Ok(response) => {
                if response.is_blocked() {
                    warn!("{}: response blocked by provider", model.name());
                }
                debug!("{}: succeeded on attempt {}/{}", model.name(), attempt + 1, attempts);
                return Ok(response);
            }
            Err(e) if attempt + 1 < attempts => {
                let backoff = policy.delay_after(attempt);
                warn!(
                    "{}: attempt {}/{} failed — {}; retrying in {:?}",
                    model.name(),
                    attempt + 1,
                    attempts,
                    e,
                    backoff
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{}: attempt {}/{} failed — {}; giving up",
                    model.name(),
                    attempt + 1,
                    attempts,
                    e
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.schedule(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(p.delay_after(3), Duration::from_secs(8));
    }

    #[test]
    fn single_attempt_has_no_waits() {
        let p = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
        };
        assert!(p.schedule().is_empty());
        let zero = RetryPolicy {
            max_attempts: 0,
            ..p
        };
        assert!(zero.schedule().is_empty());
    }

    #[test]
    fn huge_attempt_index_saturates() {
        let p = RetryPolicy::default();
        assert!(p.delay_after(64) >= p.delay_after(31));
    }

    #[test]
    fn sentinels_for_blocked_and_empty() {
        assert_eq!(ModelResponse::from_text("  \n"), ModelResponse::Empty);
        assert_eq!(ModelResponse::Empty.into_text(), NO_RESPONSE_SENTINEL);
        assert_eq!(
            ModelResponse::Blocked {
                reason: "content_filter".into()
            }
            .into_text(),
            "[Response blocked: content_filter]"
        );
        assert_eq!(ModelResponse::from_text(" hi ").into_text(), "hi");
    }
}
