//! Built-in client for OpenAI-compatible `chat/completions` endpoints.
//!
//! One user message carries the prompt as a text part and the image as an
//! `image_url` part holding a `data:image/jpeg;base64,...` URL. Works against
//! api.openai.com and any server speaking the same dialect (vLLM, LiteLLM,
//! Azure-style proxies) via `base_url`.

use crate::error::{AnalysisError, ProviderError};
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::llm::{GenerationOptions, ModelResponse, VisionModel};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

// ── OpenAI-compatible serde structs ──────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    code: Option<String>,
}

/// Vision client for an OpenAI-compatible API.
pub struct OpenAiVisionClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl fmt::Debug for OpenAiVisionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiVisionClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl OpenAiVisionClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| AnalysisError::Internal(format!("HTTP client: {e}")))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let model = model.into();
        info!("OpenAI client configured: base_url={}, model={}", base_url, model);

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url,
            model,
            timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze(
        &self,
        image: &EncodedImage,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ModelResponse, ProviderError> {
        let request = build_request(&self.model, image, prompt, options);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    ProviderError::Transport {
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let body = response.text().await.map_err(|e| ProviderError::Transport {
            detail: e.to_string(),
        })?;

        if !status.is_success() {
            return interpret_error(status, retry_after, &body);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
                detail: e.to_string(),
            })?;
        if let Some(ref usage) = parsed.usage {
            debug!(
                "{}: {} input tokens, {} output tokens",
                self.model, usage.prompt_tokens, usage.completion_tokens
            );
        }
        interpret_response(parsed)
    }
}

fn build_request<'a>(
    model: &'a str,
    image: &EncodedImage,
    prompt: &'a str,
    options: &GenerationOptions,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::Text { text: prompt },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                    },
                },
            ],
        }],
        max_tokens: options.max_tokens,
        temperature: options.temperature,
    }
}

fn interpret_response(parsed: ChatResponse) -> Result<ModelResponse, ProviderError> {
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse {
            detail: "response contained no choices".into(),
        })?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Ok(ModelResponse::Blocked {
            reason: "content_filter".into(),
        });
    }

    let Some(message) = choice.message else {
        return Ok(ModelResponse::Empty);
    };
    if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
        return Ok(ModelResponse::Blocked {
            reason: refusal.trim().to_string(),
        });
    }
    Ok(message
        .content
        .map(ModelResponse::from_text)
        .unwrap_or(ModelResponse::Empty))
}

fn interpret_error(
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> Result<ModelResponse, ProviderError> {
    let api_error = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let message = api_error
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| truncate(body, 500));

    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited {
            retry_after_secs: retry_after,
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ProviderError::Auth { detail: message })
        }
        StatusCode::BAD_REQUEST
            if api_error.as_ref().and_then(|e| e.code.as_deref())
                == Some("content_policy_violation") =>
        {
            Ok(ModelResponse::Blocked { reason: message })
        }
        _ => Err(ProviderError::Status {
            status: status.as_u16(),
            body: message,
        }),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
