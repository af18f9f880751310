//! Configuration types for image analysis.
//!
//! All behaviour is controlled through [`AnalysisConfig`], built via its
//! [`AnalysisConfigBuilder`]. The config is read-only once built and is the
//! only state shared between concurrent requests, so it is cheap to clone
//! and safe to hand to every request.

use crate::error::AnalysisError;
use crate::pipeline::llm::{GenerationOptions, RetryPolicy, VisionModel};
use crate::pipeline::normalize::NormalizeOptions;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default OpenAI-compatible endpoint used by the built-in client.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for an image analysis request.
///
/// Built via [`AnalysisConfig::builder()`] or using
/// [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use image_insight::{AnalysisConfig, PipelineMode};
///
/// let config = AnalysisConfig::builder()
///     .mode(PipelineMode::Staged)
///     .max_dimension(1024)
///     .temperature(0.4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// API key for the built-in OpenAI-compatible client.
    /// If None, `OPENAI_API_KEY` is read when the client is built.
    pub api_key: Option<String>,

    /// Vision model identifier. Default: "gpt-4o".
    pub model: String,

    /// edgequake-llm provider name (e.g. "anthropic", "gemini", "ollama").
    /// If None, the built-in OpenAI-compatible client is used.
    pub provider_name: Option<String>,

    /// Base URL of the OpenAI-compatible API. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,

    /// Pre-constructed vision client. Takes precedence over everything else.
    pub client: Option<Arc<dyn VisionModel>>,

    /// Single consolidated call or five staged calls. Default: Consolidated.
    pub mode: PipelineMode,

    /// Largest accepted input, in bytes. Default: 10 MiB.
    pub max_image_bytes: u64,

    /// Lower-case file extensions whose formats are accepted.
    /// Default: png, jpg, jpeg, webp, gif.
    pub allowed_extensions: Vec<String>,

    /// Longest edge after normalisation, in pixels. Default: 2048.
    pub max_dimension: u32,

    /// Colour transparent pixels are flattened onto. Default: white.
    pub background: [u8; 3],

    /// JPEG quality for the image sent to the model (1–100). Default: 95.
    pub jpeg_quality: u8,

    /// Sampling temperature. Default: 0.7.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 2048.
    pub max_tokens: usize,

    /// Attempts per model call, including the first one. Default: 3.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds; doubles after each
    /// further failure. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Optional per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: None,
            mode: PipelineMode::default(),
            max_image_bytes: 10 * 1024 * 1024,
            allowed_extensions: ["png", "jpg", "jpeg", "webp", "gif"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_dimension: 2048,
            background: [255, 255, 255],
            jpeg_quality: 95,
            temperature: 0.7,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("base_url", &self.base_url)
            .field("client", &self.client.as_ref().map(|_| "<dyn VisionModel>"))
            .field("mode", &self.mode)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("max_dimension", &self.max_dimension)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// Limits applied by the validator/normaliser.
    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            max_bytes: self.max_image_bytes,
            allowed_extensions: self.allowed_extensions.clone(),
            max_dimension: self.max_dimension,
            background: self.background,
        }
    }

    /// Sampling settings passed to every model call.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            base_delay: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Whether `filename` carries one of the allowed extensions.
    ///
    /// Upload layers call this before reading the body; the normaliser
    /// checks the sniffed format independently.
    pub fn is_allowed_filename(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|a| *a == ext)
            })
            .unwrap_or(false)
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn client(mut self, client: Arc<dyn VisionModel>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn mode(mut self, mode: PipelineMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_image_bytes(mut self, bytes: u64) -> Self {
        self.config.max_image_bytes = bytes;
        self
    }

    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn background(mut self, rgb: [u8; 3]) -> Self {
        self.config.background = rgb;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalysisError> {
        let c = &self.config;
        if c.max_dimension == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_dimension must be ≥ 1".into(),
            ));
        }
        if c.max_image_bytes == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_image_bytes must be ≥ 1".into(),
            ));
        }
        if c.allowed_extensions.is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "at least one allowed extension is required".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(AnalysisError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.model.trim().is_empty() {
            return Err(AnalysisError::InvalidConfig("model must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the five artefacts are requested from the model.
///
/// The two modes differ in cost and in what a failure leaves behind:
///
/// | Mode | Calls | On failure |
/// |------|-------|------------|
/// | Consolidated | 1 | fixed placeholder text in every field, `error` set |
/// | Staged | 5 | fields finished so far kept, the rest empty, `error` set |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// One prompt asking for a JSON object with all five fields. (default)
    #[default]
    Consolidated,
    /// Five prompts, later ones quoting the earlier outputs.
    Staged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AnalysisConfig::default();
        assert_eq!(c.max_image_bytes, 10 * 1024 * 1024);
        assert_eq!(c.max_dimension, 2048);
        assert_eq!(c.jpeg_quality, 95);
        assert_eq!(c.temperature, 0.7);
        assert_eq!(c.max_tokens, 2048);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.mode, PipelineMode::Consolidated);
    }

    #[test]
    fn retry_policy_from_config() {
        let c = AnalysisConfig::builder().retry_backoff_ms(250).build().unwrap();
        let p = c.retry_policy();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = AnalysisConfig::builder()
            .temperature(5.0)
            .jpeg_quality(0)
            .max_retries(0)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.jpeg_quality, 1);
        assert_eq!(c.max_retries, 1);

        assert!(AnalysisConfig::builder().max_dimension(0).build().is_err());
        assert!(AnalysisConfig::builder()
            .allowed_extensions(Vec::<String>::new())
            .build()
            .is_err());
    }

    #[test]
    fn filename_allow_list() {
        let c = AnalysisConfig::default();
        assert!(c.is_allowed_filename("photo.JPG"));
        assert!(c.is_allowed_filename("a.b.webp"));
        assert!(!c.is_allowed_filename("notes.txt"));
        assert!(!c.is_allowed_filename("no_extension"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = AnalysisConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
