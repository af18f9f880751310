//! Analysis entry points.
//!
//! One request runs strictly in sequence:
//!
//! ```text
//! resolve input → normalise + encode (spawn_blocking) → model call(s) → assemble
//! ```
//!
//! Only input, configuration and internal failures come back as `Err`. Once
//! the image has been accepted every outcome is an [`AnalysisResult`]; a
//! provider or parse failure is recorded in its `error` field, next to
//! whatever the model produced before it.

use crate::config::{AnalysisConfig, PipelineMode};
use crate::error::{AnalysisError, PipelineFailure};
use crate::output::{AnalysisResult, ImageMetadata, Stage};
use crate::pipeline::encode::{encode_jpeg, EncodedImage};
use crate::pipeline::input::ImageInput;
use crate::pipeline::llm::{analyze_with_retry, ModelResponse, VisionModel};
use crate::pipeline::normalize::normalize;
use crate::pipeline::parse::{clean_text, parse_consolidated};
use crate::progress::{AnalysisProgressCallback, NoopProgressCallback};
use crate::prompts::{stage_prompt, StageContext, CONSOLIDATED_PROMPT};
use crate::providers::{EdgequakeVisionClient, OpenAiVisionClient};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A configured analyser: one vision client plus the config it runs with.
///
/// Holds no per-request state; share it (`Arc<ImageAnalyzer>`) across
/// concurrent requests.
#[derive(Clone)]
pub struct ImageAnalyzer {
    model: Arc<dyn VisionModel>,
    config: AnalysisConfig,
}

impl fmt::Debug for ImageAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAnalyzer")
            .field("model", &self.model.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ImageAnalyzer {
    /// Build the vision client described by `config`.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let model = resolve_client(&config)?;
        Ok(Self { model, config })
    }

    /// Use `model` regardless of what `config` names.
    pub fn with_model(model: Arc<dyn VisionModel>, config: AnalysisConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyse raw bytes, a seekable stream or base64 text.
    pub async fn process_image<'a>(
        &self,
        input: impl Into<ImageInput<'a>>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let start = Instant::now();
        let bytes = input.into().resolve(self.config.max_image_bytes)?;
        info!(
            "Starting analysis: {} bytes, {:?} mode, {}",
            bytes.len(),
            self.config.mode,
            self.model.name()
        );

        let (metadata, encoded) = self.prepare(bytes).await?;

        let result = match self.config.mode {
            PipelineMode::Consolidated => self.run_consolidated(&encoded, metadata).await,
            PipelineMode::Staged => self.run_staged(&encoded, metadata).await,
        };

        match result.error {
            None => info!("Analysis complete in {:?}", start.elapsed()),
            Some(ref e) => warn!("Analysis finished with error in {:?}: {}", start.elapsed(), e),
        }
        Ok(result)
    }

    /// Analyse base64 text, with or without a `data:image/...;base64,` header.
    pub async fn process_base64_image(&self, data: &str) -> Result<AnalysisResult, AnalysisError> {
        self.process_image(ImageInput::base64(data)).await
    }

    /// Normalise and encode on the blocking pool.
    async fn prepare(&self, bytes: Vec<u8>) -> Result<(ImageMetadata, EncodedImage), AnalysisError> {
        let opts = self.config.normalize_options();
        let quality = self.config.jpeg_quality;

        tokio::task::spawn_blocking(move || -> Result<_, AnalysisError> {
            let normalized = normalize(&bytes, &opts)?;
            if normalized.was_resized() {
                debug!(
                    "Resized {}x{} → {}x{}",
                    normalized.original_size.0,
                    normalized.original_size.1,
                    normalized.width(),
                    normalized.height()
                );
            }
            let encoded = encode_jpeg(&normalized.image, quality)
                .map_err(|e| AnalysisError::Internal(format!("JPEG encoding failed: {e}")))?;
            Ok((normalized.metadata(), encoded))
        })
        .await
        .map_err(|e| AnalysisError::Internal(format!("Normalisation task panicked: {e}")))?
    }

    fn progress(&self) -> &dyn AnalysisProgressCallback {
        self.config
            .progress_callback
            .as_deref()
            .unwrap_or(&NoopProgressCallback)
    }

    /// One call, one JSON object. Any failure yields the placeholder record.
    async fn run_consolidated(&self, image: &EncodedImage, metadata: ImageMetadata) -> AnalysisResult {
        let cb = self.progress();
        let policy = self.config.retry_policy();
        cb.on_analysis_start(1);
        cb.on_stage_start(Stage::Caption, 1, 1);

        let outcome = analyze_with_retry(
            self.model.as_ref(),
            image,
            CONSOLIDATED_PROMPT,
            &self.config.generation_options(),
            &policy,
        )
        .await;

        let failure = match outcome {
            Err(e) => PipelineFailure::Request {
                attempts: policy.max_attempts.max(1),
                detail: e.to_string(),
            },
            Ok(response) => {
                let answered = matches!(response, ModelResponse::Text(_));
                let text = response.into_text();
                match parse_consolidated(&text) {
                    Ok(fields) => {
                        let mut result = AnalysisResult::new(metadata);
                        for stage in Stage::ALL {
                            result.set_field(stage, fields.get(stage).to_string());
                        }
                        cb.on_stage_complete(Stage::Caption, 1, 1, text.len());
                        cb.on_analysis_complete(1, 1);
                        return result;
                    }
                    // A refusal or empty reply is reported as itself, not as a JSON error.
                    Err(_) if !answered => PipelineFailure::Parse { detail: text },
                    Err(e) => PipelineFailure::Parse {
                        detail: e.to_string(),
                    },
                }
            }
        };

        warn!("Consolidated analysis failed: {}", failure);
        cb.on_stage_error(Stage::Caption, 1, 1, &failure.to_string());
        cb.on_analysis_complete(1, 0);
        AnalysisResult::placeholder_error(failure, metadata)
    }

    /// Five calls in order; later prompts quote earlier outputs.
    async fn run_staged(&self, image: &EncodedImage, metadata: ImageMetadata) -> AnalysisResult {
        let cb = self.progress();
        let policy = self.config.retry_policy();
        let options = self.config.generation_options();
        let total = Stage::ALL.len();

        let mut result = AnalysisResult::new(metadata);
        let mut completed = Vec::with_capacity(total);
        cb.on_analysis_start(total);

        for (i, stage) in Stage::ALL.into_iter().enumerate() {
            let prompt = stage_prompt(
                stage,
                &StageContext {
                    caption: &result.caption,
                    summary: &result.summary,
                    objects: &result.objects,
                    mood: &result.mood,
                },
            );
            cb.on_stage_start(stage, i + 1, total);

            match analyze_with_retry(self.model.as_ref(), image, &prompt, &options, &policy).await {
                Ok(response) => {
                    let text = clean_text(&response.into_text());
                    debug!("Stage {} complete: {} chars", stage, text.len());
                    cb.on_stage_complete(stage, i + 1, total, text.len());
                    result.set_field(stage, text);
                    completed.push(stage);
                }
                Err(e) => {
                    cb.on_stage_error(stage, i + 1, total, &e.to_string());
                    cb.on_analysis_complete(total, completed.len());
                    let failure = if completed.is_empty() {
                        PipelineFailure::Provider {
                            stage,
                            attempts: policy.max_attempts.max(1),
                            detail: e.to_string(),
                        }
                    } else {
                        PipelineFailure::Partial {
                            failed_stage: stage,
                            completed,
                            detail: e.to_string(),
                        }
                    };
                    warn!("Staged analysis stopped: {}", failure);
                    return result.partial(failure);
                }
            }
        }

        cb.on_analysis_complete(total, completed.len());
        result
    }
}

/// Pick the vision client, from most to least specific.
///
/// 1. `config.client`, used as-is
/// 2. `config.provider_name`, built through edgequake-llm
/// 3. the built-in OpenAI-compatible client, keyed by `config.api_key` or
///    `OPENAI_API_KEY`
pub fn resolve_client(config: &AnalysisConfig) -> Result<Arc<dyn VisionModel>, AnalysisError> {
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }

    if let Some(ref name) = config.provider_name {
        let client = EdgequakeVisionClient::from_name(name, &config.model, config.api_timeout_secs)?;
        return Ok(Arc::new(client));
    }

    let key = config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()));

    match key {
        Some(key) => {
            let client = OpenAiVisionClient::new(
                key,
                &config.base_url,
                config.model.as_str(),
                config.api_timeout_secs,
            )?;
            Ok(Arc::new(client))
        }
        None => Err(AnalysisError::ProviderNotConfigured {
            provider: "openai".to_string(),
            hint: "Set OPENAI_API_KEY, pass an API key, or choose another provider \
                   (e.g. provider_name = \"anthropic\")."
                .to_string(),
        }),
    }
}

/// Analyse an image with a client built from `config`.
///
/// # Example
/// ```rust,no_run
/// use image_insight::{process_image, AnalysisConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("photo.jpg")?;
/// let result = process_image(bytes, &AnalysisConfig::default()).await?;
/// println!("{}", result.caption);
/// # Ok(())
/// # }
/// ```
pub async fn process_image<'a>(
    input: impl Into<ImageInput<'a>>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalysisError> {
    ImageAnalyzer::new(config.clone())?.process_image(input).await
}

/// Analyse base64 image text with a client built from `config`.
pub async fn process_base64_image(
    data: &str,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalysisError> {
    ImageAnalyzer::new(config.clone())?
        .process_base64_image(data)
        .await
}

/// Synchronous wrapper around [`process_image`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_image_sync<'a>(
    input: impl Into<ImageInput<'a>>,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalysisError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalysisError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_image(input, config))
}

/// Synchronous wrapper around [`process_base64_image`].
pub fn process_base64_image_sync(
    data: &str,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalysisError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalysisError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_base64_image(data, config))
}
