//! # image-insight
//!
//! Turn one image into five pieces of text with a vision language model
//! (VLM): a one-sentence caption, a short summary, a bulleted object list,
//! a mood analysis and a short story.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes / stream / base64
//!  │
//!  ├─ 1. Input      resolve to one byte buffer, strip data-URI header
//!  ├─ 2. Normalise  validate, decode, flatten alpha, resize ≤ 2048 px (spawn_blocking)
//!  ├─ 3. Encode     JPEG q95 → base64
//!  ├─ 4. VLM        one consolidated call, or five staged calls, with retry
//!  └─ 5. Assemble   extract the JSON object / clean each field, attach metadata
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use image_insight::{process_image, AnalysisConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Uses OPENAI_API_KEY and gpt-4o by default
//!     let config = AnalysisConfig::default();
//!     let bytes = std::fs::read("photo.png")?;
//!     let result = process_image(bytes, &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     if let Some(err) = result.error {
//!         eprintln!("analysis incomplete: {err}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modes
//!
//! | Mode | Calls | On failure |
//! |------|-------|------------|
//! | [`PipelineMode::Consolidated`] (default) | 1 | placeholder text, `error` set |
//! | [`PipelineMode::Staged`] | 5 | completed fields kept, rest empty, `error` set |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `image-insight` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! image-insight = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{
    process_base64_image, process_base64_image_sync, process_image, process_image_sync,
    resolve_client, ImageAnalyzer,
};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, PipelineMode};
pub use error::{AnalysisError, ParseError, PipelineFailure, ProviderError, ValidationError};
pub use output::{AnalysisResult, ImageMetadata, Stage};
pub use pipeline::encode::EncodedImage;
pub use pipeline::input::ImageInput;
pub use pipeline::llm::{analyze_with_retry, GenerationOptions, ModelResponse, RetryPolicy, VisionModel};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use providers::{EdgequakeVisionClient, OpenAiVisionClient};
