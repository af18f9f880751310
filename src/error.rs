//! Error types for the image-insight library.
//!
//! Two layers of failure exist, mirroring how a request can go wrong:
//!
//! * [`AnalysisError`] — **Fatal**: nothing was sent to the model because the
//!   input was rejected or no client could be built. Returned as
//!   `Err(AnalysisError)` from the `process_*` entry points.
//!
//! * [`PipelineFailure`] — **Non-fatal**: the image was accepted, but a model
//!   call or the parsing of its reply failed. Stored inside
//!   [`crate::output::AnalysisResult`] together with whatever was produced
//!   before the failure, so callers always get an interpretable record.
//!
//! [`ValidationError`], [`ProviderError`] and [`ParseError`] are the typed
//! causes feeding those two layers.

use crate::output::Stage;
use thiserror::Error;

/// All fatal errors returned by the image-insight library.
///
/// Provider and parse failures never appear here; they are folded into the
/// returned [`crate::output::AnalysisResult`] as a [`PipelineFailure`].
#[derive(Debug, Error)]
pub enum AnalysisError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input image was rejected before any model call.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // ── Client errors ─────────────────────────────────────────────────────
    /// No vision client could be built (missing API key, unknown provider).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why an input image was rejected.
///
/// Validation errors are never retried and always stop the request before
/// any network traffic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Empty file")]
    Empty,

    #[error("Image too large: {size} bytes (max: {max} bytes, {max_mb}MB)", max_mb = .max / (1024 * 1024))]
    TooLarge { size: u64, max: u64 },

    #[error("Invalid image format: data is not a recognised raster image")]
    UnsupportedFormat,

    /// The format was recognised but is not on the allow-list.
    #[error("Invalid image format: {format} is not allowed (allowed: {allowed})")]
    DisallowedFormat { format: String, allowed: String },

    #[error("Invalid image format: {detail}")]
    DecodeFailed { detail: String },

    #[error("Invalid base64 image data: {detail}")]
    InvalidBase64 { detail: String },

    #[error("Failed to read image stream: {detail}")]
    Io { detail: String },
}

/// A failure talking to the vision provider.
///
/// Every variant is retried by [`crate::pipeline::llm::analyze_with_retry`];
/// the last one seen is surfaced once the attempts run out.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connection refused, DNS failure, broken pipe, …
    #[error("Transport error: {detail}")]
    Transport { detail: String },

    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429.
    #[error("Rate limit exceeded{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401/403.
    #[error("Authentication error: {detail}")]
    Auth { detail: String },

    /// Any other non-success HTTP status.
    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider answered, but the body was not what the API promises.
    #[error("Malformed provider response: {detail}")]
    InvalidResponse { detail: String },

    /// Error reported by an edgequake-llm provider.
    #[error("Provider API error: {message}")]
    Api { message: String },
}

/// The consolidated reply could not be read as the expected JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("No JSON object found in model output")]
    NoJsonObject,

    #[error("Model output is not valid JSON: {detail}")]
    InvalidJson { detail: String },

    #[error("Model output is missing the '{field}' field")]
    MissingField { field: &'static str },
}

/// A non-fatal failure recorded on the result.
///
/// Its `Display` text is what ends up in the serialised `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PipelineFailure {
    /// The single consolidated call failed after all attempts.
    #[error("Model call failed after {attempts} attempts: {detail}")]
    Request { attempts: u32, detail: String },

    /// A staged call failed after all attempts, before any stage completed.
    #[error("{stage} stage failed after {attempts} attempts: {detail}")]
    Provider {
        stage: Stage,
        attempts: u32,
        detail: String,
    },

    /// Consolidated output could not be parsed.
    #[error("Could not parse model output: {detail}")]
    Parse { detail: String },

    /// Staged mode: a later stage failed after earlier ones succeeded.
    #[error("{failed_stage} stage failed after {} of 5 stages completed: {detail}", .completed.len())]
    Partial {
        failed_stage: Stage,
        completed: Vec<Stage>,
        detail: String,
    },
}
