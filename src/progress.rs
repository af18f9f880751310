//! Progress-callback trait for per-stage analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the pipeline runs. Consolidated mode reports a single stage
//! (named after the caption field); staged mode reports all five.
//!
//! # Example
//!
//! ```rust
//! use image_insight::{AnalysisConfig, AnalysisProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: Stage, _index: usize, _total: usize, text_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done ({text_len} bytes)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(counter as Arc<dyn AnalysisProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Stage;
use std::sync::Arc;

/// Called by the pipeline as it runs each model call.
///
/// All methods default to no-ops so callers only override what they need.
/// Implementations must be `Send + Sync`: the same config (and callback)
/// may serve several requests at once.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once after the image is accepted, before any model call.
    fn on_analysis_start(&self, total_stages: usize) {
        let _ = total_stages;
    }

    /// Called just before the model request for a stage.
    ///
    /// `index` is 1-based.
    fn on_stage_start(&self, stage: Stage, index: usize, total: usize) {
        let _ = (stage, index, total);
    }

    /// Called when a stage returned text.
    fn on_stage_complete(&self, stage: Stage, index: usize, total: usize, text_len: usize) {
        let _ = (stage, index, total, text_len);
    }

    /// Called when a stage failed after all attempts.
    fn on_stage_error(&self, stage: Stage, index: usize, total: usize, error: &str) {
        let _ = (stage, index, total, error);
    }

    /// Called once after the last stage ran or the pipeline stopped.
    fn on_analysis_complete(&self, total_stages: usize, completed: usize) {
        let _ = (total_stages, completed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
