//! Result types returned by the analysis pipeline.

use crate::error::PipelineFailure;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Colour mode reported for every normalised image.
pub const NORMALIZED_MODE: &str = "RGB";

/// One of the five derived text artefacts.
///
/// In staged mode each stage is a separate model call, issued in the order
/// of [`Stage::ALL`]; in consolidated mode the stages only name the fields
/// of the single JSON reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Caption,
    Summary,
    Objects,
    Mood,
    Story,
}

impl Stage {
    /// Execution order for staged mode.
    pub const ALL: [Stage; 5] = [
        Stage::Caption,
        Stage::Summary,
        Stage::Objects,
        Stage::Mood,
        Stage::Story,
    ];

    /// JSON field name carrying this stage's output.
    pub fn field_name(self) -> &'static str {
        match self {
            Stage::Caption => "caption",
            Stage::Summary => "summary",
            Stage::Objects => "objects",
            Stage::Mood => "mood",
            Stage::Story => "story",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Facts about the normalised image that was sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// `[width, height]` after resizing.
    pub image_size: [u32; 2],
    /// Always [`NORMALIZED_MODE`].
    pub image_mode: String,
}

impl ImageMetadata {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image_size: [width, height],
            image_mode: NORMALIZED_MODE.to_string(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image_size[0]
    }

    pub fn height(&self) -> u32 {
        self.image_size[1]
    }
}

/// The record produced for one request.
///
/// When `error` is `None` all five fields hold model output. When it is set,
/// the text fields hold either the fixed placeholders of a failed
/// consolidated call (see [`AnalysisResult::placeholder_error`]) or the
/// stages completed before a staged failure, with the rest left empty
/// (see [`AnalysisResult::partial`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub caption: String,
    pub summary: String,
    pub objects: String,
    pub mood: String,
    pub story: String,
    pub metadata: ImageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Typed form of `error`; not part of the wire shape.
    #[serde(skip)]
    pub failure: Option<PipelineFailure>,
}

impl AnalysisResult {
    /// An empty record for the given image; fields are filled as stages finish.
    pub fn new(metadata: ImageMetadata) -> Self {
        Self {
            caption: String::new(),
            summary: String::new(),
            objects: String::new(),
            mood: String::new(),
            story: String::new(),
            metadata,
            error: None,
            failure: None,
        }
    }

    /// Record returned when a consolidated call fails outright.
    pub fn placeholder_error(failure: PipelineFailure, metadata: ImageMetadata) -> Self {
        Self {
            caption: "Error analyzing image".to_string(),
            summary: "Could not generate summary due to an error.".to_string(),
            objects: "- Error".to_string(),
            mood: "Error".to_string(),
            story: "Error".to_string(),
            metadata,
            error: Some(failure.to_string()),
            failure: Some(failure),
        }
    }

    /// Record carrying the stages finished before `failure`.
    pub fn partial(mut self, failure: PipelineFailure) -> Self {
        self.error = Some(failure.to_string());
        self.failure = Some(failure);
        self
    }

    /// Read a field by stage.
    pub fn field(&self, stage: Stage) -> &str {
        match stage {
            Stage::Caption => &self.caption,
            Stage::Summary => &self.summary,
            Stage::Objects => &self.objects,
            Stage::Mood => &self.mood,
            Stage::Story => &self.story,
        }
    }

    pub fn set_field(&mut self, stage: Stage, text: String) {
        match stage {
            Stage::Caption => self.caption = text,
            Stage::Summary => self.summary = text,
            Stage::Objects => self.objects = text,
            Stage::Mood => self.mood = text,
            Stage::Story => self.story = text,
        }
    }

    /// True when no failure was recorded.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}
