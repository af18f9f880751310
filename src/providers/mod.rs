//! Concrete [`crate::pipeline::llm::VisionModel`] implementations.

pub mod edgequake;
pub mod openai;

pub use edgequake::EdgequakeVisionClient;
pub use openai::OpenAiVisionClient;
