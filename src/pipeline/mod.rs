//! Pipeline stages for image analysis.
//!
//! Each submodule implements exactly one transformation step and is tested
//! on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ encode ──▶ llm ──▶ parse
//! (bytes)   (RGB, ≤2048)  (JPEG b64) (VLM)   (fields)
//! ```
//!
//! 1. [`input`]: resolve bytes, stream or base64 into one buffer
//! 2. [`normalize`]: validate, decode, flatten alpha and resize; runs in
//!    `spawn_blocking` because decoding is CPU-bound
//! 3. [`encode`]: JPEG-encode and base64-wrap for the request body
//! 4. [`llm`]: one model call per prompt with retry/backoff; the only stage
//!    with network I/O
//! 5. [`parse`]: pull the JSON object out of a consolidated reply and clean
//!    up every field

pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod parse;
