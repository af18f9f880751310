//! Input resolution: turn whatever the caller holds into one byte buffer.
//!
//! Callers arrive with raw bytes (multipart body), an open seekable stream
//! (file handle) or a base64 string (JSON body, possibly a `data:` URI).
//! [`ImageInput`] names those three shapes explicitly and
//! [`ImageInput::resolve`] collapses them into a `Vec<u8>` once, at the API
//! boundary, enforcing the byte-size limit on the way. Nothing past this
//! module cares where the bytes came from.

use crate::error::ValidationError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

/// A readable, seekable byte source.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// An image as handed to the pipeline, not yet validated.
pub enum ImageInput<'a> {
    /// Raw encoded image bytes.
    Bytes(Cow<'a, [u8]>),
    /// A stream owned by the caller. It is rewound to the start both before
    /// and after reading, so the caller can re-read it afterwards.
    Stream(&'a mut dyn ReadSeek),
    /// Base64 text, with or without a `data:image/...;base64,` header.
    Base64(Cow<'a, str>),
}

impl<'a> ImageInput<'a> {
    pub fn stream(reader: &'a mut dyn ReadSeek) -> Self {
        ImageInput::Stream(reader)
    }

    pub fn base64(s: impl Into<Cow<'a, str>>) -> Self {
        ImageInput::Base64(s.into())
    }

    /// Resolve into the canonical byte buffer, rejecting empty or oversized
    /// input.
    pub fn resolve(self, max_bytes: u64) -> Result<Vec<u8>, ValidationError> {
        let bytes = match self {
            ImageInput::Bytes(b) => {
                check_size(b.len() as u64, max_bytes)?;
                b.into_owned()
            }
            ImageInput::Stream(reader) => read_stream(reader, max_bytes)?,
            ImageInput::Base64(s) => decode_base64(&s, max_bytes)?,
        };
        debug!("Resolved input → {} bytes", bytes.len());
        Ok(bytes)
    }
}

impl From<Vec<u8>> for ImageInput<'static> {
    fn from(v: Vec<u8>) -> Self {
        ImageInput::Bytes(Cow::Owned(v))
    }
}

impl<'a> From<&'a [u8]> for ImageInput<'a> {
    fn from(b: &'a [u8]) -> Self {
        ImageInput::Bytes(Cow::Borrowed(b))
    }
}

impl<'a> From<&'a Vec<u8>> for ImageInput<'a> {
    fn from(b: &'a Vec<u8>) -> Self {
        ImageInput::Bytes(Cow::Borrowed(b.as_slice()))
    }
}

fn check_size(size: u64, max_bytes: u64) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError::Empty);
    }
    if size > max_bytes {
        return Err(ValidationError::TooLarge {
            size,
            max: max_bytes,
        });
    }
    Ok(())
}

/// Measure, bound-check, then read the stream, leaving it at offset 0.
fn read_stream(reader: &mut dyn ReadSeek, max_bytes: u64) -> Result<Vec<u8>, ValidationError> {
    let io_err = |e: std::io::Error| ValidationError::Io {
        detail: e.to_string(),
    };

    let size = reader.seek(SeekFrom::End(0)).map_err(io_err)?;
    reader.seek(SeekFrom::Start(0)).map_err(io_err)?;
    check_size(size, max_bytes)?;

    let mut buf = Vec::with_capacity(size as usize);
    let read = reader.read_to_end(&mut buf);
    reader.seek(SeekFrom::Start(0)).map_err(io_err)?;
    read.map_err(io_err)?;

    Ok(buf)
}

/// Remove a `data:<mime>;base64,` header if present.
pub fn strip_data_uri(s: &str) -> &str {
    let s = s.trim();
    if s.starts_with("data:") {
        if let Some((_, payload)) = s.split_once(',') {
            return payload;
        }
    }
    s
}

/// Decode base64 image text (data-URI header optional) into bytes.
pub fn decode_base64(s: &str, max_bytes: u64) -> Result<Vec<u8>, ValidationError> {
    let payload = strip_data_uri(s);
    if payload.is_empty() {
        return Err(ValidationError::Empty);
    }

    // Line-wrapped base64 (MIME style) is common in pasted payloads.
    let compact: Cow<'_, str> = if payload.contains(char::is_whitespace) {
        Cow::Owned(payload.split_whitespace().collect())
    } else {
        Cow::Borrowed(payload)
    };

    // Reject obviously oversized payloads before allocating the decode buffer.
    let estimated = (compact.len() as u64 / 4) * 3;
    if estimated > max_bytes.saturating_add(3) {
        return Err(ValidationError::TooLarge {
            size: estimated,
            max: max_bytes,
        });
    }

    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ValidationError::InvalidBase64 {
            detail: e.to_string(),
        })?;
    check_size(bytes.len() as u64, max_bytes)?;
    Ok(bytes)
}
