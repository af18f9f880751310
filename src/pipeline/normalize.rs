//! Image validation and normalisation: encoded bytes → bounded RGB bitmap.
//!
//! Every image reaching the model has the same shape: three 8-bit channels,
//! no alpha, longest edge at most `max_dimension`. Transparent pixels are
//! composited onto an opaque background (white by default) instead of being
//! dropped, so a transparent logo does not arrive as a black square.
//!
//! Decoding and Lanczos resampling are CPU-bound; async callers should run
//! [`normalize`] inside `spawn_blocking`.

use crate::error::ValidationError;
use crate::output::ImageMetadata;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, ImageFormat, Rgb, RgbImage};
use tracing::debug;

/// Limits applied while normalising.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub max_bytes: u64,
    /// Lower-case extensions whose formats are accepted.
    pub allowed_extensions: Vec<String>,
    pub max_dimension: u32,
    pub background: [u8; 3],
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            allowed_extensions: ["png", "jpg", "jpeg", "webp", "gif"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_dimension: 2048,
            background: [255, 255, 255],
        }
    }
}

/// The canonical in-memory image for one request.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: RgbImage,
    pub source_format: ImageFormat,
    pub source_color: ColorType,
    /// `(width, height)` before resizing.
    pub original_size: (u32, u32),
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn was_resized(&self) -> bool {
        self.original_size != self.image.dimensions()
    }

    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata::new(self.width(), self.height())
    }
}

/// Validate, decode, flatten and resize `bytes`.
///
/// Fails with a [`ValidationError`] when the data is empty, too large, not a
/// recognised raster format, a format outside the allow-list, or cannot be
/// decoded.
pub fn normalize(bytes: &[u8], opts: &NormalizeOptions) -> Result<NormalizedImage, ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::Empty);
    }
    if bytes.len() as u64 > opts.max_bytes {
        return Err(ValidationError::TooLarge {
            size: bytes.len() as u64,
            max: opts.max_bytes,
        });
    }

    let format = image::guess_format(bytes).map_err(|_| ValidationError::UnsupportedFormat)?;
    check_allowed(format, &opts.allowed_extensions)?;

    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        ValidationError::DecodeFailed {
            detail: e.to_string(),
        }
    })?;

    let source_color = decoded.color();
    let original_size = (decoded.width(), decoded.height());
    if original_size.0 == 0 || original_size.1 == 0 {
        return Err(ValidationError::DecodeFailed {
            detail: "image has zero width or height".into(),
        });
    }

    let rgb = flatten_alpha(&decoded, opts.background);
    let image = match fit_within(original_size.0, original_size.1, opts.max_dimension) {
        Some((w, h)) => imageops::resize(&rgb, w, h, FilterType::Lanczos3),
        None => rgb,
    };

    debug!(
        "Normalised {:?} {} {}x{} → RGB {}x{}",
        format,
        color_mode_name(source_color),
        original_size.0,
        original_size.1,
        image.width(),
        image.height()
    );

    Ok(NormalizedImage {
        image,
        source_format: format,
        source_color,
        original_size,
    })
}

fn check_allowed(format: ImageFormat, allowed: &[String]) -> Result<(), ValidationError> {
    let permitted = format
        .extensions_str()
        .iter()
        .any(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)));
    if permitted {
        Ok(())
    } else {
        Err(ValidationError::DisallowedFormat {
            format: format!("{format:?}").to_uppercase(),
            allowed: allowed.join(", "),
        })
    }
}

/// Target size so the longest edge equals `max_dim`, or `None` when the
/// image already fits.
///
/// Both edges are scaled by `max_dim / max(width, height)` and rounded to the
/// nearest integer, never below 1.
pub fn fit_within(width: u32, height: u32, max_dim: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max_dim {
        return None;
    }
    let ratio = f64::from(max_dim) / f64::from(longest);
    let scale = |d: u32| ((f64::from(d) * ratio).round() as u32).clamp(1, max_dim);
    Some((scale(width), scale(height)))
}

/// Convert to 8-bit RGB, compositing any alpha channel onto `background`.
pub fn flatten_alpha(img: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        let a = u32::from(a);
        let blend = |fg: u8, bg: u8| -> u8 {
            ((u32::from(fg) * a + u32::from(bg) * (255 - a) + 127) / 255) as u8
        };
        *dst = Rgb([
            blend(r, background[0]),
            blend(g, background[1]),
            blend(b, background[2]),
        ]);
    }
    out
}

/// PIL-style name of a colour type, for logs.
pub fn color_mode_name(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 => "L",
        ColorType::La8 => "LA",
        ColorType::Rgb8 => "RGB",
        ColorType::Rgba8 => "RGBA",
        ColorType::L16 => "I;16",
        ColorType::La16 => "LA;16",
        ColorType::Rgb16 => "RGB;16",
        ColorType::Rgba16 => "RGBA;16",
        ColorType::Rgb32F => "RGB;F",
        ColorType::Rgba32F => "RGBA;F",
        _ => "unknown",
    }
}
