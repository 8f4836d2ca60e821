//! Deterministic imaging pipeline.
//!
//! Turns raw fetched bytes into an encoded [`Artifact`] through a fixed
//! sequence of steps:
//!
//! 1. Decode; flatten alpha/palette images onto a white background (RGB8)
//! 2. Optional crop to a configured box
//! 3. Upscale small inputs to the working size so enhancement has
//!    resolution to work with
//! 4. Optional autocontrast, then sharpness/contrast/brightness/color
//!    factor adjustments
//! 5. Downscale to fit within the target bounds (aspect ratio preserved,
//!    never upscales)
//! 6. Optional unsharp mask — skipped with a warning when the image is too
//!    small for the radius, rather than failing the whole source
//! 7. Encode to the configured output format and quality
//!
//! Identical input bytes and identical parameters always produce identical
//! output bytes.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, WebP) | `image::load_from_memory` |
//! | Resize | `image::imageops::resize` with `Lanczos3` |
//! | Enhancement operators | [`enhance`] (pure pixel math) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (quality-bearing) |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//! | Encode → PNG | `image::ImageFormat::Png` via `write_to` |

pub mod calculations;
pub mod enhance;

use calculations::{clamp_crop, fit_within, upscale_to_working_size};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("Failed to encode image: {0}")]
    Encode(image::ImageError),
}

/// Output encoding for transformed artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless WebP (the `image` crate ships no lossy WebP encoder).
    Webp,
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// Unsharp mask parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnsharpParams {
    /// Gaussian blur radius (sigma) in pixels.
    pub radius: f32,
    /// Amplification of the edge difference, in percent.
    pub percent: u32,
    /// Minimum channel difference before a pixel is touched.
    pub threshold: i32,
}

impl Default for UnsharpParams {
    fn default() -> Self {
        Self {
            radius: 2.0,
            percent: 150,
            threshold: 3,
        }
    }
}

/// Concrete transform parameters for one source, after override merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformParams {
    /// Final fit-within bounds as `[width, height]`.
    pub target: [u32; 2],
    /// Longer-edge size small inputs are upscaled to before enhancement.
    pub working_max_dimension: u32,
    pub format: OutputFormat,
    pub quality: u8,
    pub autocontrast: bool,
    pub sharpness: f32,
    pub contrast: f32,
    pub brightness: f32,
    pub color: f32,
    /// Crop box as `[left, top, right, bottom]`.
    pub crop: Option<[u32; 4]>,
    pub unsharp: Option<UnsharpParams>,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            target: [1920, 1920],
            working_max_dimension: 4000,
            format: OutputFormat::Webp,
            quality: 60,
            autocontrast: false,
            sharpness: 1.0,
            contrast: 1.0,
            brightness: 1.0,
            color: 1.0,
            crop: None,
            unsharp: None,
        }
    }
}

/// A transformed, encoded image ready for archiving and upload.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub quality: u8,
}

/// Run the full pipeline over raw image bytes.
pub fn transform(bytes: &[u8], params: &TransformParams) -> Result<Artifact, TransformError> {
    let decoded = image::load_from_memory(bytes).map_err(TransformError::Decode)?;
    let mut img = flatten_to_rgb(decoded);

    if let Some(crop_box) = params.crop {
        if let Some((x, y, w, h)) = clamp_crop(img.dimensions(), crop_box) {
            img = imageops::crop_imm(&img, x, y, w, h).to_image();
        } else {
            warn!(?crop_box, "crop box is degenerate for this image, skipping crop");
        }
    }

    if let Some((w, h)) = upscale_to_working_size(img.dimensions(), params.working_max_dimension) {
        img = imageops::resize(&img, w, h, FilterType::Lanczos3);
    }

    if params.autocontrast {
        img = enhance::autocontrast(&img);
    }
    if params.sharpness != 1.0 {
        img = enhance::adjust_sharpness(&img, params.sharpness);
    }
    if params.contrast != 1.0 {
        img = enhance::adjust_contrast(&img, params.contrast);
    }
    if params.brightness != 1.0 {
        img = enhance::adjust_brightness(&img, params.brightness);
    }
    if params.color != 1.0 {
        img = enhance::adjust_color(&img, params.color);
    }

    if let Some((w, h)) = fit_within(img.dimensions(), (params.target[0], params.target[1])) {
        img = imageops::resize(&img, w, h, FilterType::Lanczos3);
    }

    if let Some(unsharp) = &params.unsharp {
        // Graceful degradation: a bad radius or a tiny image skips the mask
        // instead of failing the source.
        let (w, h) = img.dimensions();
        if unsharp.radius > 0.0 && unsharp.percent > 0 && w >= 3 && h >= 3 {
            img = enhance::unsharp_mask(&img, unsharp.radius, unsharp.percent, unsharp.threshold);
        } else {
            warn!(
                radius = unsharp.radius,
                percent = unsharp.percent,
                width = w,
                height = h,
                "unsharp mask not applicable, skipping"
            );
        }
    }

    let (width, height) = img.dimensions();
    let bytes = encode(&img, params.format, params.quality)?;
    Ok(Artifact {
        bytes,
        width,
        height,
        format: params.format,
        quality: params.quality,
    })
}

/// Convert any decoded image to RGB8, compositing alpha onto white the way
/// print-oriented pipelines expect.
fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::from_pixel(rgba.width(), rgba.height(), image::Rgb([255, 255, 255]));
    for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
        let alpha = src[3] as f32 / 255.0;
        for c in 0..3 {
            let blended = src[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha);
            dst[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn encode(img: &RgbImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            encoder.encode_image(img).map_err(TransformError::Encode)?;
        }
        OutputFormat::Webp => {
            DynamicImage::ImageRgb8(img.clone())
                .write_to(&mut buffer, ImageFormat::WebP)
                .map_err(TransformError::Encode)?;
        }
        OutputFormat::Png => {
            DynamicImage::ImageRgb8(img.clone())
                .write_to(&mut buffer, ImageFormat::Png)
                .map_err(TransformError::Encode)?;
        }
    }
    Ok(buffer.into_inner())
}
