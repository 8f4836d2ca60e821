//! Pixel-level enhancement operators.
//!
//! Each adjustment takes a multiplicative factor where `1.0` is a no-op:
//! the output is a blend between the image and a "degenerate" version of
//! itself (black for brightness, mean gray for contrast, grayscale for
//! color, blurred for sharpness). Factors above 1.0 push away from the
//! degenerate image, factors below 1.0 toward it.
//!
//! All operators are pure functions over [`RgbImage`] buffers and produce
//! identical output for identical input — the transform pipeline's
//! determinism rests on that.

use image::{imageops, Rgb, RgbImage};

#[inline]
fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Rec. 601 luminance of one pixel, matching the usual L-mode conversion.
#[inline]
fn luminance(px: &Rgb<u8>) -> f32 {
    (299.0 * px[0] as f32 + 587.0 * px[1] as f32 + 114.0 * px[2] as f32) / 1000.0
}

/// Blend each channel between a degenerate value and the original:
/// `out = degenerate + (original - degenerate) * factor`.
#[inline]
fn interpolate(original: u8, degenerate: f32, factor: f32) -> u8 {
    clamp_u8(degenerate + (original as f32 - degenerate) * factor)
}

/// Per-channel histogram stretch: remap each channel so its darkest value
/// becomes 0 and its brightest 255. Flat channels are left untouched.
pub fn autocontrast(img: &RgbImage) -> RgbImage {
    let mut min = [u8::MAX; 3];
    let mut max = [u8::MIN; 3];
    for px in img.pixels() {
        for c in 0..3 {
            min[c] = min[c].min(px[c]);
            max[c] = max[c].max(px[c]);
        }
    }

    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in 0..3 {
            if max[c] > min[c] {
                let scaled = (px[c] - min[c]) as f32 * 255.0 / (max[c] - min[c]) as f32;
                px[c] = clamp_u8(scaled);
            }
        }
    }
    out
}

/// Brightness adjustment. Degenerate image: black.
pub fn adjust_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in 0..3 {
            px[c] = interpolate(px[c], 0.0, factor);
        }
    }
    out
}

/// Contrast adjustment. Degenerate image: solid gray at the mean luminance.
pub fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let pixel_count = (img.width() as u64 * img.height() as u64).max(1);
    let total: f64 = img.pixels().map(|px| luminance(px) as f64).sum();
    let mean = (total / pixel_count as f64) as f32;

    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in 0..3 {
            px[c] = interpolate(px[c], mean, factor);
        }
    }
    out
}

/// Color (saturation) adjustment. Degenerate image: per-pixel grayscale.
pub fn adjust_color(img: &RgbImage, factor: f32) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let gray = luminance(px);
        for c in 0..3 {
            px[c] = interpolate(px[c], gray, factor);
        }
    }
    out
}

/// Sharpness adjustment. Degenerate image: a light gaussian blur.
pub fn adjust_sharpness(img: &RgbImage, factor: f32) -> RgbImage {
    let blurred = imageops::blur(img, 1.0);
    let mut out = img.clone();
    for (px, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            px[c] = interpolate(px[c], soft[c] as f32, factor);
        }
    }
    out
}

/// Unsharp mask: amplify the difference between the image and a gaussian
/// blur wherever it exceeds `threshold`.
///
/// `percent` scales the amplification (150 = add 1.5× the difference);
/// pixels whose difference stays within `threshold` are left untouched,
/// which keeps smooth gradients free of halos.
pub fn unsharp_mask(img: &RgbImage, radius: f32, percent: u32, threshold: i32) -> RgbImage {
    let blurred = imageops::blur(img, radius);
    let amount = percent as f32 / 100.0;

    let mut out = img.clone();
    for (px, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let diff = px[c] as i32 - soft[c] as i32;
            if diff.abs() > threshold {
                px[c] = clamp_u8(px[c] as f32 + diff as f32 * amount);
            }
        }
    }
    out
}
