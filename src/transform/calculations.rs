//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate dimensions that fit within target bounds while preserving the
/// source aspect ratio.
///
/// Returns `None` when the source already fits — the fit step never
/// upscales. Both output dimensions are at least 1.
///
/// # Examples
/// ```
/// # use pixsync::transform::calculations::fit_within;
/// // 4000x3000 into 1920x1920 → 1920x1440
/// assert_eq!(fit_within((4000, 3000), (1920, 1920)), Some((1920, 1440)));
/// // already inside the bounds
/// assert_eq!(fit_within((800, 600), (1920, 1920)), None);
/// ```
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> Option<(u32, u32)> {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;

    let scale = (max_w as f64 / src_w as f64).min(max_h as f64 / src_h as f64);
    if scale >= 1.0 {
        return None;
    }

    let w = ((src_w as f64 * scale).round() as u32).max(1);
    let h = ((src_h as f64 * scale).round() as u32).max(1);
    Some((w, h))
}

/// Calculate the working size for enhancement: scale the longer edge up to
/// `max_dimension` when the image is smaller than that.
///
/// Enhancement operators behave poorly on low-resolution input, so small
/// sources are upscaled first and downscaled to the final target afterwards.
/// Returns `None` when the image is already large enough.
pub fn upscale_to_working_size(source: (u32, u32), max_dimension: u32) -> Option<(u32, u32)> {
    let (src_w, src_h) = source;
    let longer = src_w.max(src_h);
    if longer == 0 || longer >= max_dimension {
        return None;
    }

    let scale = max_dimension as f64 / longer as f64;
    let w = ((src_w as f64 * scale).round() as u32).max(1);
    let h = ((src_h as f64 * scale).round() as u32).max(1);
    Some((w, h))
}

/// Clamp a `[left, top, right, bottom]` crop box to the image bounds and
/// convert it to `(x, y, width, height)`.
///
/// Returns `None` for degenerate boxes (zero area after clamping), in which
/// case the crop step is skipped.
pub fn clamp_crop(source: (u32, u32), crop: [u32; 4]) -> Option<(u32, u32, u32, u32)> {
    let (src_w, src_h) = source;
    let [left, top, right, bottom] = crop;

    let left = left.min(src_w);
    let top = top.min(src_h);
    let right = right.min(src_w);
    let bottom = bottom.min(src_h);

    if right <= left || bottom <= top {
        return None;
    }
    Some((left, top, right - left, bottom - top))
}
