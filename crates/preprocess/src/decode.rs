use anyhow::Context;
use image::{DynamicImage, GenericImageView, imageops::FilterType};
use ndarray::Array3;

/// Decode jpg/png bytes into a BGR image in HWC layout.
pub fn decode_bgr(bytes: &[u8]) -> anyhow::Result<Array3<u8>> {
    let rgb = image::load_from_memory(bytes)
        .context("failed to decode image bytes")?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("decoded image has zero dimensions ({width}x{height})");
    }

    let mut data = rgb.into_raw();
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }

    Ok(Array3::from_shape_vec(
        (height as usize, width as usize, 3),
        data,
    )?)
}

/// Downscale so the longest side is at most `max_side`.
///
/// Returns the image to run detection on and the (x, y) factors mapping its
/// coordinates back to the input image. Images already small enough are
/// returned unchanged with unit factors.
pub fn fit_within(image: &DynamicImage, max_side: u32) -> (DynamicImage, f32, f32) {
    let (width, height) = image.dimensions();
    if width <= max_side && height <= max_side {
        return (image.clone(), 1.0, 1.0);
    }

    let factor = max_side as f32 / width.max(height) as f32;
    let scaled_width = ((width as f32 * factor) as u32).max(1);
    let scaled_height = ((height as f32 * factor) as u32).max(1);

    tracing::debug!(
        width,
        height,
        scaled_width,
        scaled_height,
        "Downscaling image for detection"
    );

    let scaled = image.resize_exact(scaled_width, scaled_height, FilterType::Triangle);
    (
        scaled,
        width as f32 / scaled_width as f32,
        height as f32 / scaled_height as f32,
    )
}
