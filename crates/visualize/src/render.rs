use crate::emoji::EmojiPlacement;
use ab_glyph::{Font, PxScale};
use image::{Rgba, RgbaImage, imageops};
use imageproc::{
    drawing::{draw_text_mut, text_size},
    geometric_transformations::{Interpolation, rotate_about_center},
};

const EMOJI_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Side of the square scratch canvas an emoji is rendered on: large enough
/// that rotating the text by any angle never clips it.
fn canvas_side(text_w: u32, text_h: u32) -> u32 {
    ((text_w as f32).hypot(text_h as f32).ceil() as u32 + 2).max(1)
}

/// Draw one emoji centered on its placement, rotated clockwise by its angle,
/// with a text size equal to its diameter.
pub fn draw_emoji(image: &mut RgbaImage, placement: &EmojiPlacement, font: &impl Font) {
    if placement.diameter <= 0.0 || placement.emoji.is_empty() {
        return;
    }
    let scale = PxScale::from(placement.diameter);
    let (text_w, text_h) = text_size(scale, font, &placement.emoji);
    let side = canvas_side(text_w, text_h);

    let mut canvas = RgbaImage::from_pixel(side, side, Rgba([0, 0, 0, 0]));
    let x = (side as i32 - text_w as i32) / 2;
    let y = (side as i32 - text_h as i32) / 2;
    draw_text_mut(&mut canvas, EMOJI_COLOR, x, y, scale, font, &placement.emoji);

    let rotated = if placement.angle != 0.0 {
        rotate_about_center(
            &canvas,
            placement.angle.to_radians(),
            Interpolation::Bilinear,
            Rgba([0, 0, 0, 0]),
        )
    } else {
        canvas
    };

    let left = (placement.x_center - side as f32 / 2.0).round() as i64;
    let top = (placement.y_center - side as f32 / 2.0).round() as i64;
    imageops::overlay(image, &rotated, left, top);
}

/// Copy of `base` with every placement drawn on it.
pub fn draw_placements(
    base: &RgbaImage,
    placements: &[EmojiPlacement],
    font: &impl Font,
) -> RgbaImage {
    let _s = common::span_debug!("draw_placements");

    let mut image = base.clone();
    for placement in placements {
        draw_emoji(&mut image, placement, font);
    }
    tracing::debug!(count = placements.len(), "Emojis drawn");
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::load_font;
    use ab_glyph::FontArc;
    use std::path::Path;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn fixture_font() -> FontArc {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/DejaVuSans.ttf");
        load_font(&path).unwrap()
    }

    fn placement(emoji: &str, diameter: f32, angle: f32) -> EmojiPlacement {
        EmojiPlacement {
            x_center: 100.0,
            y_center: 100.0,
            diameter,
            angle,
            emoji: emoji.to_string(),
        }
    }

    fn is_dark(px: &Rgba<u8>) -> bool {
        px[0] < 96 && px[1] < 96 && px[2] < 96
    }

    fn dark_pixels(image: &RgbaImage) -> Vec<(u32, u32)> {
        image
            .enumerate_pixels()
            .filter(|(_, _, px)| is_dark(px))
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    /// (min_x, min_y, max_x, max_y) of the dark pixels
    fn dark_bounds(image: &RgbaImage) -> (u32, u32, u32, u32) {
        let dark = dark_pixels(image);
        assert!(!dark.is_empty(), "nothing was drawn");
        dark.iter().fold((u32::MAX, u32::MAX, 0, 0), |(x0, y0, x1, y1), &(x, y)| {
            (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
        })
    }

    #[test]
    fn test_canvas_side_fits_rotated_text() {
        assert_eq!(canvas_side(30, 40), 52);
        assert_eq!(canvas_side(0, 0), 2);
    }

    /// Test an emoji is drawn in black around its center and within its diameter
    #[test]
    fn test_draw_emoji_black_and_centered() {
        let font = fixture_font();
        let mut image = RgbaImage::from_pixel(200, 200, WHITE);
        draw_emoji(&mut image, &placement("O", 60.0, 0.0), &font);

        assert!(image.pixels().any(|px| px[0] == 0 && px[1] == 0 && px[2] == 0));
        let (x0, y0, x1, y1) = dark_bounds(&image);
        let (cx, cy) = ((x0 + x1) as f32 / 2.0, (y0 + y1) as f32 / 2.0);
        assert!((cx - 100.0).abs() <= 15.0, "ink centered at x {cx}");
        assert!((cy - 100.0).abs() <= 15.0, "ink centered at y {cy}");
        for (x, y) in dark_pixels(&image) {
            let distance = (x as f32 - 100.0).hypot(y as f32 - 100.0);
            assert!(distance <= 60.0, "pixel ({x}, {y}) outside the diameter");
        }
    }

    /// Test the text size follows the diameter
    #[test]
    fn test_draw_emoji_scales_with_diameter() {
        let font = fixture_font();
        let mut small = RgbaImage::from_pixel(200, 200, WHITE);
        let mut large = RgbaImage::from_pixel(200, 200, WHITE);
        draw_emoji(&mut small, &placement("O", 30.0, 0.0), &font);
        draw_emoji(&mut large, &placement("O", 90.0, 0.0), &font);

        let height = |(_, y0, _, y1): (u32, u32, u32, u32)| y1 - y0;
        let (h_small, h_large) = (height(dark_bounds(&small)), height(dark_bounds(&large)));
        assert!(h_large > 2 * h_small, "{h_small} vs {h_large}");
    }

    /// Test a positive angle turns a wide glyph clockwise
    #[test]
    fn test_draw_emoji_rotates_clockwise() {
        let font = fixture_font();
        let mut level = RgbaImage::from_pixel(200, 200, WHITE);
        draw_emoji(&mut level, &placement("——", 60.0, 0.0), &font);
        let (x0, y0, x1, y1) = dark_bounds(&level);
        assert!(x1 - x0 > 3 * (y1 - y0));

        let mut turned = RgbaImage::from_pixel(200, 200, WHITE);
        draw_emoji(&mut turned, &placement("——", 60.0, 45.0), &font);
        let (x0, y0, x1, y1) = dark_bounds(&turned);
        assert!(y1 - y0 > 20, "rotated bar should span rows");

        // clockwise in image coordinates: the bar runs from top-left to
        // bottom-right of its own center
        let (cx, cy) = ((x0 + x1) as f32 / 2.0, (y0 + y1) as f32 / 2.0);
        let (mut falling, mut rising) = (0, 0);
        for (x, y) in dark_pixels(&turned) {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            if dx * dy > 0.0 {
                falling += 1;
            } else if dx * dy < 0.0 {
                rising += 1;
            }
        }
        assert!(falling > 3 * rising, "{falling} vs {rising}");
    }

    #[test]
    fn test_draw_emoji_skips_empty_and_zero_size() {
        let font = fixture_font();
        let mut image = RgbaImage::from_pixel(50, 50, WHITE);
        draw_emoji(&mut image, &placement("O", 0.0, 0.0), &font);
        draw_emoji(&mut image, &placement("", 30.0, 0.0), &font);
        assert!(image.pixels().all(|px| *px == WHITE));
    }

    #[test]
    fn test_draw_placements_leaves_base_untouched() {
        let font = fixture_font();
        let base = RgbaImage::from_pixel(200, 200, WHITE);
        let mut left = placement("O", 40.0, 0.0);
        left.x_center = 50.0;
        let mut right = placement("O", 40.0, 0.0);
        right.x_center = 150.0;

        let drawn = draw_placements(&base, &[left, right], &font);
        assert!(base.pixels().all(|px| *px == WHITE));
        let dark = dark_pixels(&drawn);
        assert!(dark.iter().any(|&(x, _)| x < 100));
        assert!(dark.iter().any(|&(x, _)| x > 100));
    }
}
