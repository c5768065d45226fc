//! Detection overlay: boxes, confidence, keypoints and the face roll arrow.

use crate::geometry::{arrow_end, eye_midpoint, roll_angle};
use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut},
    rect::Rect,
};
use inference::DetectionRecord;
use std::path::Path;

pub const DEFAULT_OUTPUT: &str = "visualized_output.jpg";

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const EYE_LINE_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const ARROW_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const KEYPOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const LINE_THICKNESS: u32 = 2;
const ARROW_LENGTH: f32 = 50.0;
const ARROW_TIP_RATIO: f32 = 0.2;
const KEYPOINT_RADIUS: i32 = 2;
const CONFIDENCE_SCALE: f32 = 16.0;
const ROLL_SCALE: f32 = 20.0;

pub fn load_font(path: &Path) -> anyhow::Result<FontArc> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
    FontArc::try_from_vec(bytes).map_err(|e| anyhow::anyhow!("invalid font {}: {e}", path.display()))
}

/// Line of the given thickness, drawn as parallel one-pixel segments.
fn draw_thick_line(
    image: &mut RgbImage,
    start: (f32, f32),
    end: (f32, f32),
    thickness: u32,
    color: Rgb<u8>,
) {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let len = dx.hypot(dy);
    let (nx, ny) = if len > 0.0 { (-dy / len, dx / len) } else { (0.0, 0.0) };

    for i in 0..thickness {
        let offset = i as f32 - (thickness - 1) as f32 / 2.0;
        draw_line_segment_mut(
            image,
            (start.0 + nx * offset, start.1 + ny * offset),
            (end.0 + nx * offset, end.1 + ny * offset),
            color,
        );
    }
}

fn draw_arrow(image: &mut RgbImage, start: (f32, f32), end: (f32, f32), color: Rgb<u8>) {
    draw_thick_line(image, start, end, LINE_THICKNESS, color);

    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let tip = dx.hypot(dy) * ARROW_TIP_RATIO;
    let back = dy.atan2(dx) + std::f32::consts::PI;
    for side in [-std::f32::consts::FRAC_PI_4, std::f32::consts::FRAC_PI_4] {
        let a = back + side;
        let barb = (end.0 + tip * a.cos(), end.1 + tip * a.sin());
        draw_thick_line(image, end, barb, LINE_THICKNESS, color);
    }
}

/// Hollow rectangle with corners inclusive, `thickness` pixels inward.
fn draw_box(image: &mut RgbImage, (x1, y1, x2, y2): (i32, i32, i32, i32), color: Rgb<u8>) {
    for inset in 0..LINE_THICKNESS as i32 {
        let (w, h) = (x2 - x1 - 2 * inset + 1, y2 - y1 - 2 * inset + 1);
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Draw every detection onto `image`.
///
/// Labels need a font; without one only the geometry is drawn.
pub fn annotate_detections(image: &mut RgbImage, records: &[DetectionRecord], font: Option<&FontArc>) {
    let _s = common::span_debug!("annotate_detections");

    for record in records {
        let (x1, y1, x2, y2) = record.corners();
        let corners = (x1 as i32, y1 as i32, x2 as i32, y2 as i32);
        draw_box(image, corners, BOX_COLOR);

        if let Some(font) = font {
            let label = format!("{:.2}", record.confidence);
            let y = corners.1 - 10 - CONFIDENCE_SCALE as i32;
            draw_text_mut(image, LABEL_COLOR, corners.0, y, PxScale::from(CONFIDENCE_SCALE), font, &label);
        }

        if let Some((left, right)) = record.eyes() {
            let (left, right) = ((left.x, left.y), (right.x, right.y));
            let angle = roll_angle(left, right);
            let (mx, my) = eye_midpoint(left, right);
            let mid = (mx.trunc(), my.trunc());
            let (ex, ey) = arrow_end(mid, angle, ARROW_LENGTH);

            draw_thick_line(image, left, right, LINE_THICKNESS, EYE_LINE_COLOR);
            draw_arrow(image, mid, (ex.trunc(), ey.trunc()), ARROW_COLOR);

            if let Some(font) = font {
                let label = format!("Roll: {angle:.2} deg");
                let (x, y) = (mid.0 as i32 - 50, mid.1 as i32 - 10 - ROLL_SCALE as i32);
                draw_text_mut(image, LABEL_COLOR, x, y, PxScale::from(ROLL_SCALE), font, &label);
            }
        }

        for kp in &record.keypoints {
            draw_filled_circle_mut(image, (kp.x as i32, kp.y as i32), KEYPOINT_RADIUS, KEYPOINT_COLOR);
        }
    }

    tracing::debug!(detections = records.len(), "Detections drawn");
}
