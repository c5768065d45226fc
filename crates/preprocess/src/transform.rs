/// Mapping from letterboxed model space back to original image space.
///
/// `offset = (letterboxed - resized) / 2` and `ratio = original / resized`,
/// per axis. A point maps as `(v - offset) * ratio`, a length as `v * ratio`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub ratio_x: f32,
    pub ratio_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl LetterboxTransform {
    /// Build from (height, width) pairs of the three reference images.
    pub fn from_shapes(
        original: (usize, usize),
        resized: (usize, usize),
        letterboxed: (usize, usize),
    ) -> Self {
        Self {
            ratio_x: original.1 as f32 / resized.1 as f32,
            ratio_y: original.0 as f32 / resized.0 as f32,
            offset_x: (letterboxed.1 as f32 - resized.1 as f32) / 2.0,
            offset_y: (letterboxed.0 as f32 - resized.0 as f32) / 2.0,
        }
    }

    #[inline]
    pub fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x) * self.ratio_x,
            (y - self.offset_y) * self.ratio_y,
        )
    }

    #[inline]
    pub fn size(&self, w: f32, h: f32) -> (f32, f32) {
        (w * self.ratio_x, h * self.ratio_y)
    }
}
