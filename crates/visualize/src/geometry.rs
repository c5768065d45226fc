/// Angle in degrees of the line from the left eye to the right eye, in image
/// coordinates (y down, so positive angles turn clockwise).
pub fn roll_angle(left: (f32, f32), right: (f32, f32)) -> f32 {
    (right.1 - left.1).atan2(right.0 - left.0).to_degrees()
}

pub fn eye_midpoint(left: (f32, f32), right: (f32, f32)) -> (f32, f32) {
    ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0)
}

/// End point of a segment of `length` starting at `start` along `angle` degrees.
pub fn arrow_end(start: (f32, f32), angle: f32, length: f32) -> (f32, f32) {
    let rad = angle.to_radians();
    (start.0 + length * rad.cos(), start.1 + length * rad.sin())
}

/// Emoji size for a face box: the width for square boxes, moving toward the
/// diagonal as the box gets more elongated.
pub fn diameter_for_box(width: f32, height: f32) -> f32 {
    let longest = width.max(height);
    if longest <= 0.0 {
        return 0.0;
    }
    let diagonal = width.hypot(height);
    let diff_ratio = (width - height).abs() / longest;
    width * (1.0 - diff_ratio) + diagonal * diff_ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_angle() {
        assert_eq!(roll_angle((0.0, 0.0), (10.0, 0.0)), 0.0);
        assert!((roll_angle((0.0, 0.0), (10.0, 10.0)) - 45.0).abs() < 1e-4);
        assert!((roll_angle((0.0, 0.0), (10.0, -10.0)) + 45.0).abs() < 1e-4);
        assert!((roll_angle((10.0, 0.0), (0.0, 0.0)) - 180.0).abs() < 1e-4);
    }

    #[test]
    fn test_arrow_end_follows_angle() {
        let (x, y) = arrow_end((100.0, 100.0), 0.0, 50.0);
        assert_eq!((x, y), (150.0, 100.0));

        let (x, y) = arrow_end((0.0, 0.0), 90.0, 50.0);
        assert!(x.abs() < 1e-4);
        assert!((y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_eye_midpoint() {
        assert_eq!(eye_midpoint((10.0, 20.0), (30.0, 40.0)), (20.0, 30.0));
    }

    #[test]
    fn test_diameter_for_box() {
        assert_eq!(diameter_for_box(40.0, 40.0), 40.0);
        assert_eq!(diameter_for_box(0.0, 0.0), 0.0);

        // r = 0.5, diagonal = sqrt(40^2 + 20^2)
        let d = diameter_for_box(40.0, 20.0);
        let expected = 40.0 * 0.5 + 40.0f32.hypot(20.0) * 0.5;
        assert!((d - expected).abs() < 1e-4);
    }
}
