use ndarray::{ArrayD, Axis};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// One row of the pipeline output, in original-image pixels.
///
/// Row layout: `[cx, cy, w, h, confidence, class_id, kp0.x, kp0.y, kp0.conf, ...]`.
/// For the face model keypoint 0 is the left eye and keypoint 1 the right
/// eye, as seen in the image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub class_id: u32,
    pub keypoints: Vec<Keypoint>,
}

impl DetectionRecord {
    pub fn from_row(row: &[f32], num_key_points: usize) -> anyhow::Result<Self> {
        let expected = 6 + 3 * num_key_points;
        if row.len() != expected {
            anyhow::bail!(
                "detection row has {} values, expected {expected} for {num_key_points} key points",
                row.len()
            );
        }

        let keypoints = row[6..]
            .chunks_exact(3)
            .map(|kp| Keypoint {
                x: kp[0],
                y: kp[1],
                confidence: kp[2],
            })
            .collect();

        Ok(Self {
            x_center: row[0],
            y_center: row[1],
            width: row[2],
            height: row[3],
            confidence: row[4],
            class_id: row[5] as u32,
            keypoints,
        })
    }

    /// Box corners `(x1, y1, x2, y2)`.
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (
            self.x_center - self.width / 2.0,
            self.y_center - self.height / 2.0,
            self.x_center + self.width / 2.0,
            self.y_center + self.height / 2.0,
        )
    }

    /// Left and right eye keypoints, when the record has them.
    pub fn eyes(&self) -> Option<(Keypoint, Keypoint)> {
        match self.keypoints.as_slice() {
            [left, right, ..] => Some((*left, *right)),
            _ => None,
        }
    }

    /// Same record with coordinates and sizes multiplied per axis.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x_center: self.x_center * sx,
            y_center: self.y_center * sy,
            width: self.width * sx,
            height: self.height * sy,
            keypoints: self
                .keypoints
                .iter()
                .map(|kp| Keypoint {
                    x: kp.x * sx,
                    y: kp.y * sy,
                    confidence: kp.confidence,
                })
                .collect(),
            ..self.clone()
        }
    }
}

/// Parse every row of an `[M, 6 + 3K]` output tensor.
pub fn records_from_tensor(
    output: &ArrayD<f32>,
    num_key_points: usize,
) -> anyhow::Result<Vec<DetectionRecord>> {
    if output.ndim() != 2 {
        anyhow::bail!("expected a 2-D detection tensor, got shape {:?}", output.shape());
    }
    output
        .axis_iter(Axis(0))
        .map(|row| {
            let row: Vec<f32> = row.iter().copied().collect();
            DetectionRecord::from_row(&row, num_key_points)
        })
        .collect()
}
