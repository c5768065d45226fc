use crate::geometry::{diameter_for_box, roll_angle};
use anyhow::Context;
use inference::DetectionRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// An emoji drawn over a face, in source-image pixels and degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmojiPlacement {
    pub x_center: f32,
    pub y_center: f32,
    pub diameter: f32,
    pub angle: f32,
    pub emoji: String,
}

/// Draws emojis at random without repeating one until all have been used.
pub struct EmojiPicker {
    options: Vec<String>,
    remaining: Vec<String>,
    rng: fastrand::Rng,
}

impl EmojiPicker {
    pub fn new(options: Vec<String>, rng: fastrand::Rng) -> anyhow::Result<Self> {
        if options.is_empty() {
            anyhow::bail!("emoji list is empty");
        }
        Ok(Self {
            remaining: options.clone(),
            options,
            rng,
        })
    }

    pub fn with_seed(options: Vec<String>, seed: u64) -> anyhow::Result<Self> {
        Self::new(options, fastrand::Rng::with_seed(seed))
    }

    pub fn pick(&mut self) -> String {
        if self.remaining.is_empty() {
            self.remaining.extend(self.options.iter().cloned());
        }
        let index = self.rng.usize(..self.remaining.len());
        self.remaining.swap_remove(index)
    }
}

/// One placement per detection, left to right.
///
/// `scale` maps detection coordinates (possibly from a downscaled copy) back
/// to the source image. Detections without eye keypoints get no rotation.
pub fn plan_placements(
    records: &[DetectionRecord],
    scale: (f32, f32),
    picker: &mut EmojiPicker,
) -> Vec<EmojiPlacement> {
    let mut sorted: Vec<DetectionRecord> = records
        .iter()
        .map(|r| r.scaled(scale.0, scale.1))
        .collect();
    sorted.sort_by(|a, b| a.x_center.total_cmp(&b.x_center));

    sorted
        .into_iter()
        .map(|record| {
            let angle = record
                .eyes()
                .map_or(0.0, |(l, r)| roll_angle((l.x, l.y), (r.x, r.y)));
            EmojiPlacement {
                x_center: record.x_center,
                y_center: record.y_center,
                diameter: diameter_for_box(record.width, record.height),
                angle,
                emoji: picker.pick(),
            }
        })
        .collect()
}

/// Replace the emoji, size and angle of one placement. An empty emoji
/// removes the placement.
pub fn update_placement(
    placements: &mut Vec<EmojiPlacement>,
    index: usize,
    emoji: &str,
    diameter: f32,
    angle: f32,
) -> anyhow::Result<()> {
    if index >= placements.len() {
        anyhow::bail!(
            "placement {index} out of range ({} placements)",
            placements.len()
        );
    }
    if emoji.is_empty() {
        placements.remove(index);
    } else {
        let placement = &mut placements[index];
        placement.emoji = emoji.to_string();
        placement.diameter = diameter;
        placement.angle = angle;
    }
    Ok(())
}

pub fn add_placement(placements: &mut Vec<EmojiPlacement>, placement: EmojiPlacement) {
    placements.push(placement);
}

pub fn save_placements(path: &Path, placements: &[EmojiPlacement]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(placements)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), count = placements.len(), "Placements saved");
    Ok(())
}

pub fn load_placements(path: &Path) -> anyhow::Result<Vec<EmojiPlacement>> {
    let json =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("invalid placements in {}", path.display()))
}
