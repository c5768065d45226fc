//! Subcommand bodies. Each returns once its output files are written.

use crate::args::EmojiAction;
use anyhow::Context;
use image::{DynamicImage, ImageFormat, RgbaImage};
use inference::{FaceDetector, InferenceConfig, OrtBackend, augment_model};
use preprocess::{MAX_DETECTION_SIDE, fit_within};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use visualize::{
    EmojiPicker, EmojiPlacement, EmojiSettings, add_placement, annotate_detections,
    draw_placements, load_font, load_placements, plan_placements, save_placements,
    update_placement,
};

pub fn augment(
    config: &InferenceConfig,
    model: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let model = model.unwrap_or_else(|| config.model_path.clone());
    let output = output.unwrap_or_else(|| config.manifest_path.clone());

    tracing::info!(model = %model.display(), "Loading model");
    let backend = OrtBackend::load_model_with_options(&model, &config.ort_options())?;
    let spec = augment_model(&backend, &output)?;

    println!(
        "{} ({} pre-processing, {} post-processing steps)",
        output.display(),
        spec.pre_processing.len(),
        spec.post_processing.len()
    );
    Ok(())
}

fn load_detector(
    config: &InferenceConfig,
    manifest: Option<PathBuf>,
) -> anyhow::Result<FaceDetector<OrtBackend>> {
    match manifest {
        Some(manifest) => FaceDetector::load(&manifest, &config.ort_options()),
        None => FaceDetector::from_config(config),
    }
}

fn read_image(path: &Path) -> anyhow::Result<(Vec<u8>, DynamicImage)> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let image = image::load_from_memory(&bytes)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok((bytes, image))
}

fn encode_png(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// JPEG has no alpha channel, so RGBA output is flattened for it.
fn save_rgba(image: RgbaImage, path: &Path) -> anyhow::Result<()> {
    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Png);
    let image = DynamicImage::ImageRgba8(image);
    let result = match format {
        ImageFormat::Jpeg => image.to_rgb8().save_with_format(path, format),
        _ => image.save_with_format(path, format),
    };
    result.with_context(|| format!("failed to write {}", path.display()))
}

fn emoji_font(
    requested: Option<PathBuf>,
    settings: &EmojiSettings,
) -> anyhow::Result<ab_glyph::FontArc> {
    let path = requested
        .or_else(|| settings.font.clone())
        .context("no emoji font configured; pass --font or run `facemark emojis font <PATH>`")?;
    load_font(&path)
}

pub fn predict(
    config: &InferenceConfig,
    image: &Path,
    manifest: Option<PathBuf>,
    output: &Path,
    font: Option<&Path>,
) -> anyhow::Result<()> {
    let mut detector = load_detector(config, manifest)?;
    let (bytes, decoded) = read_image(image)?;
    let records = detector.detect(&bytes)?;

    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }

    let font = font.map(load_font).transpose()?;
    let mut canvas = decoded.to_rgb8();
    annotate_detections(&mut canvas, &records, font.as_ref());
    canvas
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    tracing::info!(
        detections = records.len(),
        output = %output.display(),
        "Annotated image written"
    );
    Ok(())
}

pub struct EmojifyArgs {
    pub image: PathBuf,
    pub manifest: Option<PathBuf>,
    pub output: PathBuf,
    pub placements: Option<PathBuf>,
    pub font: Option<PathBuf>,
    pub seed: Option<u64>,
}

pub fn emojify(config: &InferenceConfig, args: EmojifyArgs) -> anyhow::Result<()> {
    let settings = EmojiSettings::load(&EmojiSettings::path())?;
    let font = emoji_font(args.font, &settings)?;
    let mut detector = load_detector(config, args.manifest)?;

    let (bytes, source) = read_image(&args.image)?;
    let (scaled, scale_x, scale_y) = fit_within(&source, MAX_DETECTION_SIDE);
    let detection_bytes = if scale_x == 1.0 && scale_y == 1.0 {
        bytes
    } else {
        encode_png(&scaled)?
    };

    let records = detector.detect(&detection_bytes)?;
    let rng = args.seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
    let mut picker = EmojiPicker::new(settings.emojis, rng)?;
    let placements = plan_placements(&records, (scale_x, scale_y), &mut picker);

    let rendered = draw_placements(&source.to_rgba8(), &placements, &font);
    save_rgba(rendered, &args.output)?;
    if let Some(path) = &args.placements {
        save_placements(path, &placements)?;
    }

    println!("{} face(s) covered, written to {}", placements.len(), args.output.display());
    Ok(())
}

/// Edits to a saved placement list. Indices refer to the list as loaded.
#[derive(Debug, Default)]
pub struct PlacementEdits {
    pub set: Vec<(usize, String)>,
    pub remove: Vec<usize>,
    pub add: Vec<EmojiPlacement>,
}

impl PlacementEdits {
    pub fn apply(self, placements: &mut Vec<EmojiPlacement>) -> anyhow::Result<()> {
        let len = placements.len();
        if let Some(&index) = self
            .set
            .iter()
            .map(|(i, _)| i)
            .chain(&self.remove)
            .find(|&&i| i >= len)
        {
            anyhow::bail!("placement {index} out of range ({len} placements)");
        }

        let mut removals = self.remove;
        for (index, emoji) in self.set {
            if emoji.is_empty() {
                removals.push(index);
                continue;
            }
            let (diameter, angle) = (placements[index].diameter, placements[index].angle);
            update_placement(placements, index, &emoji, diameter, angle)?;
        }

        // highest first so earlier indices stay valid
        removals.sort_unstable_by(|a, b| b.cmp(a));
        removals.dedup();
        for index in removals {
            update_placement(placements, index, "", 0.0, 0.0)?;
        }

        for placement in self.add {
            add_placement(placements, placement);
        }
        Ok(())
    }
}

pub struct RedrawArgs {
    pub image: PathBuf,
    pub placements: PathBuf,
    pub output: PathBuf,
    pub font: Option<PathBuf>,
    pub edits: PlacementEdits,
    pub save: bool,
}

pub fn redraw(args: RedrawArgs) -> anyhow::Result<()> {
    let settings = EmojiSettings::load(&EmojiSettings::path())?;
    let font = emoji_font(args.font, &settings)?;

    let mut placements = load_placements(&args.placements)?;
    args.edits.apply(&mut placements)?;

    let (_, source) = read_image(&args.image)?;
    let rendered = draw_placements(&source.to_rgba8(), &placements, &font);
    save_rgba(rendered, &args.output)?;
    if args.save {
        save_placements(&args.placements, &placements)?;
    }

    println!("{} emoji(s) drawn, written to {}", placements.len(), args.output.display());
    Ok(())
}

pub fn emojis(action: EmojiAction) -> anyhow::Result<()> {
    let path = EmojiSettings::path();
    let mut settings = EmojiSettings::load(&path)?;

    match action {
        EmojiAction::Show => {
            println!("{}", settings.emojis.join(" "));
            match &settings.font {
                Some(font) => println!("font: {}", font.display()),
                None => println!("font: (none)"),
            }
            return Ok(());
        }
        EmojiAction::Set { emojis } => settings.set_emojis(&emojis.join(" ")),
        EmojiAction::Reset => settings.reset_emojis(),
        EmojiAction::Font { path: font, clear } => {
            if clear {
                settings.font = None;
            } else if let Some(font) = font {
                load_font(&font)?;
                settings.font = Some(font);
            } else {
                anyhow::bail!("pass a font path or --clear");
            }
        }
    }

    settings.save(&path)?;
    println!("{}", settings.emojis.join(" "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(emoji: &str, x: f32) -> EmojiPlacement {
        EmojiPlacement {
            x_center: x,
            y_center: 10.0,
            diameter: 32.0,
            angle: 5.0,
            emoji: emoji.to_string(),
        }
    }

    /// Test set, remove and add combine against the loaded indices
    #[test]
    fn test_edits_use_original_indices() {
        let mut placements = vec![placement("a", 0.0), placement("b", 1.0), placement("c", 2.0)];
        let edits = PlacementEdits {
            set: vec![(2, "z".into()), (0, String::new())],
            remove: vec![1],
            add: vec![placement("n", 9.0)],
        };
        edits.apply(&mut placements).unwrap();

        let emojis: Vec<&str> = placements.iter().map(|p| p.emoji.as_str()).collect();
        assert_eq!(emojis, ["z", "n"]);
        assert_eq!(placements[0].diameter, 32.0);
        assert_eq!(placements[0].angle, 5.0);
    }

    #[test]
    fn test_edits_reject_out_of_range() {
        let mut placements = vec![placement("a", 0.0)];
        let edits = PlacementEdits {
            remove: vec![3],
            ..Default::default()
        };
        assert!(edits.apply(&mut placements).is_err());
        assert_eq!(placements.len(), 1);
    }

    #[test]
    fn test_duplicate_removals_collapse() {
        let mut placements = vec![placement("a", 0.0), placement("b", 1.0)];
        let edits = PlacementEdits {
            set: vec![(0, String::new())],
            remove: vec![0, 0],
            ..Default::default()
        };
        edits.apply(&mut placements).unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].emoji, "b");
    }

    #[test]
    fn test_save_rgba_flattens_for_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]));

        let jpg = dir.path().join("out.jpg");
        save_rgba(image.clone(), &jpg).unwrap();
        assert_eq!(image::open(&jpg).unwrap().width(), 4);

        let png = dir.path().join("out.png");
        save_rgba(image, &png).unwrap();
        assert_eq!(
            image::open(&png).unwrap().to_rgba8().get_pixel(0, 0),
            &image::Rgba([10, 20, 30, 255])
        );
    }

    #[test]
    fn test_emoji_font_requires_a_path() {
        let settings = EmojiSettings::default();
        let err = emoji_font(None, &settings).unwrap_err();
        assert!(err.to_string().contains("--font"), "{err}");
    }

    #[test]
    fn test_encode_png_decodes_back() {
        let image = DynamicImage::new_rgb8(7, 3);
        let bytes = encode_png(&image).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 3));
    }
}
