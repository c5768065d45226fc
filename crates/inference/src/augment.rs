use crate::backend::InferenceBackend;
use anyhow::Context;
use pipeline::{
    DType, Dim, IoMapEntry, Layout, ModelSignature, PipelineSpec, PrePostProcessor,
    ResizePolicy, Step, StepKind, create_named_value,
};
use preprocess::{DEFAULT_INPUT_SIZE, DEFAULT_LETTERBOX_FILL};
use std::path::{Path, PathBuf};

/// Spatial size the face model is trained on.
pub const FACE_INPUT_SIZE: (usize, usize) = DEFAULT_INPUT_SIZE;
/// Eyes, nose tip and mouth corners.
pub const FACE_KEY_POINTS: usize = 5;

const IOU_THRESHOLD: f32 = 0.5;
const SCORE_THRESHOLD: f32 = 0.45;
const MAX_BOXES_PER_CLASS: usize = 100;

/// Spatial (height, width) of an NCHW model input.
pub fn inspect_model(signature: &ModelSignature) -> anyhow::Result<(usize, usize)> {
    let input = &signature.input;
    let [_, _, height, width] = input.info.shape.as_slice() else {
        anyhow::bail!(
            "model input '{}' must be NCHW, got {}",
            input.name,
            input.info
        );
    };
    match (height, width) {
        (Dim::Fixed(h), Dim::Fixed(w)) => Ok((*h, *w)),
        _ => anyhow::bail!(
            "model input '{}' has a dynamic spatial size ({})",
            input.name,
            input.info
        ),
    }
}

/// Wrap a YOLOv8 pose model with the face pre- and post-processing steps.
///
/// The graph input is the raw encoded image; the output is one
/// `[cx, cy, w, h, conf, class, 5 x (x, y, conf)]` row per face in original
/// image pixels.
pub fn face_pipeline(model: ModelSignature) -> pipeline::Result<PipelineSpec> {
    let (height, width) = FACE_INPUT_SIZE;
    let inputs = vec![create_named_value("image_bytes", DType::U8, ["num_bytes"])];

    let mut pipeline = PrePostProcessor::new(inputs);
    pipeline
        .add_pre_processing([
            Step::new(StepKind::ConvertImageToBgr).named("BGRImageHWC"),
            Step::new(StepKind::ChannelsLastToChannelsFirst).named("BGRImageCHW"),
            Step::new(StepKind::Resize {
                height,
                width,
                policy: ResizePolicy::NotLarger,
                layout: Layout::Chw,
            }),
            Step::new(StepKind::LetterBox {
                height,
                width,
                fill_value: DEFAULT_LETTERBOX_FILL,
                layout: Layout::Chw,
            }),
            Step::new(StepKind::ImageBytesToFloat),
            Step::new(StepKind::Unsqueeze { axes: vec![0] }),
        ])
        .add_post_processing([
            Step::new(StepKind::Squeeze { axes: vec![0] }),
            Step::new(StepKind::Transpose { perms: vec![1, 0] }),
            Step::new(StepKind::Split {
                num_outputs: 3,
                axis: 1,
                splits: vec![4, 1, 3 * FACE_KEY_POINTS],
            }),
            Step::new(StepKind::SelectBestBoundingBoxesByNms {
                iou_threshold: IOU_THRESHOLD,
                score_threshold: SCORE_THRESHOLD,
                max_boxes_per_class: MAX_BOXES_PER_CLASS,
                has_mask_data: true,
            }),
            Step::new(StepKind::ScaleNmsBoundingBoxesAndKeyPoints {
                num_key_points: FACE_KEY_POINTS,
                layout: Layout::Chw,
            })
            .with_links([
                IoMapEntry::new("BGRImageCHW", 0, 1),
                IoMapEntry::new("Resize", 0, 2),
                IoMapEntry::new("LetterBox", 0, 3),
            ]),
        ]);

    pipeline.run(model)
}

/// Model path as stored in a manifest written to `manifest`: relative when
/// the model sits next to it, absolute otherwise.
fn manifest_model_path(model: &Path, manifest: &Path) -> PathBuf {
    let manifest_dir = manifest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let model_dir = model
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let same_dir = match (manifest_dir.canonicalize(), model_dir.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => manifest_dir == model_dir,
    };
    match (same_dir, model.file_name()) {
        (true, Some(name)) => PathBuf::from(name),
        _ => model.canonicalize().unwrap_or_else(|_| model.to_path_buf()),
    }
}

/// Check the loaded model, build the face pipeline and save it to `output`.
#[tracing::instrument(skip(backend, output), fields(output = %output.display()))]
pub fn augment_model<B: InferenceBackend>(
    backend: &B,
    output: &Path,
) -> anyhow::Result<PipelineSpec> {
    let mut signature = backend.signature().clone();
    let input_size = inspect_model(&signature)?;
    if input_size != FACE_INPUT_SIZE {
        anyhow::bail!(
            "model input is {}x{}, the face pipeline needs {}x{}",
            input_size.1,
            input_size.0,
            FACE_INPUT_SIZE.1,
            FACE_INPUT_SIZE.0
        );
    }
    tracing::info!(
        model = %signature.path.display(),
        height = input_size.0,
        width = input_size.1,
        "Model input size checked"
    );

    let spec = face_pipeline(signature.clone()).context("face pipeline failed validation")?;
    let output_info = spec.output_info()?;

    signature.path = manifest_model_path(&signature.path, output);
    let stored = PipelineSpec {
        model: signature,
        ..spec.clone()
    };
    stored
        .save(output)
        .with_context(|| format!("failed to write manifest {}", output.display()))?;

    tracing::info!(
        steps = spec.num_steps(),
        output = %output_info,
        "Pipeline manifest written"
    );
    Ok(spec)
}
