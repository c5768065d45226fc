use crate::backend::InferenceBackend;
use crate::processing::post::{
    NmsParams, scale_boxes_and_keypoints, select_best_boxes_by_nms, split, squeeze, transpose,
};
use ndarray::{Array1, ArrayD};
use pipeline::{Layout, PipelineError, PipelineSpec, Source, Step, StepKind, Tensor};
use preprocess::{
    LetterboxTransform, bytes_to_float, channels_last_to_first, decode_bgr, letterbox, resize,
    unsqueeze,
};

/// Apply a dtype-generic array operation to either tensor variant.
macro_rules! map_tensor {
    ($tensor:expr, |$a:ident| $body:expr) => {
        match $tensor {
            Tensor::U8($a) => Tensor::U8($body),
            Tensor::F32($a) => Tensor::F32($body),
        }
    };
}

/// Runs a validated [`PipelineSpec`] around a model backend.
pub struct PipelineExecutor<B: InferenceBackend> {
    spec: PipelineSpec,
    bindings: Vec<Vec<Source>>,
    backend: B,
}

impl<B: InferenceBackend> PipelineExecutor<B> {
    pub fn new(spec: PipelineSpec, backend: B) -> anyhow::Result<Self> {
        spec.infer_shapes()?;

        let loaded = &backend.signature().input.info;
        if !loaded.compatible(&spec.model.input.info) {
            return Err(PipelineError::ModelInputMismatch {
                expected: spec.model.input.info.to_string(),
                found: loaded.to_string(),
            }
            .into());
        }

        let bindings = spec.resolve()?;
        Ok(Self {
            spec,
            bindings,
            backend,
        })
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Feed raw image bytes as the single graph input.
    pub fn run_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<Tensor> {
        let input = Array1::from_vec(bytes.to_vec()).into_dyn();
        self.run(vec![Tensor::U8(input)])
    }

    /// Execute every step in order and return the pipeline output.
    pub fn run(&mut self, inputs: Vec<Tensor>) -> anyhow::Result<Tensor> {
        if inputs.len() != self.spec.inputs.len() {
            anyhow::bail!(
                "pipeline takes {} inputs, got {}",
                self.spec.inputs.len(),
                inputs.len()
            );
        }

        let num_pre = self.spec.num_pre();
        let mut outputs: Vec<Vec<Tensor>> = Vec::with_capacity(self.spec.num_steps());
        let mut model_output: Option<Tensor> = None;

        for index in 0..self.spec.num_steps() {
            if index == num_pre {
                model_output = Some(self.run_model(&inputs, &outputs)?);
            }
            let step = self.spec.step(index);
            let args = self.bindings[index]
                .iter()
                .map(|&source| lookup(source, &inputs, model_output.as_ref(), &outputs))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let _span = tracing::debug_span!("pipeline_step", step = %step.name).entered();
            let produced = run_step(step, args)?;
            tracing::trace!(
                step = %step.name,
                shapes = ?produced.iter().map(|t| t.shape().to_vec()).collect::<Vec<_>>(),
                "Step finished"
            );
            outputs.push(produced);
        }
        if model_output.is_none() {
            model_output = Some(self.run_model(&inputs, &outputs)?);
        }

        lookup(
            self.spec.output_source(),
            &inputs,
            model_output.as_ref(),
            &outputs,
        )
    }

    fn run_model(&mut self, inputs: &[Tensor], outputs: &[Vec<Tensor>]) -> anyhow::Result<Tensor> {
        let source = self.spec.model_input_source();
        let input = lookup(source, inputs, None, outputs)?.into_f32("model")?;

        let _span = tracing::info_span!("model_inference").entered();
        Ok(Tensor::F32(self.backend.infer(&input)?))
    }
}

fn lookup(
    source: Source,
    inputs: &[Tensor],
    model_output: Option<&Tensor>,
    outputs: &[Vec<Tensor>],
) -> anyhow::Result<Tensor> {
    match source {
        Source::GraphInput(k) => Ok(inputs[k].clone()),
        Source::ModelOutput(_) => model_output
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("model output requested before the model ran")),
        Source::Step { step, output } => Ok(outputs[step][output].clone()),
    }
}

fn hw(shape: &[usize], layout: Layout) -> (usize, usize) {
    let (h_ax, w_ax, _) = layout.axes();
    (shape[h_ax], shape[w_ax])
}

fn run_step(step: &Step, args: Vec<Tensor>) -> anyhow::Result<Vec<Tensor>> {
    let name = step.name.as_str();
    let mut args = args.into_iter();
    let first = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("{name}: step has no inputs"))?;
    let rest: Vec<Tensor> = args.collect();

    let out = match &step.kind {
        StepKind::ConvertImageToBgr => {
            let bytes = first.as_u8(name)?;
            let bytes = bytes
                .as_slice()
                .ok_or_else(|| anyhow::anyhow!("{name}: image bytes are not contiguous"))?;
            Tensor::U8(decode_bgr(bytes)?.into_dyn())
        }
        StepKind::ChannelsLastToChannelsFirst => {
            map_tensor!(first, |a| channels_last_to_first(&a)?)
        }
        StepKind::Resize {
            height,
            width,
            policy,
            layout,
        } => Tensor::U8(resize(first.as_u8(name)?, *layout, (*height, *width), *policy)?),
        StepKind::LetterBox {
            height,
            width,
            fill_value,
            layout,
        } => Tensor::U8(letterbox(
            first.as_u8(name)?,
            *layout,
            (*height, *width),
            *fill_value,
        )?),
        StepKind::ImageBytesToFloat => Tensor::F32(bytes_to_float(first.as_u8(name)?)),
        StepKind::Unsqueeze { axes } => map_tensor!(first, |a| unsqueeze(a, axes)?),
        StepKind::Squeeze { axes } => map_tensor!(first, |a| squeeze(a, axes)?),
        StepKind::Transpose { perms } => map_tensor!(first, |a| transpose(a, perms)?),
        StepKind::Split { axis, splits, .. } => {
            let parts = match first {
                Tensor::U8(a) => split(&a, *axis, splits)?
                    .into_iter()
                    .map(Tensor::U8)
                    .collect(),
                Tensor::F32(a) => split(&a, *axis, splits)?
                    .into_iter()
                    .map(Tensor::F32)
                    .collect(),
            };
            return Ok(parts);
        }
        StepKind::SelectBestBoundingBoxesByNms {
            iou_threshold,
            score_threshold,
            max_boxes_per_class,
            has_mask_data,
        } => {
            let mask = if *has_mask_data {
                Some(rest[1].as_f32(name)?)
            } else {
                None
            };
            let params = NmsParams {
                iou_threshold: *iou_threshold,
                score_threshold: *score_threshold,
                max_boxes_per_class: *max_boxes_per_class,
            };
            Tensor::F32(select_best_boxes_by_nms(
                first.as_f32(name)?,
                rest[0].as_f32(name)?,
                mask,
                &params,
            )?)
        }
        StepKind::ScaleNmsBoundingBoxesAndKeyPoints {
            num_key_points,
            layout,
        } => {
            // rest holds the original, resized and letterboxed images
            let transform = LetterboxTransform::from_shapes(
                hw(rest[0].shape(), *layout),
                hw(rest[1].shape(), *layout),
                hw(rest[2].shape(), *layout),
            );
            Tensor::F32(scale_boxes_and_keypoints(
                first.as_f32(name)?,
                &transform,
                *num_key_points,
            )?)
        }
    };

    Ok(vec![out])
}
