use crate::errors::PipelineError;
use crate::shape::{Dim, ValueInfo};
use crate::tensor::DType;
use serde::{Deserialize, Serialize};

/// Channel layout of a 3-D image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    #[serde(rename = "CHW")]
    Chw,
    #[serde(rename = "HWC")]
    Hwc,
}

impl Layout {
    /// Axis indices of (height, width, channels).
    pub fn axes(self) -> (usize, usize, usize) {
        match self {
            Layout::Chw => (1, 2, 0),
            Layout::Hwc => (0, 1, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Keep aspect ratio; the result fits inside the target.
    NotLarger,
    /// Keep aspect ratio; the result covers the target.
    NotSmaller,
    Exact,
}

fn default_max_boxes() -> usize {
    100
}

/// A processing operator and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum StepKind {
    /// Encoded jpg/png bytes to a BGR image in HWC layout.
    #[serde(rename = "ConvertImageToBGR")]
    ConvertImageToBgr,
    ChannelsLastToChannelsFirst,
    Resize {
        height: usize,
        width: usize,
        policy: ResizePolicy,
        layout: Layout,
    },
    LetterBox {
        height: usize,
        width: usize,
        #[serde(default)]
        fill_value: u8,
        layout: Layout,
    },
    ImageBytesToFloat,
    Unsqueeze {
        axes: Vec<usize>,
    },
    Squeeze {
        axes: Vec<usize>,
    },
    Transpose {
        perms: Vec<usize>,
    },
    Split {
        num_outputs: usize,
        axis: usize,
        splits: Vec<usize>,
    },
    #[serde(rename = "SelectBestBoundingBoxesByNMS")]
    SelectBestBoundingBoxesByNms {
        iou_threshold: f32,
        score_threshold: f32,
        #[serde(default = "default_max_boxes")]
        max_boxes_per_class: usize,
        has_mask_data: bool,
    },
    #[serde(rename = "ScaleNMSBoundingBoxesAndKeyPoints")]
    ScaleNmsBoundingBoxesAndKeyPoints {
        num_key_points: usize,
        layout: Layout,
    },
}

impl StepKind {
    /// Operator name, also the default step name.
    pub fn op_name(&self) -> &'static str {
        match self {
            StepKind::ConvertImageToBgr => "ConvertImageToBGR",
            StepKind::ChannelsLastToChannelsFirst => "ChannelsLastToChannelsFirst",
            StepKind::Resize { .. } => "Resize",
            StepKind::LetterBox { .. } => "LetterBox",
            StepKind::ImageBytesToFloat => "ImageBytesToFloat",
            StepKind::Unsqueeze { .. } => "Unsqueeze",
            StepKind::Squeeze { .. } => "Squeeze",
            StepKind::Transpose { .. } => "Transpose",
            StepKind::Split { .. } => "Split",
            StepKind::SelectBestBoundingBoxesByNms { .. } => "SelectBestBoundingBoxesByNMS",
            StepKind::ScaleNmsBoundingBoxesAndKeyPoints { .. } => {
                "ScaleNMSBoundingBoxesAndKeyPoints"
            }
        }
    }

    pub fn num_inputs(&self) -> usize {
        match self {
            StepKind::SelectBestBoundingBoxesByNms { has_mask_data, .. } => {
                if *has_mask_data {
                    3
                } else {
                    2
                }
            }
            StepKind::ScaleNmsBoundingBoxesAndKeyPoints { .. } => 4,
            _ => 1,
        }
    }

    pub fn num_outputs(&self) -> usize {
        match self {
            StepKind::Split { num_outputs, .. } => *num_outputs,
            _ => 1,
        }
    }

    /// Static shape inference for this operator.
    ///
    /// `name` is the step name, used for error messages and for naming the
    /// symbolic dimensions the step introduces.
    pub fn infer(&self, name: &str, inputs: &[ValueInfo]) -> Result<Vec<ValueInfo>, PipelineError> {
        let sym = |what: &str| Dim::symbolic(format!("{name}_{what}"));
        let shape_err = |detail: String| PipelineError::ShapeMismatch {
            step: name.to_string(),
            detail,
        };
        let param_err = |detail: String| PipelineError::InvalidParameter {
            step: name.to_string(),
            detail,
        };

        match self {
            StepKind::ConvertImageToBgr => {
                let input = &inputs[0];
                expect(name, input, DType::U8, 1)?;
                Ok(vec![ValueInfo::new(
                    DType::U8,
                    [sym("height"), sym("width"), Dim::Fixed(3)],
                )])
            }
            StepKind::ChannelsLastToChannelsFirst => {
                let input = &inputs[0];
                expect_rank(name, input, 3)?;
                let s = &input.shape;
                Ok(vec![ValueInfo::new(
                    input.dtype,
                    [s[2].clone(), s[0].clone(), s[1].clone()],
                )])
            }
            StepKind::Resize {
                height,
                width,
                policy,
                layout,
            } => {
                let input = &inputs[0];
                expect(name, input, DType::U8, 3)?;
                if *height == 0 || *width == 0 {
                    return Err(param_err(format!("target size {height}x{width}")));
                }
                let (h_ax, w_ax, _) = layout.axes();
                let (out_h, out_w) = match (policy, input.shape[h_ax].fixed(), input.shape[w_ax].fixed()) {
                    (ResizePolicy::Exact, _, _) => (Dim::Fixed(*height), Dim::Fixed(*width)),
                    (policy, Some(h), Some(w)) => {
                        let (rh, rw) = resized_dims((h, w), (*height, *width), *policy);
                        (Dim::Fixed(rh), Dim::Fixed(rw))
                    }
                    _ => (sym("height"), sym("width")),
                };
                let mut shape = input.shape.clone();
                shape[h_ax] = out_h;
                shape[w_ax] = out_w;
                Ok(vec![ValueInfo::new(input.dtype, shape)])
            }
            StepKind::LetterBox {
                height,
                width,
                layout,
                ..
            } => {
                let input = &inputs[0];
                expect(name, input, DType::U8, 3)?;
                let (h_ax, w_ax, _) = layout.axes();
                if let Some(h) = input.shape[h_ax].fixed().filter(|h| h > height) {
                    return Err(shape_err(format!("height {h} exceeds letterbox target {height}")));
                }
                if let Some(w) = input.shape[w_ax].fixed().filter(|w| w > width) {
                    return Err(shape_err(format!("width {w} exceeds letterbox target {width}")));
                }
                let mut shape = input.shape.clone();
                shape[h_ax] = Dim::Fixed(*height);
                shape[w_ax] = Dim::Fixed(*width);
                Ok(vec![ValueInfo::new(input.dtype, shape)])
            }
            StepKind::ImageBytesToFloat => {
                let input = &inputs[0];
                if input.dtype != DType::U8 {
                    return Err(PipelineError::DTypeMismatch {
                        step: name.to_string(),
                        expected: DType::U8,
                        found: input.dtype,
                    });
                }
                Ok(vec![ValueInfo::new(DType::F32, input.shape.clone())])
            }
            StepKind::Unsqueeze { axes } => {
                let input = &inputs[0];
                let mut sorted = axes.clone();
                sorted.sort_unstable();
                let mut shape = input.shape.clone();
                for axis in sorted {
                    if axis > shape.len() {
                        return Err(param_err(format!(
                            "axis {axis} out of range for rank {}",
                            shape.len()
                        )));
                    }
                    shape.insert(axis, Dim::Fixed(1));
                }
                Ok(vec![ValueInfo::new(input.dtype, shape)])
            }
            StepKind::Squeeze { axes } => {
                let input = &inputs[0];
                let mut sorted = axes.clone();
                sorted.sort_unstable_by(|a, b| b.cmp(a));
                sorted.dedup();
                let mut shape = input.shape.clone();
                for axis in sorted {
                    if axis >= shape.len() {
                        return Err(param_err(format!(
                            "axis {axis} out of range for rank {}",
                            input.rank()
                        )));
                    }
                    if let Some(d) = shape[axis].fixed().filter(|d| *d != 1) {
                        return Err(shape_err(format!("cannot squeeze axis {axis} of size {d}")));
                    }
                    shape.remove(axis);
                }
                Ok(vec![ValueInfo::new(input.dtype, shape)])
            }
            StepKind::Transpose { perms } => {
                let input = &inputs[0];
                if !is_permutation(perms, input.rank()) {
                    return Err(param_err(format!(
                        "{perms:?} is not a permutation of rank {}",
                        input.rank()
                    )));
                }
                let shape = perms.iter().map(|&p| input.shape[p].clone()).collect::<Vec<_>>();
                Ok(vec![ValueInfo::new(input.dtype, shape)])
            }
            StepKind::Split {
                num_outputs,
                axis,
                splits,
            } => {
                let input = &inputs[0];
                if *axis >= input.rank() {
                    return Err(param_err(format!(
                        "axis {axis} out of range for rank {}",
                        input.rank()
                    )));
                }
                if *num_outputs == 0 {
                    return Err(param_err("split needs at least one output".to_string()));
                }
                if splits.contains(&0) {
                    return Err(param_err(format!("zero-sized split in {splits:?}")));
                }
                if splits.len() != *num_outputs {
                    return Err(param_err(format!(
                        "{} split sizes for {num_outputs} outputs",
                        splits.len()
                    )));
                }
                let total: usize = splits.iter().sum();
                if let Some(d) = input.shape[*axis].fixed().filter(|d| *d != total) {
                    return Err(shape_err(format!(
                        "split sizes {splits:?} sum to {total}, axis {axis} has size {d}"
                    )));
                }
                Ok(splits
                    .iter()
                    .map(|&s| {
                        let mut shape = input.shape.clone();
                        shape[*axis] = Dim::Fixed(s);
                        ValueInfo::new(input.dtype, shape)
                    })
                    .collect())
            }
            StepKind::SelectBestBoundingBoxesByNms {
                iou_threshold,
                score_threshold,
                has_mask_data,
                ..
            } => {
                if !(0.0..=1.0).contains(iou_threshold) {
                    return Err(param_err(format!("iou_threshold {iou_threshold}")));
                }
                if !score_threshold.is_finite() {
                    return Err(param_err(format!("score_threshold {score_threshold}")));
                }
                for input in inputs {
                    expect(name, input, DType::F32, 2)?;
                }
                let boxes = &inputs[0];
                if !boxes.shape[1].compatible(&Dim::Fixed(4)) {
                    return Err(shape_err(format!(
                        "boxes must have 4 columns, got {}",
                        boxes.shape[1]
                    )));
                }
                for other in &inputs[1..] {
                    if !boxes.shape[0].compatible(&other.shape[0]) {
                        return Err(shape_err(format!(
                            "box count {} does not match {}",
                            boxes.shape[0], other.shape[0]
                        )));
                    }
                }
                let width = if *has_mask_data {
                    match inputs[2].shape[1].fixed() {
                        Some(k) => Dim::Fixed(6 + k),
                        None => sym("width"),
                    }
                } else {
                    Dim::Fixed(6)
                };
                Ok(vec![ValueInfo::new(DType::F32, [sym("selected"), width])])
            }
            StepKind::ScaleNmsBoundingBoxesAndKeyPoints {
                num_key_points,
                layout,
            } => {
                let nms = &inputs[0];
                expect(name, nms, DType::F32, 2)?;
                let expected_width = 6 + 3 * num_key_points;
                if !nms.shape[1].compatible(&Dim::Fixed(expected_width)) {
                    return Err(shape_err(format!(
                        "{num_key_points} key points need {expected_width} columns, got {}",
                        nms.shape[1]
                    )));
                }
                let (_, _, c_ax) = layout.axes();
                for image in &inputs[1..] {
                    expect_rank(name, image, 3)?;
                    if !image.shape[c_ax].compatible(&Dim::Fixed(3)) {
                        return Err(shape_err(format!(
                            "reference image has {} channels on axis {c_ax}",
                            image.shape[c_ax]
                        )));
                    }
                }
                Ok(vec![nms.clone()])
            }
        }
    }
}

fn expect(step: &str, info: &ValueInfo, dtype: DType, rank: usize) -> Result<(), PipelineError> {
    if info.dtype != dtype {
        return Err(PipelineError::DTypeMismatch {
            step: step.to_string(),
            expected: dtype,
            found: info.dtype,
        });
    }
    expect_rank(step, info, rank)
}

fn expect_rank(step: &str, info: &ValueInfo, rank: usize) -> Result<(), PipelineError> {
    if info.rank() != rank {
        return Err(PipelineError::RankMismatch {
            step: step.to_string(),
            expected: rank,
            found: info.rank(),
        });
    }
    Ok(())
}

fn is_permutation(perms: &[usize], rank: usize) -> bool {
    if perms.len() != rank {
        return false;
    }
    let mut seen = vec![false; rank];
    for &p in perms {
        if p >= rank || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}

/// Output (height, width) of an aspect-preserving resize.
///
/// Dimensions are rounded to nearest and never drop below 1.
pub fn resized_dims(
    (h, w): (usize, usize),
    (target_h, target_w): (usize, usize),
    policy: ResizePolicy,
) -> (usize, usize) {
    let sy = target_h as f64 / h as f64;
    let sx = target_w as f64 / w as f64;
    let scale = match policy {
        ResizePolicy::NotLarger => sy.min(sx),
        ResizePolicy::NotSmaller => sy.max(sx),
        ResizePolicy::Exact => return (target_h, target_w),
    };
    let rh = ((h as f64 * scale).round() as usize).max(1);
    let rw = ((w as f64 * scale).round() as usize).max(1);
    (rh, rw)
}

/// Data-dependency link: output `producer_idx` of step `producer` feeds input
/// `consumer_idx` of the step carrying the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoMapEntry {
    pub producer: String,
    pub producer_idx: usize,
    pub consumer_idx: usize,
}

impl IoMapEntry {
    pub fn new(producer: impl Into<String>, producer_idx: usize, consumer_idx: usize) -> Self {
        Self {
            producer: producer.into(),
            producer_idx,
            consumer_idx,
        }
    }
}

/// A named step in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<IoMapEntry>,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            name: kind.op_name().to_string(),
            kind,
            links: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_links(mut self, links: impl IntoIterator<Item = IoMapEntry>) -> Self {
        self.links.extend(links);
        self
    }
}

impl From<StepKind> for Step {
    fn from(kind: StepKind) -> Self {
        Step::new(kind)
    }
}
