use common::span_debug;
use ndarray::{Array2, ArrayD, ArrayView1, Axis, IxDyn, Slice};
use preprocess::LetterboxTransform;

/// Remove the given unit axes.
pub fn squeeze<T: Clone>(tensor: ArrayD<T>, axes: &[usize]) -> anyhow::Result<ArrayD<T>> {
    let mut sorted = axes.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();

    let mut out = tensor;
    for axis in sorted {
        if axis >= out.ndim() {
            anyhow::bail!("squeeze axis {axis} out of range for rank {}", out.ndim());
        }
        if out.shape()[axis] != 1 {
            anyhow::bail!(
                "cannot squeeze axis {axis} of size {}",
                out.shape()[axis]
            );
        }
        out = out.index_axis_move(Axis(axis), 0);
    }
    Ok(out)
}

/// Permute axes; output axis `i` is input axis `perms[i]`.
pub fn transpose<T: Clone>(tensor: ArrayD<T>, perms: &[usize]) -> anyhow::Result<ArrayD<T>> {
    let rank = tensor.ndim();
    let mut sorted = perms.to_vec();
    sorted.sort_unstable();
    if !sorted.iter().copied().eq(0..rank) {
        anyhow::bail!("{perms:?} is not a permutation of rank {rank}");
    }
    Ok(tensor
        .permuted_axes(IxDyn(perms))
        .as_standard_layout()
        .into_owned())
}

/// Split along `axis` into consecutive chunks of the given sizes.
pub fn split<T: Clone>(
    tensor: &ArrayD<T>,
    axis: usize,
    splits: &[usize],
) -> anyhow::Result<Vec<ArrayD<T>>> {
    if axis >= tensor.ndim() {
        anyhow::bail!("split axis {axis} out of range for rank {}", tensor.ndim());
    }
    let total: usize = splits.iter().sum();
    if total != tensor.shape()[axis] {
        anyhow::bail!(
            "split sizes {splits:?} sum to {total}, axis {axis} has size {}",
            tensor.shape()[axis]
        );
    }

    let mut start = 0;
    Ok(splits
        .iter()
        .map(|&size| {
            let part = tensor
                .slice_axis(Axis(axis), Slice::from(start..start + size))
                .as_standard_layout()
                .into_owned();
            start += size;
            part
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsParams {
    pub iou_threshold: f32,
    pub score_threshold: f32,
    pub max_boxes_per_class: usize,
}

/// IoU of two boxes given as `[cx, cy, w, h]`.
#[inline]
fn iou(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let (ax1, ay1, ax2, ay2) = cxcywh_to_xyxy(a[0], a[1], a[2], a[3]);
    let (bx1, by1, bx2, by2) = cxcywh_to_xyxy(b[0], b[1], b[2], b[3]);

    let inter_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let inter_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a[2] * a[3] + b[2] * b[3] - inter;

    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    (cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
}

/// Class-wise greedy non-maximum suppression.
///
/// `boxes` is `[N, 4]` in center format, `scores` is `[N, C]`, `mask` an
/// optional `[N, K]` block carried through untouched. Returns
/// `[M, 4 + 1 + 1 + K]` rows of box, score, class id and mask data, ordered
/// by class then by descending score.
pub fn select_best_boxes_by_nms(
    boxes: &ArrayD<f32>,
    scores: &ArrayD<f32>,
    mask: Option<&ArrayD<f32>>,
    params: &NmsParams,
) -> anyhow::Result<ArrayD<f32>> {
    let _s = span_debug!("select_best_boxes_by_nms");

    let boxes = boxes.view().into_dimensionality::<ndarray::Ix2>()?;
    let scores = scores.view().into_dimensionality::<ndarray::Ix2>()?;
    let mask = mask
        .map(|m| m.view().into_dimensionality::<ndarray::Ix2>())
        .transpose()?;

    let num_boxes = boxes.nrows();
    if boxes.ncols() != 4 {
        anyhow::bail!("boxes must have 4 columns, got {}", boxes.ncols());
    }
    if scores.nrows() != num_boxes {
        anyhow::bail!("{num_boxes} boxes but {} score rows", scores.nrows());
    }
    if let Some(rows) = mask.as_ref().map(|m| m.nrows()).filter(|&r| r != num_boxes) {
        anyhow::bail!("{num_boxes} boxes but {rows} mask rows");
    }

    let mask_width = mask.as_ref().map_or(0, |m| m.ncols());
    let width = 6 + mask_width;
    let mut rows: Vec<f32> = Vec::new();
    let mut selected = 0usize;

    for class in 0..scores.ncols() {
        let class_scores = scores.column(class);
        let mut candidates: Vec<usize> = (0..num_boxes)
            .filter(|&i| class_scores[i] > params.score_threshold)
            .collect();
        candidates.sort_by(|&a, &b| class_scores[b].total_cmp(&class_scores[a]));

        let mut kept: Vec<usize> = Vec::new();
        for i in candidates {
            if kept.len() >= params.max_boxes_per_class {
                break;
            }
            let suppressed = kept
                .iter()
                .any(|&k| iou(boxes.row(k), boxes.row(i)) > params.iou_threshold);
            if !suppressed {
                kept.push(i);
            }
        }

        for &i in &kept {
            rows.extend(boxes.row(i).iter());
            rows.push(class_scores[i]);
            rows.push(class as f32);
            if let Some(m) = &mask {
                rows.extend(m.row(i).iter());
            }
        }
        selected += kept.len();
    }

    tracing::debug!(candidates = num_boxes, selected, "NMS finished");
    Ok(Array2::from_shape_vec((selected, width), rows)?.into_dyn())
}

/// Map NMS rows from letterboxed model space back to the original image.
///
/// Box centers and keypoint coordinates are shifted by the letterbox offset
/// and scaled by the resize ratio, box sizes are only scaled. Scores, class
/// ids and keypoint confidences pass through. No clamping is applied.
pub fn scale_boxes_and_keypoints(
    nms: &ArrayD<f32>,
    transform: &LetterboxTransform,
    num_key_points: usize,
) -> anyhow::Result<ArrayD<f32>> {
    let expected = 6 + 3 * num_key_points;
    if nms.ndim() != 2 || nms.shape()[1] != expected {
        anyhow::bail!(
            "expected [N, {expected}] detections for {num_key_points} key points, got {:?}",
            nms.shape()
        );
    }

    let mut out = nms.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let (cx, cy) = transform.point(row[0], row[1]);
        let (w, h) = transform.size(row[2], row[3]);
        row[0] = cx;
        row[1] = cy;
        row[2] = w;
        row[3] = h;
        for k in 0..num_key_points {
            let base = 6 + 3 * k;
            let (x, y) = transform.point(row[base], row[base + 1]);
            row[base] = x;
            row[base + 1] = y;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, array};

    fn dyn2(data: Vec<Vec<f32>>) -> ArrayD<f32> {
        let cols = data.first().map_or(0, Vec::len);
        let rows = data.len();
        Array::from_shape_vec((rows, cols), data.into_iter().flatten().collect())
            .unwrap()
            .into_dyn()
    }

    fn mask_of(out: &ArrayD<f32>, row: usize) -> Vec<f32> {
        out.index_axis(Axis(0), row).iter().skip(6).copied().collect()
    }

    fn params(iou: f32, score: f32) -> NmsParams {
        NmsParams {
            iou_threshold: iou,
            score_threshold: score,
            max_boxes_per_class: 100,
        }
    }

    #[test]
    fn test_squeeze_transpose_split_chain() {
        // [1, 20, 3] model output layout
        let raw = Array::from_shape_fn(IxDyn(&[1, 20, 3]), |ix| (ix[1] * 10 + ix[2]) as f32);
        let squeezed = squeeze(raw, &[0]).unwrap();
        assert_eq!(squeezed.shape(), &[20, 3]);

        let rows = transpose(squeezed, &[1, 0]).unwrap();
        assert_eq!(rows.shape(), &[3, 20]);
        assert_eq!(rows[[2, 5]], 52.0);

        let parts = split(&rows, 1, &[4, 1, 15]).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].shape(), &[3, 4]);
        assert_eq!(parts[1].shape(), &[3, 1]);
        assert_eq!(parts[2].shape(), &[3, 15]);
        assert_eq!(parts[1][[1, 0]], 41.0);
        assert_eq!(parts[2][[0, 0]], 50.0);
    }

    #[test]
    fn test_squeeze_rejects_non_unit_axis() {
        let t = ArrayD::<f32>::zeros(IxDyn(&[2, 3]));
        assert!(squeeze(t, &[0]).is_err());
    }

    #[test]
    fn test_transpose_rejects_invalid_permutation() {
        let t = ArrayD::<f32>::zeros(IxDyn(&[2, 3]));
        assert!(transpose(t.clone(), &[0, 0]).is_err());
        assert!(transpose(t, &[0, 1, 2]).is_err());
    }

    #[test]
    fn test_split_rejects_bad_sizes() {
        let t = ArrayD::<f32>::zeros(IxDyn(&[2, 20]));
        let err = split(&t, 1, &[4, 1, 14]).unwrap_err();
        assert!(err.to_string().contains("sum to 19"));
    }

    /// Test overlapping boxes are suppressed and the best one survives
    #[test]
    fn test_nms_suppresses_overlapping_boxes() {
        let boxes = dyn2(vec![
            vec![100.0, 100.0, 50.0, 50.0],
            vec![102.0, 101.0, 50.0, 50.0],
            vec![300.0, 300.0, 40.0, 40.0],
        ]);
        let scores = dyn2(vec![vec![0.8], vec![0.9], vec![0.7]]);

        let out = select_best_boxes_by_nms(&boxes, &scores, None, &params(0.5, 0.45)).unwrap();
        assert_eq!(out.shape(), &[2, 6]);
        assert_eq!(out[[0, 0]], 102.0);
        assert_eq!(out[[0, 4]], 0.9);
        assert_eq!(out[[1, 0]], 300.0);
        assert_eq!(out[[1, 5]], 0.0);
    }

    /// Test scores equal to the threshold are dropped
    #[test]
    fn test_nms_score_threshold_is_strict() {
        let boxes = dyn2(vec![vec![10.0, 10.0, 5.0, 5.0], vec![50.0, 50.0, 5.0, 5.0]]);
        let scores = dyn2(vec![vec![0.45], vec![0.46]]);

        let out = select_best_boxes_by_nms(&boxes, &scores, None, &params(0.5, 0.45)).unwrap();
        assert_eq!(out.shape(), &[1, 6]);
        assert_eq!(out[[0, 4]], 0.46);
    }

    /// Test a box at exactly the IoU threshold is kept
    #[test]
    fn test_nms_iou_threshold_is_strict() {
        // Same height, shifted so intersection / union == 0.5 exactly
        let boxes = dyn2(vec![vec![0.0, 0.0, 30.0, 10.0], vec![10.0, 0.0, 30.0, 10.0]]);
        let scores = dyn2(vec![vec![0.9], vec![0.8]]);

        let out = select_best_boxes_by_nms(&boxes, &scores, None, &params(0.5, 0.1)).unwrap();
        assert_eq!(out.shape()[0], 2);
    }

    #[test]
    fn test_nms_caps_boxes_per_class() {
        let boxes = dyn2((0..5).map(|i| vec![i as f32 * 100.0, 0.0, 10.0, 10.0]).collect());
        let scores = dyn2((0..5).map(|i| vec![0.5 + i as f32 * 0.1]).collect());
        let p = NmsParams {
            max_boxes_per_class: 2,
            ..params(0.5, 0.1)
        };

        let out = select_best_boxes_by_nms(&boxes, &scores, None, &p).unwrap();
        assert_eq!(out.shape(), &[2, 6]);
        assert_eq!(out[[0, 0]], 400.0);
        assert_eq!(out[[1, 0]], 300.0);
    }

    /// Test rows are grouped by class and mask data is appended
    #[test]
    fn test_nms_orders_by_class_and_carries_mask() {
        let boxes = dyn2(vec![vec![0.0, 0.0, 10.0, 10.0], vec![100.0, 0.0, 10.0, 10.0]]);
        let scores = dyn2(vec![vec![0.2, 0.9], vec![0.8, 0.1]]);
        let mask = dyn2(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);

        let out =
            select_best_boxes_by_nms(&boxes, &scores, Some(&mask), &params(0.5, 0.5)).unwrap();
        assert_eq!(out.shape(), &[2, 9]);
        assert_eq!(out[[0, 5]], 0.0);
        assert_eq!(out[[0, 0]], 100.0);
        assert_eq!(mask_of(&out, 0), vec![4.0, 5.0, 6.0]);
        assert_eq!(out[[1, 5]], 1.0);
        assert_eq!(mask_of(&out, 1), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_nms_empty_selection() {
        let boxes = dyn2(vec![vec![0.0, 0.0, 10.0, 10.0]]);
        let scores = dyn2(vec![vec![0.1]]);
        let mask = dyn2(vec![vec![0.0; 15]]);

        let out =
            select_best_boxes_by_nms(&boxes, &scores, Some(&mask), &params(0.5, 0.45)).unwrap();
        assert_eq!(out.shape(), &[0, 21]);
    }

    /// Test coordinates map back through the letterbox, confidences untouched
    #[test]
    fn test_scale_boxes_and_keypoints() {
        let transform = LetterboxTransform::from_shapes((720, 1280), (360, 640), (640, 640));
        let mut row = vec![320.0, 320.0, 100.0, 50.0, 0.9, 0.0];
        for k in 0..5 {
            row.extend([300.0 + k as f32, 300.0, 0.8]);
        }
        let nms = dyn2(vec![row]);

        let out = scale_boxes_and_keypoints(&nms, &transform, 5).unwrap();
        assert_eq!(out[[0, 0]], 640.0);
        assert_eq!(out[[0, 1]], 360.0);
        assert_eq!(out[[0, 2]], 200.0);
        assert_eq!(out[[0, 3]], 100.0);
        assert_eq!(out[[0, 4]], 0.9);
        assert_eq!(out[[0, 5]], 0.0);
        assert_eq!(out[[0, 6]], 600.0);
        assert_eq!(out[[0, 7]], 320.0);
        assert_eq!(out[[0, 8]], 0.8);
        assert_eq!(out[[0, 9]], 602.0);
    }

    #[test]
    fn test_scale_rejects_wrong_width() {
        let transform = LetterboxTransform::from_shapes((640, 640), (640, 640), (640, 640));
        let nms = Array2::<f32>::zeros((1, 20)).into_dyn();
        assert!(scale_boxes_and_keypoints(&nms, &transform, 5).is_err());
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = array![10.0f32, 10.0, 4.0, 4.0];
        let b = array![50.0f32, 50.0, 4.0, 4.0];
        assert_eq!(iou(a.view(), a.view()), 1.0);
        assert_eq!(iou(a.view(), b.view()), 0.0);
    }
}
