use crate::config::{DEFAULT_INPUT_SIZE, DEFAULT_LETTERBOX_FILL};
use crate::decode::decode_bgr;
use crate::transform::LetterboxTransform;
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::{Array3, ArrayD, Axis, Ix3, s};
use pipeline::{Layout, ResizePolicy, step::resized_dims};

fn to_array3<T: Clone>(image: &ArrayD<T>) -> anyhow::Result<Array3<T>> {
    if image.ndim() != 3 {
        anyhow::bail!("expected a 3-D image, got shape {:?}", image.shape());
    }
    Ok(image.clone().into_dimensionality::<Ix3>()?)
}

/// `[H, W, C]` to `[C, H, W]`.
pub fn channels_last_to_first<T: Clone>(image: &ArrayD<T>) -> anyhow::Result<ArrayD<T>> {
    let hwc = to_array3(image)?;
    Ok(hwc
        .permuted_axes([2, 0, 1])
        .as_standard_layout()
        .into_owned()
        .into_dyn())
}

/// `[C, H, W]` to `[H, W, C]`.
pub fn channels_first_to_last<T: Clone>(image: &ArrayD<T>) -> anyhow::Result<ArrayD<T>> {
    let chw = to_array3(image)?;
    Ok(chw
        .permuted_axes([1, 2, 0])
        .as_standard_layout()
        .into_owned()
        .into_dyn())
}

fn to_hwc(image: &ArrayD<u8>, layout: Layout) -> anyhow::Result<Array3<u8>> {
    let hwc = match layout {
        Layout::Hwc => image.clone(),
        Layout::Chw => channels_first_to_last(image)?,
    };
    to_array3(&hwc)
}

fn from_hwc(hwc: Array3<u8>, layout: Layout) -> anyhow::Result<ArrayD<u8>> {
    let hwc = hwc.into_dyn();
    match layout {
        Layout::Hwc => Ok(hwc),
        Layout::Chw => channels_last_to_first(&hwc),
    }
}

/// Bilinear resize of a 3-channel image toward `target` (height, width).
pub fn resize(
    image: &ArrayD<u8>,
    layout: Layout,
    target: (usize, usize),
    policy: ResizePolicy,
) -> anyhow::Result<ArrayD<u8>> {
    let _s = span!("resize");

    let hwc = to_hwc(image, layout)?;
    let (height, width, channels) = hwc.dim();
    if channels != 3 {
        anyhow::bail!("resize expects 3 channels, got {channels}");
    }
    if height == 0 || width == 0 {
        anyhow::bail!("cannot resize an empty image ({width}x{height})");
    }

    let (new_height, new_width) = resized_dims((height, width), target, policy);
    tracing::trace!(
        width,
        height,
        new_width,
        new_height,
        "Resizing image"
    );
    if (new_height, new_width) == (height, width) {
        return from_hwc(hwc, layout);
    }

    let pixels = hwc.as_standard_layout();
    let pixels = pixels
        .as_slice()
        .ok_or_else(|| anyhow::anyhow!("image buffer is not contiguous"))?;
    let src = ImageRef::new(width as u32, height as u32, pixels, PixelType::U8x3)?;
    let mut resized = Image::new(new_width as u32, new_height as u32, PixelType::U8x3);

    Resizer::new().resize(
        &src,
        &mut resized,
        &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
    )?;

    let out = Array3::from_shape_vec((new_height, new_width, 3), resized.buffer().to_vec())?;
    from_hwc(out, layout)
}

/// Pad an image to `target` (height, width), centering it. The odd pixel of
/// padding goes to the bottom/right.
pub fn letterbox(
    image: &ArrayD<u8>,
    layout: Layout,
    target: (usize, usize),
    fill_value: u8,
) -> anyhow::Result<ArrayD<u8>> {
    let _s = span!("letterbox");

    let img = to_array3(image)?;
    let (h_ax, w_ax, c_ax) = layout.axes();
    let (height, width, channels) = (img.shape()[h_ax], img.shape()[w_ax], img.shape()[c_ax]);
    let (target_h, target_w) = target;

    if height > target_h || width > target_w {
        anyhow::bail!(
            "image {width}x{height} does not fit letterbox target {target_w}x{target_h}"
        );
    }

    let top = (target_h - height) / 2;
    let left = (target_w - width) / 2;

    let mut out = match layout {
        Layout::Chw => Array3::from_elem((channels, target_h, target_w), fill_value),
        Layout::Hwc => Array3::from_elem((target_h, target_w, channels), fill_value),
    };
    match layout {
        Layout::Chw => out
            .slice_mut(s![.., top..top + height, left..left + width])
            .assign(&img),
        Layout::Hwc => out
            .slice_mut(s![top..top + height, left..left + width, ..])
            .assign(&img),
    }

    Ok(out.into_dyn())
}

/// Pixel values to `f32` in `[0, 1]`.
pub fn bytes_to_float(image: &ArrayD<u8>) -> ArrayD<f32> {
    image.mapv(|v| v as f32 / 255.0)
}

/// Insert unit axes at the given positions of the output.
pub fn unsqueeze<T>(tensor: ArrayD<T>, axes: &[usize]) -> anyhow::Result<ArrayD<T>> {
    let mut sorted = axes.to_vec();
    sorted.sort_unstable();
    let mut out = tensor;
    for axis in sorted {
        if axis > out.ndim() {
            anyhow::bail!("unsqueeze axis {axis} out of range for rank {}", out.ndim());
        }
        out = out.insert_axis(Axis(axis));
    }
    Ok(out)
}

/// Intermediate images of the canonical chain, kept for coordinate mapping.
#[derive(Debug)]
pub struct PreprocessResult {
    /// `[1, 3, H, W]` float input for the model
    pub input: ArrayD<f32>,
    /// Decoded BGR image in CHW layout
    pub original: ArrayD<u8>,
    pub resized: ArrayD<u8>,
    pub letterboxed: ArrayD<u8>,
    pub transform: LetterboxTransform,
}

/// Runs decode, CHW conversion, not-larger resize, letterbox, float
/// conversion and batch expansion in one call.
pub struct CpuPreProcessor {
    pub input_size: (usize, usize),
    pub fill_value: u8,
}

impl CpuPreProcessor {
    pub fn new(input_size: (usize, usize)) -> Self {
        Self {
            input_size,
            fill_value: DEFAULT_LETTERBOX_FILL,
        }
    }

    pub fn preprocess(&self, bytes: &[u8]) -> anyhow::Result<PreprocessResult> {
        let _s = span!("preprocess_image");

        let bgr = decode_bgr(bytes)?.into_dyn();
        let original = channels_last_to_first(&bgr)?;
        let resized = resize(
            &original,
            Layout::Chw,
            self.input_size,
            ResizePolicy::NotLarger,
        )?;
        let letterboxed = letterbox(&resized, Layout::Chw, self.input_size, self.fill_value)?;
        let input = unsqueeze(bytes_to_float(&letterboxed), &[0])?;

        let hw = |a: &ArrayD<u8>| (a.shape()[1], a.shape()[2]);
        let transform =
            LetterboxTransform::from_shapes(hw(&original), hw(&resized), hw(&letterboxed));

        Ok(PreprocessResult {
            input,
            original,
            resized,
            letterboxed,
            transform,
        })
    }
}

impl Default for CpuPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use ndarray::IxDyn;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    /// Test HWC <-> CHW conversions are inverse
    #[test]
    fn test_layout_conversion_round_trip() {
        let hwc = ArrayD::from_shape_vec(IxDyn(&[2, 2, 3]), (0u8..12).collect()).unwrap();
        let chw = channels_last_to_first(&hwc).unwrap();
        assert_eq!(chw.shape(), &[3, 2, 2]);
        assert_eq!(chw[[0, 0, 1]], 3);
        assert_eq!(chw[[2, 1, 1]], 11);
        assert_eq!(channels_first_to_last(&chw).unwrap(), hwc);
    }

    /// Test not-larger resize preserves aspect ratio
    #[test]
    fn test_resize_not_larger_preserves_aspect_ratio() {
        let image = ArrayD::from_elem(IxDyn(&[3, 600, 800]), 128u8);
        let resized = resize(&image, Layout::Chw, (640, 640), ResizePolicy::NotLarger).unwrap();
        assert_eq!(resized.shape(), &[3, 480, 640]);
        assert!(resized.iter().all(|&v| v == 128));
    }

    /// Test resize upscales small images
    #[test]
    fn test_resize_upscales_small_images() {
        let image = ArrayD::from_elem(IxDyn(&[100, 50, 3]), 7u8);
        let resized = resize(&image, Layout::Hwc, (640, 640), ResizePolicy::NotLarger).unwrap();
        assert_eq!(resized.shape(), &[640, 320, 3]);
    }

    /// Test resize rejects non-BGR inputs
    #[test]
    fn test_resize_requires_three_channels() {
        let image = ArrayD::from_elem(IxDyn(&[1, 10, 10]), 0u8);
        assert!(resize(&image, Layout::Chw, (640, 640), ResizePolicy::NotLarger).is_err());
    }

    /// Test letterbox centers the image with the fill value around it
    #[test]
    fn test_letterbox_centers_image() {
        let image = ArrayD::from_elem(IxDyn(&[3, 2, 4]), 200u8);
        let boxed = letterbox(&image, Layout::Chw, (5, 4), 0).unwrap();
        assert_eq!(boxed.shape(), &[3, 5, 4]);

        // top = (5 - 2) / 2 = 1, the odd row goes to the bottom
        for c in 0..3 {
            for x in 0..4 {
                assert_eq!(boxed[[c, 0, x]], 0);
                assert_eq!(boxed[[c, 1, x]], 200);
                assert_eq!(boxed[[c, 2, x]], 200);
                assert_eq!(boxed[[c, 3, x]], 0);
                assert_eq!(boxed[[c, 4, x]], 0);
            }
        }
    }

    /// Test letterbox in HWC layout
    #[test]
    fn test_letterbox_hwc_layout() {
        let image = ArrayD::from_elem(IxDyn(&[2, 2, 3]), 9u8);
        let boxed = letterbox(&image, Layout::Hwc, (2, 4), 114).unwrap();
        assert_eq!(boxed.shape(), &[2, 4, 3]);
        assert_eq!(boxed[[0, 0, 0]], 114);
        assert_eq!(boxed[[0, 1, 0]], 9);
        assert_eq!(boxed[[1, 2, 2]], 9);
        assert_eq!(boxed[[1, 3, 2]], 114);
    }

    /// Test letterbox refuses images larger than the target
    #[test]
    fn test_letterbox_rejects_oversized_image() {
        let image = ArrayD::from_elem(IxDyn(&[3, 700, 600]), 0u8);
        let err = letterbox(&image, Layout::Chw, (640, 640), 0).unwrap_err();
        assert!(err.to_string().contains("does not fit"));
    }

    #[test]
    fn test_bytes_to_float_scales_to_unit_range() {
        let image = ArrayD::from_shape_vec(IxDyn(&[3]), vec![0u8, 51, 255]).unwrap();
        let f = bytes_to_float(&image);
        assert_eq!(f[[0]], 0.0);
        assert!((f[[1]] - 0.2).abs() < 1e-6);
        assert_eq!(f[[2]], 1.0);
    }

    #[test]
    fn test_unsqueeze_inserts_batch_axis() {
        let t = ArrayD::<f32>::zeros(IxDyn(&[3, 4, 4]));
        let t = unsqueeze(t, &[0]).unwrap();
        assert_eq!(t.shape(), &[1, 3, 4, 4]);
        assert!(unsqueeze(t, &[9]).is_err());
    }

    /// Test the full chain on a landscape image
    #[test]
    fn test_cpu_preprocessor_chain() {
        let bytes = png_bytes(1280, 720, [10, 20, 30]);
        let result = CpuPreProcessor::default().preprocess(&bytes).unwrap();

        assert_eq!(result.input.shape(), &[1, 3, 640, 640]);
        assert_eq!(result.original.shape(), &[3, 720, 1280]);
        assert_eq!(result.resized.shape(), &[3, 360, 640]);
        assert_eq!(result.letterboxed.shape(), &[3, 640, 640]);
        assert_eq!(result.transform.offset_y, 140.0);
        assert_eq!(result.transform.ratio_x, 2.0);

        // Channel 0 is blue after BGR conversion
        let b = result.input[[0, 0, 320, 320]];
        let r = result.input[[0, 2, 320, 320]];
        assert!((b - 30.0 / 255.0).abs() < 1e-3);
        assert!((r - 10.0 / 255.0).abs() < 1e-3);

        // Padding rows stay at the fill value
        assert_eq!(result.input[[0, 0, 0, 0]], 0.0);
    }
}
