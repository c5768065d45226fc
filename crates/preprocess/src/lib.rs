pub mod config;
pub mod cpu;
pub mod decode;
pub mod transform;

pub use config::{DEFAULT_INPUT_SIZE, DEFAULT_LETTERBOX_FILL, MAX_DETECTION_SIDE};
pub use cpu::{
    CpuPreProcessor, PreprocessResult, bytes_to_float, channels_first_to_last,
    channels_last_to_first, letterbox, resize, unsqueeze,
};
pub use decode::{decode_bgr, fit_within};
pub use transform::LetterboxTransform;
