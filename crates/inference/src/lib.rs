pub mod augment;
pub mod backend;
pub mod config;
pub mod detection;
pub mod detector;
pub mod executor;
pub mod processing;

// Re-export commonly used types for convenience
pub use augment::{FACE_INPUT_SIZE, FACE_KEY_POINTS, augment_model, face_pipeline, inspect_model};
pub use backend::{
    InferenceBackend,
    ort::{ExecutionProvider, OrtBackend, OrtOptions},
};
pub use config::InferenceConfig;
pub use detection::{DetectionRecord, Keypoint, records_from_tensor};
pub use detector::FaceDetector;
pub use executor::PipelineExecutor;
