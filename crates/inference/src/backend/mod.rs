use ndarray::ArrayD;
use pipeline::ModelSignature;
use std::path::Path;

pub mod ort;

/// A loaded detection model.
pub trait InferenceBackend {
    fn load_model(path: &Path) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Declared input and output ports of the loaded model.
    fn signature(&self) -> &ModelSignature;

    /// Run the model on a single `f32` input tensor, returning its first output.
    fn infer(&mut self, input: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>>;
}
