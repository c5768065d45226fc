use super::InferenceBackend;
use ndarray::ArrayD;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    tensor::TensorElementType,
    value::{TensorRef, ValueType},
};
use pipeline::{DType, Dim, ModelSignature, NamedValue, create_named_value};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

impl FromStr for ExecutionProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(ExecutionProvider::Cpu),
            "cuda" | "gpu" => Ok(ExecutionProvider::Cuda),
            other => anyhow::bail!("unknown execution provider '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrtOptions {
    pub provider: ExecutionProvider,
    pub intra_threads: usize,
    /// Shared library with custom operators to register before loading
    pub custom_ops_library: Option<PathBuf>,
}

impl Default for OrtOptions {
    fn default() -> Self {
        Self {
            provider: ExecutionProvider::Cpu,
            intra_threads: 4,
            custom_ops_library: None,
        }
    }
}

pub struct OrtBackend {
    session: Session,
    signature: ModelSignature,
}

impl OrtBackend {
    /// Load model with the given session options
    pub fn load_model_with_options(path: &Path, options: &OrtOptions) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(options.intra_threads)?;

        match options.provider {
            #[cfg(feature = "cuda")]
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            #[cfg(not(feature = "cuda"))]
            ExecutionProvider::Cuda => {
                anyhow::bail!("CUDA execution provider requested but the `cuda` feature is disabled");
            }
            ExecutionProvider::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        if let Some(library) = &options.custom_ops_library {
            builder = register_custom_ops(builder, library)?;
        }

        let session = builder.commit_from_file(path)?;
        let signature = read_signature(&session, path)?;

        tracing::info!(
            path = %path.display(),
            input = %signature.input.info,
            output = %signature.output.info,
            "Model loaded"
        );
        Ok(Self { session, signature })
    }
}

fn register_custom_ops(
    builder: ort::session::builder::SessionBuilder,
    library: &Path,
) -> anyhow::Result<ort::session::builder::SessionBuilder> {
    tracing::info!(library = %library.display(), "Registering custom operator library");
    let library = library
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("custom op library path is not valid UTF-8"))?;
    Ok(builder.with_operator_library(library)?)
}

fn read_signature(session: &Session, path: &Path) -> anyhow::Result<ModelSignature> {
    let input = session
        .inputs
        .first()
        .ok_or_else(|| anyhow::anyhow!("model declares no inputs"))?;
    let output = session
        .outputs
        .first()
        .ok_or_else(|| anyhow::anyhow!("model declares no outputs"))?;

    Ok(ModelSignature {
        path: path.to_path_buf(),
        input: port(&input.name, &input.input_type)?,
        output: port(&output.name, &output.output_type)?,
    })
}

fn port(name: &str, value_type: &ValueType) -> anyhow::Result<NamedValue> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        anyhow::bail!("model port '{name}' is not a tensor");
    };
    let dtype = match ty {
        TensorElementType::Float32 => DType::F32,
        TensorElementType::Uint8 => DType::U8,
        other => anyhow::bail!("model port '{name}' has unsupported element type {other:?}"),
    };
    let dims = shape
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            if d < 0 {
                Dim::symbolic(format!("{name}_dim{i}"))
            } else {
                Dim::Fixed(d as usize)
            }
        })
        .collect::<Vec<_>>();
    Ok(create_named_value(name, dtype, dims))
}

impl InferenceBackend for OrtBackend {
    fn load_model(path: &Path) -> anyhow::Result<Self> {
        Self::load_model_with_options(path, &OrtOptions::default())
    }

    fn signature(&self) -> &ModelSignature {
        &self.signature
    }

    fn infer(&mut self, input: &ArrayD<f32>) -> anyhow::Result<ArrayD<f32>> {
        let input = input.as_standard_layout();
        let outputs = self.session.run(ort::inputs![
            self.signature.input.name.as_str() => TensorRef::from_array_view(input.view())?
        ])?;

        let output = outputs[self.signature.output.name.as_str()].try_extract_array::<f32>()?;
        Ok(output.into_owned())
    }
}
