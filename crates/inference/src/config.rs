use crate::backend::ort::{ExecutionProvider, OrtOptions};
use common::{env_opt, env_or};
use std::path::PathBuf;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub environment: Environment,
    pub model_path: PathBuf,
    pub manifest_path: PathBuf,
    pub execution_provider: ExecutionProvider,
    pub intra_threads: usize,
    pub custom_ops_library: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

impl InferenceConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let execution_provider = match env_opt("EXECUTION_PROVIDER") {
            Some(value) => value.parse()?,
            None => ExecutionProvider::Cpu,
        };

        Ok(Self {
            environment,
            model_path: env_or("MODEL_PATH", PathBuf::from("models/yolov8n-face.onnx")),
            manifest_path: env_or(
                "MANIFEST_PATH",
                PathBuf::from("models/yolov8n-face.pipeline.json"),
            ),
            execution_provider,
            intra_threads: env_or("INTRA_THREADS", 4),
            custom_ops_library: env_opt("CUSTOM_OPS_LIBRARY").map(PathBuf::from),
            otel_endpoint: env_opt("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }

    pub fn ort_options(&self) -> OrtOptions {
        OrtOptions {
            provider: self.execution_provider,
            intra_threads: self.intra_threads,
            custom_ops_library: self.custom_ops_library.clone(),
        }
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            environment: Environment::Development,
            model_path: PathBuf::from("/models/model.onnx"),
            manifest_path: PathBuf::from("/models/model.pipeline.json"),
            execution_provider: ExecutionProvider::Cpu,
            intra_threads: 4,
            custom_ops_library: None,
            otel_endpoint: None,
        }
    }
}
