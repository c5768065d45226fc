use crate::{
    backend::{
        InferenceBackend,
        ort::{OrtBackend, OrtOptions},
    },
    config::InferenceConfig,
    detection::{DetectionRecord, records_from_tensor},
    executor::PipelineExecutor,
};
use anyhow::Context;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use pipeline::{PipelineSpec, StepKind};
use std::path::Path;
use std::time::Instant;

struct DetectorMetrics {
    duration: Histogram<f64>,
    images: Counter<u64>,
    detections: Counter<u64>,
}

fn init_metrics(meter_name: &'static str) -> DetectorMetrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.005, 0.01, 0.02, 0.03, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 2.0,
    ];
    DetectorMetrics {
        duration: meter
            .f64_histogram("facemark_inference_duration_seconds")
            .with_description("Time to run the full pipeline on one image")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
        images: meter
            .u64_counter("facemark_images_total")
            .with_description("Total images processed")
            .build(),
        detections: meter
            .u64_counter("facemark_detections_total")
            .with_description("Total faces detected")
            .build(),
    }
}

/// Keypoint count of a pipeline ending in a rescale step.
fn key_points_of(spec: &PipelineSpec) -> anyhow::Result<usize> {
    match spec.post_processing.last().map(|s| &s.kind) {
        Some(StepKind::ScaleNmsBoundingBoxesAndKeyPoints { num_key_points, .. }) => {
            Ok(*num_key_points)
        }
        _ => anyhow::bail!("pipeline does not end with a keypoint rescale step"),
    }
}

/// Face detector running an augmented pipeline on encoded images.
pub struct FaceDetector<B: InferenceBackend> {
    executor: PipelineExecutor<B>,
    num_key_points: usize,
    metrics: DetectorMetrics,
}

impl FaceDetector<OrtBackend> {
    /// Load the manifest and its model into ONNX Runtime.
    pub fn load(manifest: &Path, options: &OrtOptions) -> anyhow::Result<Self> {
        let spec = PipelineSpec::load(manifest)
            .with_context(|| format!("failed to load manifest {}", manifest.display()))?;
        let backend = OrtBackend::load_model_with_options(&spec.model.path, options)?;
        Self::new(spec, backend)
    }

    pub fn from_config(config: &InferenceConfig) -> anyhow::Result<Self> {
        Self::load(&config.manifest_path, &config.ort_options())
    }
}

impl<B: InferenceBackend> FaceDetector<B> {
    pub fn new(spec: PipelineSpec, backend: B) -> anyhow::Result<Self> {
        let num_key_points = key_points_of(&spec)?;
        let executor = PipelineExecutor::new(spec, backend)?;
        Ok(Self {
            executor,
            num_key_points,
            metrics: init_metrics("facemark"),
        })
    }

    pub fn spec(&self) -> &PipelineSpec {
        self.executor.spec()
    }

    /// Detect faces in an encoded jpg/png image.
    pub fn detect(&mut self, image_bytes: &[u8]) -> anyhow::Result<Vec<DetectionRecord>> {
        let _span = tracing::info_span!("detect_faces", bytes = image_bytes.len()).entered();
        let start = Instant::now();

        let result = self
            .executor
            .run_bytes(image_bytes)
            .and_then(|output| records_from_tensor(&output.into_f32("output")?, self.num_key_points));

        let status = if result.is_ok() { "ok" } else { "error" };
        self.metrics
            .duration
            .record(start.elapsed().as_secs_f64(), &[KeyValue::new("status", status)]);
        self.metrics.images.add(1, &[KeyValue::new("status", status)]);

        let records = result?;
        self.metrics.detections.add(records.len() as u64, &[]);
        tracing::debug!(
            detections = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Faces detected"
        );
        Ok(records)
    }
}
