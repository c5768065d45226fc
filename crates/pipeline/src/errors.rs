use crate::tensor::DType;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Manifest error: {0}")]
    ManifestError(#[from] serde_json::Error),

    #[error("Unsupported manifest version {found} (expected {expected})")]
    UnsupportedVersion { expected: u32, found: u32 },

    #[error("Duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("Step '{consumer}' references unknown producer '{producer}'")]
    UnknownProducer { consumer: String, producer: String },

    #[error("Step '{consumer}' references '{producer}', which does not run before it")]
    ForwardReference { consumer: String, producer: String },

    #[error("Producer '{producer}' has {outputs} output(s), index {index} requested")]
    ProducerIndexOutOfRange {
        producer: String,
        index: usize,
        outputs: usize,
    },

    #[error("Step '{consumer}' has {inputs} input(s), index {index} requested")]
    ConsumerIndexOutOfRange {
        consumer: String,
        index: usize,
        inputs: usize,
    },

    #[error("Step '{consumer}' binds input {index} more than once")]
    DuplicateConsumerInput { consumer: String, index: usize },

    #[error("Outputs {outputs:?} of step '{producer}' are never consumed")]
    UnconsumedOutputs {
        producer: String,
        outputs: Vec<usize>,
    },

    #[error("Step '{consumer}' input {index} is not connected")]
    UnboundInput { consumer: String, index: usize },

    #[error("Step '{step}' expects {expected} data, got {found}")]
    DTypeMismatch {
        step: String,
        expected: DType,
        found: DType,
    },

    #[error("Step '{step}' expects rank {expected}, got rank {found}")]
    RankMismatch {
        step: String,
        expected: usize,
        found: usize,
    },

    #[error("Step '{step}': {detail}")]
    ShapeMismatch { step: String, detail: String },

    #[error("Step '{step}' has an invalid parameter: {detail}")]
    InvalidParameter { step: String, detail: String },

    #[error("Model input expects {expected}, pipeline produces {found}")]
    ModelInputMismatch { expected: String, found: String },

    #[error("Pipeline has no graph input")]
    MissingInput,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = PipelineError::UnknownProducer {
            consumer: "ScaleNMSBoundingBoxesAndKeyPoints".to_string(),
            producer: "Resized".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Step 'ScaleNMSBoundingBoxesAndKeyPoints' references unknown producer 'Resized'",
        );

        let err = PipelineError::DTypeMismatch {
            step: "ImageBytesToFloat".to_string(),
            expected: DType::U8,
            found: DType::F32,
        };
        assert_eq!(
            err.to_string(),
            "Step 'ImageBytesToFloat' expects u8 data, got f32"
        );

        let err = PipelineError::UnsupportedVersion {
            expected: 1,
            found: 7,
        };
        assert_eq!(
            err.to_string(),
            "Unsupported manifest version 7 (expected 1)"
        );

        let err = PipelineError::UnconsumedOutputs {
            producer: "Split".to_string(),
            outputs: vec![1, 2],
        };
        assert_eq!(
            err.to_string(),
            "Outputs [1, 2] of step 'Split' are never consumed"
        );

        let err = PipelineError::UnboundInput {
            consumer: "SelectBestBoundingBoxesByNMS".to_string(),
            index: 2,
        };
        assert_eq!(
            err.to_string(),
            "Step 'SelectBestBoundingBoxesByNMS' input 2 is not connected"
        );
    }

    #[test]
    fn test_error_conversion_from_io_error() {
        fn returns_io_error() -> Result<(), io::Error> {
            Err(io::Error::new(io::ErrorKind::NotFound, "manifest missing"))
        }

        fn uses_question_mark() -> Result<(), PipelineError> {
            returns_io_error()?;
            Ok(())
        }

        match uses_question_mark().unwrap_err() {
            PipelineError::IoError(e) => {
                assert_eq!(e.kind(), io::ErrorKind::NotFound);
                assert_eq!(e.to_string(), "manifest missing");
            }
            other => panic!("Expected IoError variant, got {other:?}"),
        }
    }

    #[test]
    fn test_error_conversion_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ not json").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(matches!(err, PipelineError::ManifestError(_)));
        assert!(err.to_string().starts_with("Manifest error:"));
    }
}
