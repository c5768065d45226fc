use crate::errors::PipelineError;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a value flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    F32,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::U8 => f.write_str("u8"),
            DType::F32 => f.write_str("f32"),
        }
    }
}

/// Dynamically shaped tensor produced or consumed by a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    U8(ArrayD<u8>),
    F32(ArrayD<f32>),
}

impl Tensor {
    pub fn dtype(&self) -> DType {
        match self {
            Tensor::U8(_) => DType::U8,
            Tensor::F32(_) => DType::F32,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::U8(a) => a.shape(),
            Tensor::F32(a) => a.shape(),
        }
    }

    pub fn as_u8(&self, step: &str) -> Result<&ArrayD<u8>, PipelineError> {
        match self {
            Tensor::U8(a) => Ok(a),
            other => Err(PipelineError::DTypeMismatch {
                step: step.to_string(),
                expected: DType::U8,
                found: other.dtype(),
            }),
        }
    }

    pub fn as_f32(&self, step: &str) -> Result<&ArrayD<f32>, PipelineError> {
        match self {
            Tensor::F32(a) => Ok(a),
            other => Err(PipelineError::DTypeMismatch {
                step: step.to_string(),
                expected: DType::F32,
                found: other.dtype(),
            }),
        }
    }

    pub fn into_f32(self, step: &str) -> Result<ArrayD<f32>, PipelineError> {
        match self {
            Tensor::F32(a) => Ok(a),
            other => Err(PipelineError::DTypeMismatch {
                step: step.to_string(),
                expected: DType::F32,
                found: other.dtype(),
            }),
        }
    }
}

impl From<ArrayD<u8>> for Tensor {
    fn from(value: ArrayD<u8>) -> Self {
        Tensor::U8(value)
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(value: ArrayD<f32>) -> Self {
        Tensor::F32(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_tensor_reports_dtype_and_shape() {
        let t: Tensor = ArrayD::<u8>::zeros(IxDyn(&[4, 3, 3])).into();
        assert_eq!(t.dtype(), DType::U8);
        assert_eq!(t.shape(), &[4, 3, 3]);
    }

    #[test]
    fn test_wrong_dtype_access_names_the_step() {
        let t: Tensor = ArrayD::<f32>::zeros(IxDyn(&[2])).into();
        let err = t.as_u8("LetterBox").unwrap_err();
        assert_eq!(err.to_string(), "Step 'LetterBox' expects u8 data, got f32");
        assert!(t.as_f32("LetterBox").is_ok());
    }
}
