//! Declarative pre/post-processing pipeline around a detection model.
//!
//! A [`PipelineSpec`] is an ordered list of named steps before and after the
//! model, with explicit links between step outputs and later step inputs. It
//! is built once through [`PrePostProcessor`], validated by static shape
//! inference and then serialized as a JSON manifest next to the model.

pub mod errors;
pub mod shape;
pub mod spec;
pub mod step;
pub mod tensor;

pub use errors::PipelineError;
pub use shape::{Dim, ValueInfo};
pub use spec::{
    ModelSignature, NamedValue, PipelineSpec, PrePostProcessor, Source, create_named_value,
};
pub use step::{IoMapEntry, Layout, ResizePolicy, Step, StepKind};
pub use tensor::{DType, Tensor};

pub type Result<T> = std::result::Result<T, PipelineError>;
