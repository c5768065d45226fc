use crate::errors::PipelineError;
use crate::shape::{Dim, ValueInfo};
use crate::step::Step;
use crate::tensor::DType;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_VERSION: u32 = 1;

/// A named graph input or model port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    #[serde(flatten)]
    pub info: ValueInfo,
}

/// Define a named graph value, e.g. `create_named_value("image_bytes", DType::U8, ["num_bytes"])`.
pub fn create_named_value<D: Into<Dim>>(
    name: impl Into<String>,
    dtype: DType,
    shape: impl IntoIterator<Item = D>,
) -> NamedValue {
    NamedValue {
        name: name.into(),
        info: ValueInfo::new(dtype, shape.into_iter().map(Into::into)),
    }
}

/// The model the pipeline wraps: where it lives and its declared ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    pub path: PathBuf,
    pub input: NamedValue,
    pub output: NamedValue,
}

/// Where a step input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    GraphInput(usize),
    ModelOutput(usize),
    /// Output `output` of the step at global index `step` (pre steps first,
    /// then post steps).
    Step { step: usize, output: usize },
}

/// Validated pre/post-processing pipeline around a model.
///
/// Steps are addressed by a global index: pre-processing steps come first,
/// the model runs after the last of them, post-processing steps follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub version: u32,
    pub inputs: Vec<NamedValue>,
    pub model: ModelSignature,
    pub pre_processing: Vec<Step>,
    pub post_processing: Vec<Step>,
}

impl PipelineSpec {
    pub fn num_pre(&self) -> usize {
        self.pre_processing.len()
    }

    pub fn num_steps(&self) -> usize {
        self.pre_processing.len() + self.post_processing.len()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.pre_processing.iter().chain(self.post_processing.iter())
    }

    pub fn step(&self, index: usize) -> &Step {
        if index < self.num_pre() {
            &self.pre_processing[index]
        } else {
            &self.post_processing[index - self.num_pre()]
        }
    }

    /// Source of the model's input tensor.
    pub fn model_input_source(&self) -> Source {
        match self.num_pre() {
            0 => Source::GraphInput(0),
            n => Source::Step {
                step: n - 1,
                output: 0,
            },
        }
    }

    /// Source of the pipeline's final output.
    pub fn output_source(&self) -> Source {
        match self.num_steps() {
            n if n == self.num_pre() => Source::ModelOutput(0),
            n => Source::Step {
                step: n - 1,
                output: 0,
            },
        }
    }

    /// Resolve every step input to its source.
    ///
    /// The outputs of the previous stage feed a step's inputs in order; link
    /// entries then bind (or rebind) individual inputs to named producers.
    pub fn resolve(&self) -> Result<Vec<Vec<Source>>> {
        if self.inputs.is_empty() {
            return Err(PipelineError::MissingInput);
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, step) in self.steps().enumerate() {
            if index.insert(step.name.as_str(), i).is_some() {
                return Err(PipelineError::DuplicateStep(step.name.clone()));
            }
        }

        let num_pre = self.num_pre();
        let mut bindings = Vec::with_capacity(self.num_steps());

        for (i, step) in self.steps().enumerate() {
            let arity = step.kind.num_inputs();
            let previous: Vec<Source> = if i == num_pre {
                vec![Source::ModelOutput(0)]
            } else if i == 0 {
                (0..self.inputs.len()).map(Source::GraphInput).collect()
            } else {
                (0..self.step(i - 1).kind.num_outputs())
                    .map(|output| Source::Step { step: i - 1, output })
                    .collect()
            };

            let mut slots: Vec<Option<Source>> = vec![None; arity];
            for (slot, source) in slots.iter_mut().zip(previous) {
                *slot = Some(source);
            }

            let mut bound = HashSet::new();
            for link in &step.links {
                let producer = *index.get(link.producer.as_str()).ok_or_else(|| {
                    PipelineError::UnknownProducer {
                        consumer: step.name.clone(),
                        producer: link.producer.clone(),
                    }
                })?;
                if producer >= i {
                    return Err(PipelineError::ForwardReference {
                        consumer: step.name.clone(),
                        producer: link.producer.clone(),
                    });
                }
                let outputs = self.step(producer).kind.num_outputs();
                if link.producer_idx >= outputs {
                    return Err(PipelineError::ProducerIndexOutOfRange {
                        producer: link.producer.clone(),
                        index: link.producer_idx,
                        outputs,
                    });
                }
                if link.consumer_idx >= arity {
                    return Err(PipelineError::ConsumerIndexOutOfRange {
                        consumer: step.name.clone(),
                        index: link.consumer_idx,
                        inputs: arity,
                    });
                }
                if !bound.insert(link.consumer_idx) {
                    return Err(PipelineError::DuplicateConsumerInput {
                        consumer: step.name.clone(),
                        index: link.consumer_idx,
                    });
                }
                slots[link.consumer_idx] = Some(Source::Step {
                    step: producer,
                    output: link.producer_idx,
                });
            }

            let sources = slots
                .into_iter()
                .enumerate()
                .map(|(index, slot)| {
                    slot.ok_or_else(|| PipelineError::UnboundInput {
                        consumer: step.name.clone(),
                        index,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            bindings.push(sources);
        }

        self.check_consumed(&bindings)?;
        Ok(bindings)
    }

    /// Outputs a step produces beyond what the next stage takes by default
    /// must be picked up by a link, or they would be silently dropped.
    fn check_consumed(&self, bindings: &[Vec<Source>]) -> Result<()> {
        let last = self.num_steps().saturating_sub(1);
        for (i, step) in self.steps().enumerate() {
            // the model and the graph output each take a single value
            let taken = if i + 1 == self.num_pre() || i == last {
                1
            } else {
                self.step(i + 1).kind.num_inputs()
            };
            let unconsumed: Vec<usize> = (taken..step.kind.num_outputs())
                .filter(|&output| {
                    !bindings
                        .iter()
                        .flatten()
                        .any(|s| *s == Source::Step { step: i, output })
                })
                .collect();
            if !unconsumed.is_empty() {
                return Err(PipelineError::UnconsumedOutputs {
                    producer: step.name.clone(),
                    outputs: unconsumed,
                });
            }
        }
        Ok(())
    }

    /// Strict static shape inference over the whole pipeline.
    ///
    /// Returns the output types of every step, indexed like [`Self::step`].
    pub fn infer_shapes(&self) -> Result<Vec<Vec<ValueInfo>>> {
        let bindings = self.resolve()?;
        let mut outputs: Vec<Vec<ValueInfo>> = Vec::with_capacity(self.num_steps());

        for (i, (step, sources)) in self.steps().zip(&bindings).enumerate() {
            if i == self.num_pre() {
                self.check_model_input(&outputs)?;
            }
            let inputs = sources
                .iter()
                .map(|s| self.lookup(*s, &outputs))
                .collect::<Vec<_>>();
            let produced = step.kind.infer(&step.name, &inputs)?;
            tracing::trace!(
                step = %step.name,
                outputs = ?produced.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "Inferred step output"
            );
            outputs.push(produced);
        }
        if self.post_processing.is_empty() {
            self.check_model_input(&outputs)?;
        }

        Ok(outputs)
    }

    /// Type of the pipeline's final output.
    pub fn output_info(&self) -> Result<ValueInfo> {
        let outputs = self.infer_shapes()?;
        Ok(self.lookup(self.output_source(), &outputs))
    }

    fn check_model_input(&self, outputs: &[Vec<ValueInfo>]) -> Result<()> {
        let produced = self.lookup(self.model_input_source(), outputs);
        if !produced.compatible(&self.model.input.info) {
            return Err(PipelineError::ModelInputMismatch {
                expected: self.model.input.info.to_string(),
                found: produced.to_string(),
            });
        }
        Ok(())
    }

    fn lookup(&self, source: Source, outputs: &[Vec<ValueInfo>]) -> ValueInfo {
        match source {
            Source::GraphInput(k) => self.inputs[k].info.clone(),
            Source::ModelOutput(_) => self.model.output.info.clone(),
            Source::Step { step, output } => outputs[step][output].clone(),
        }
    }

    /// Write the manifest as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), "Pipeline manifest saved");
        Ok(())
    }

    /// Read and re-validate a manifest. A relative model path is resolved
    /// against the manifest's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut spec: PipelineSpec = serde_json::from_str(&contents)?;

        if spec.version != MANIFEST_VERSION {
            return Err(PipelineError::UnsupportedVersion {
                expected: MANIFEST_VERSION,
                found: spec.version,
            });
        }

        if spec.model.path.is_relative() {
            if let Some(dir) = path.parent() {
                spec.model.path = dir.join(&spec.model.path);
            }
        }

        spec.infer_shapes()?;
        Ok(spec)
    }
}

/// Builder that appends pre- and post-processing steps around a model.
#[derive(Debug, Clone)]
pub struct PrePostProcessor {
    inputs: Vec<NamedValue>,
    pre_processing: Vec<Step>,
    post_processing: Vec<Step>,
}

impl PrePostProcessor {
    pub fn new(inputs: Vec<NamedValue>) -> Self {
        Self {
            inputs,
            pre_processing: Vec::new(),
            post_processing: Vec::new(),
        }
    }

    pub fn add_pre_processing<I, S>(&mut self, steps: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        self.pre_processing.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn add_post_processing<I, S>(&mut self, steps: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        self.post_processing.extend(steps.into_iter().map(Into::into));
        self
    }

    /// Attach the steps to `model` and validate the result.
    pub fn run(self, model: ModelSignature) -> Result<PipelineSpec> {
        let spec = PipelineSpec {
            version: MANIFEST_VERSION,
            inputs: self.inputs,
            model,
            pre_processing: self.pre_processing,
            post_processing: self.post_processing,
        };
        let output = spec.output_info()?;
        tracing::debug!(
            steps = spec.num_steps(),
            output = %output,
            "Pipeline validated"
        );
        Ok(spec)
    }
}
