use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD, Axis};

use colibri_base::ArrayValue;

use crate::config::RuntimeConfig;
use crate::error::InferError;
use crate::input::{PredictInput, total_rows};
use crate::style::{AnomalyDetector, Classifier, Container, Predictor, TaskStyle, Transformer};

/// Runs a fixed-batch container over inputs of any length by splitting rows
/// into `batch_size` chunks and concatenating the per-chunk results.
///
/// The final chunk always takes the remainder route, even when the row count
/// divides evenly, and its size must match the remainder batch size exactly.
/// Without a distinct remainder container the base doubles as the remainder,
/// sized at the base batch size, so only row counts that are a multiple of
/// the batch size pass the final-chunk check. An input of exactly one batch
/// skips splitting and runs on the base container directly.
pub struct BatchedContainer<C> {
    base: C,
    remainder: Option<C>,
    batch_size: usize,
    remainder_size: usize,
}

impl<C: Container> BatchedContainer<C> {
    /// The base handles every chunk, including the final one, so the row
    /// count must be a single batch or a multiple of the batch size.
    pub fn new(base: C) -> Result<Self, InferError> {
        let batch_size = base.batch_size().ok_or_else(|| {
            InferError::Config("batched execution requires a base batch size".into())
        })?;
        Ok(Self { base, remainder: None, batch_size, remainder_size: batch_size })
    }

    /// Pair a base container with a second one sized for the final chunk.
    pub fn with_remainder(base: C, remainder: C) -> Result<Self, InferError> {
        let batch_size = base.batch_size().ok_or_else(|| {
            InferError::Config("batched execution requires a base batch size".into())
        })?;
        let remainder_size = remainder.batch_size().ok_or_else(|| {
            InferError::Config("the remainder container requires a batch size".into())
        })?;
        Ok(Self { base, remainder: Some(remainder), batch_size, remainder_size })
    }

    pub fn base(&self) -> &C {
        &self.base
    }

    pub fn remainder(&self) -> Option<&C> {
        self.remainder.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn remainder_size(&self) -> usize {
        self.remainder_size
    }

    pub fn style(&self) -> TaskStyle {
        self.base.style()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.base.config()
    }

    /// Persist the base container; the remainder is rebuilt by the caller.
    pub fn save(&self, location: &Path) -> Result<PathBuf, InferError> {
        self.base.save(location)
    }

    /// Split the rows and let `call` run each chunk on its container.
    ///
    /// Panics when the final chunk's row count does not match the remainder
    /// batch size.
    fn run_chunks<T>(
        &mut self,
        input: PredictInput,
        mut call: impl FnMut(&mut C, Vec<ArrayValue>) -> Result<T, InferError>,
    ) -> Result<Vec<T>, InferError> {
        let columns = input.into_columns();
        let total = total_rows(&columns)?;
        if total == self.batch_size {
            return Ok(vec![call(&mut self.base, columns)?]);
        }
        let full = total / self.batch_size;
        let iterations = (full + usize::from(total % self.batch_size != 0)).max(1);
        let mut results = Vec::with_capacity(iterations);
        for index in 0..iterations {
            let start = index * self.batch_size;
            let end = total.min(start + self.batch_size);
            let chunk: Vec<ArrayValue> =
                columns.iter().map(|column| column.slice_rows(start, end)).collect();
            let target = if index + 1 == iterations {
                let rows = end - start;
                assert!(
                    rows == self.remainder_size,
                    "final chunk has {rows} rows but the remainder container is sized for {}",
                    self.remainder_size
                );
                self.remainder.as_mut().unwrap_or(&mut self.base)
            } else {
                &mut self.base
            };
            results.push(call(target, chunk)?);
        }
        Ok(results)
    }
}

impl<C: Transformer> BatchedContainer<C> {
    pub fn transform(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<ArrayD<f32>, InferError> {
        concat_dyn(self.transform_chunks(input)?)
    }

    pub fn transform_chunks(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Vec<ArrayD<f32>>, InferError> {
        self.run_chunks(input.into(), |container, columns| container.transform(columns))
    }
}

impl<C: Predictor> BatchedContainer<C> {
    pub fn predict(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array1<f32>, InferError> {
        concat_1d(self.predict_chunks(input)?)
    }

    pub fn predict_chunks(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Vec<Array1<f32>>, InferError> {
        self.run_chunks(input.into(), |container, columns| container.predict(columns))
    }
}

impl<C: Classifier> BatchedContainer<C> {
    pub fn predict_proba(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array2<f32>, InferError> {
        concat_2d(self.predict_proba_chunks(input)?)
    }

    pub fn predict_proba_chunks(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Vec<Array2<f32>>, InferError> {
        self.run_chunks(input.into(), |container, columns| container.predict_proba(columns))
    }
}

impl<C: AnomalyDetector> BatchedContainer<C> {
    pub fn decision_function(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array1<f32>, InferError> {
        concat_1d(self.decision_function_chunks(input)?)
    }

    pub fn decision_function_chunks(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Vec<Array1<f32>>, InferError> {
        self.run_chunks(input.into(), |container, columns| {
            container.decision_function(columns)
        })
    }

    pub fn score_samples(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array1<f32>, InferError> {
        concat_1d(self.score_samples_chunks(input)?)
    }

    pub fn score_samples_chunks(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Vec<Array1<f32>>, InferError> {
        self.run_chunks(input.into(), |container, columns| container.score_samples(columns))
    }
}

fn concat_1d(chunks: Vec<Array1<f32>>) -> Result<Array1<f32>, InferError> {
    let views: Vec<_> = chunks.iter().map(|chunk| chunk.view()).collect();
    ndarray::concatenate(Axis(0), &views)
        .map_err(|e| InferError::Compute(format!("cannot concatenate chunk outputs: {e}")))
}

fn concat_2d(chunks: Vec<Array2<f32>>) -> Result<Array2<f32>, InferError> {
    let views: Vec<_> = chunks.iter().map(|chunk| chunk.view()).collect();
    ndarray::concatenate(Axis(0), &views)
        .map_err(|e| InferError::Compute(format!("cannot concatenate chunk outputs: {e}")))
}

fn concat_dyn(chunks: Vec<ArrayD<f32>>) -> Result<ArrayD<f32>, InferError> {
    let views: Vec<_> = chunks.iter().map(|chunk| chunk.view()).collect();
    ndarray::concatenate(Axis(0), &views)
        .map_err(|e| InferError::Compute(format!("cannot concatenate chunk outputs: {e}")))
}
