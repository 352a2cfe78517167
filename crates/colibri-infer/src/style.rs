use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD};
use serde::{Deserialize, Serialize};

use colibri_base::ArrayValue;

use crate::config::RuntimeConfig;
use crate::error::InferError;
use crate::input::PredictInput;

/// What kind of estimator a container wraps. The style decides which public
/// methods are available; everything else is rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStyle {
    Transform,
    Regression,
    Classification,
    AnomalyDetection,
}

impl TaskStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStyle::Transform => "transform",
            TaskStyle::Regression => "regression",
            TaskStyle::Classification => "classification",
            TaskStyle::AnomalyDetection => "anomaly-detection",
        }
    }
}

impl fmt::Display for TaskStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared surface of every container backend.
pub trait Container {
    fn style(&self) -> TaskStyle;
    fn batch_size(&self) -> Option<usize>;
    fn n_threads(&self) -> Option<usize>;
    fn config(&self) -> &RuntimeConfig;

    /// Persist the container as `{location}.zip`, returning the archive path.
    fn save(&self, location: &Path) -> Result<PathBuf, InferError>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Method {
    Transform,
    Predict,
    PredictProba,
    DecisionFunction,
    ScoreSamples,
}

impl Method {
    fn as_str(&self) -> &'static str {
        match self {
            Method::Transform => "transform",
            Method::Predict => "predict",
            Method::PredictProba => "predict_proba",
            Method::DecisionFunction => "decision_function",
            Method::ScoreSamples => "score_samples",
        }
    }
}

/// One place decides which method a style answers to.
pub(crate) fn gate(style: TaskStyle, method: Method) -> Result<(), InferError> {
    let allowed = match method {
        Method::Transform => style == TaskStyle::Transform,
        Method::Predict => style != TaskStyle::Transform,
        Method::PredictProba => style == TaskStyle::Classification,
        Method::DecisionFunction | Method::ScoreSamples => {
            style == TaskStyle::AnomalyDetection
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(InferError::Unsupported(format!(
            "{} is not available on a {} container",
            method.as_str(),
            style
        )))
    }
}

/// Featurizers: one output, returned with its model shape.
pub trait Transformer: Container {
    fn compute_transform(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError>;

    fn transform(&mut self, input: impl Into<PredictInput>) -> Result<ArrayD<f32>, InferError> {
        gate(self.style(), Method::Transform)?;
        let columns = input.into().into_columns();
        self.compute_transform(&columns)
    }
}

/// Anything with a primary prediction: regressors, classifiers, detectors.
/// `predict` always comes back raveled to one dimension.
pub trait Predictor: Container {
    fn compute_predict(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError>;

    fn predict(&mut self, input: impl Into<PredictInput>) -> Result<Array1<f32>, InferError> {
        gate(self.style(), Method::Predict)?;
        let columns = input.into().into_columns();
        Ok(ravel(self.compute_predict(&columns)?))
    }
}

pub trait Classifier: Predictor {
    fn compute_predict_proba(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array2<f32>, InferError>;

    /// Per-class membership probabilities, one row per sample.
    fn predict_proba(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array2<f32>, InferError> {
        gate(self.style(), Method::PredictProba)?;
        let columns = input.into().into_columns();
        self.compute_predict_proba(&columns)
    }
}

pub trait AnomalyDetector: Predictor {
    fn compute_decision_function(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array1<f32>, InferError>;

    /// Raw outlier scores, shifted by `anomaly_threshold` when one is set.
    fn decision_function(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array1<f32>, InferError> {
        gate(self.style(), Method::DecisionFunction)?;
        let columns = input.into().into_columns();
        let mut scores = self.compute_decision_function(&columns)?;
        if let Some(threshold) = self.config().anomaly_threshold {
            scores += threshold;
        }
        Ok(scores)
    }

    /// Decision scores plus the configured `score_offset`.
    fn score_samples(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array1<f32>, InferError> {
        gate(self.style(), Method::ScoreSamples)?;
        let offset = self
            .config()
            .score_offset
            .ok_or_else(|| InferError::Config("score_samples requires score_offset".into()))?;
        Ok(self.decision_function(input)? + offset)
    }
}

fn ravel(array: ArrayD<f32>) -> Array1<f32> {
    Array1::from_iter(array.iter().copied())
}
