//! Model seam: policy selection, parameter transfer, and the traits an
//! external off-policy trainer implements to plug into the driver.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::tensor::TensorData;

use crate::config::AppConfig;
use crate::env::{ObservationSpec, VecEnv};
use crate::error::{CheckpointError, TrainError};
use crate::training::callbacks::TrainingCallback;

/// Policy network family instantiated by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Convolutional extractor augmented with the proprioceptive state.
    AugmentedCnn,
    /// Plain convolutional extractor for the simplified scene.
    Cnn,
}

/// Pick the policy family for an observation spec.
///
/// Camera-based modes map to a convolutional policy; there is no policy for
/// low-dimensional observations, which is surfaced as a configuration error
/// rather than a failure inside model construction.
pub fn select_policy(spec: ObservationSpec) -> Result<PolicyKind, TrainError> {
    use crate::env::ObservationMode::*;
    match (spec.mode, spec.simplified) {
        (Depth | Rgbd, false) => Ok(PolicyKind::AugmentedCnn),
        (Depth | Rgbd, true) => Ok(PolicyKind::Cnn),
        (LowDim, _) => Err(TrainError::PolicyUnavailable(spec.mode)),
    }
}

/// Named parameter tensors of a model, in deterministic order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelParameters {
    params: BTreeMap<String, TensorData>,
}

impl ModelParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: TensorData) {
        self.params.insert(name.into(), data);
    }

    pub fn get(&self, name: &str) -> Option<&TensorData> {
        self.params.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TensorData)> {
        self.params.iter()
    }

    /// Copy parameters from `source` into `self`.
    ///
    /// With `exact_match` unset, only names present on both sides are
    /// transferred and the rest keep their current (freshly initialized)
    /// values; with it set, any name found on one side but not the other is
    /// an error. A shape conflict on a shared name is an error either way.
    /// Returns the number of transferred parameters.
    pub fn merge_from(
        &mut self,
        source: &ModelParameters,
        exact_match: bool,
    ) -> Result<usize, TrainError> {
        if exact_match {
            for name in source.params.keys() {
                if !self.params.contains_key(name) {
                    return Err(TrainError::UnexpectedParameter { name: name.clone() });
                }
            }
            for name in self.params.keys() {
                if !source.params.contains_key(name) {
                    return Err(TrainError::MissingParameter { name: name.clone() });
                }
            }
        }

        // Validate shapes up front so a mismatch never leaves a half-merged set.
        for (name, data) in &source.params {
            if let Some(dest) = self.params.get(name) {
                if dest.shape != data.shape {
                    return Err(TrainError::ShapeMismatch {
                        name: name.clone(),
                        expected: dest.shape.clone(),
                        found: data.shape.clone(),
                    });
                }
            }
        }

        let mut transferred = 0;
        for (name, data) in &source.params {
            if let Some(dest) = self.params.get_mut(name) {
                *dest = data.clone();
                transferred += 1;
            }
        }
        Ok(transferred)
    }
}

/// How a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    /// The full timestep budget was consumed.
    Completed,
    /// The operator requested an early stop; partial progress is still saved.
    CancelledEarly,
}

/// Cloneable handle the operator uses to request an early stop. The trainer
/// polls it between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// An off-policy actor-critic model bound to a training environment.
///
/// The optimization loop, replay buffer, and networks live behind this
/// trait; the crate only orchestrates. `learn` must invoke every callback
/// once per step with the current timestep count and poll the cancel token,
/// returning [`TrainOutcome::CancelledEarly`] when it fires.
pub trait PolicyModel {
    fn learn(
        &mut self,
        total_timesteps: u64,
        callbacks: &mut [Box<dyn TrainingCallback>],
        cancel: &CancelToken,
    ) -> Result<TrainOutcome, TrainError>;

    /// Persist weights and optimizer state to exactly `path`.
    fn save(&self, path: &Path) -> Result<(), CheckpointError>;

    fn parameters(&self) -> ModelParameters;

    fn set_parameters(
        &mut self,
        params: &ModelParameters,
        exact_match: bool,
    ) -> Result<(), TrainError>;

    /// Batched action selection, `num_envs * action_dim` values.
    fn predict(&self, observations: &[f32], deterministic: bool) -> Vec<f32>;

    fn num_timesteps(&self) -> u64;

    fn env(&self) -> &dyn VecEnv;

    fn env_mut(&mut self) -> &mut dyn VecEnv;
}

/// Constructs and restores models for the driver.
pub trait ModelBackend {
    type Model: PolicyModel;

    /// Build a freshly initialized model bound to `env`.
    fn build(
        &self,
        policy: PolicyKind,
        env: Box<dyn VecEnv>,
        config: &AppConfig,
        log_dir: &Path,
    ) -> Result<Self::Model, TrainError>;

    /// Restore a full model (weights and optimizer state) bound to `env`.
    fn load(&self, path: &Path, env: Box<dyn VecEnv>) -> Result<Self::Model, TrainError>;

    /// Read a checkpoint's parameter set without binding an environment.
    fn load_parameters(&self, path: &Path) -> Result<ModelParameters, TrainError>;
}
