//! Stub environment and model backend shared across unit tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::env::{EnvMetrics, EnvStep, VecEnv};
use crate::error::{CheckpointError, TrainError};
use crate::model::{
    CancelToken, ModelBackend, ModelParameters, PolicyKind, PolicyModel, TrainOutcome,
};
use crate::training::callbacks::{StepContext, TrainingCallback};

/// Deterministic vectorized environment: one reward unit per step, all
/// sub-environments finish an episode every `episode_len` steps.
pub(crate) struct StubEnv {
    num_envs: usize,
    obs_dim: usize,
    episode_len: usize,
    steps: usize,
    pub metrics: EnvMetrics,
}

impl StubEnv {
    pub fn new(num_envs: usize, obs_dim: usize) -> Self {
        StubEnv {
            num_envs,
            obs_dim,
            episode_len: 5,
            steps: 0,
            metrics: EnvMetrics {
                success_rate: 0.5,
                episode_rewards: vec![1.0, 2.0],
                success_history: vec![true, false],
                curriculum_lambda: 0.3,
            },
        }
    }

    pub fn with_episode_len(mut self, episode_len: usize) -> Self {
        self.episode_len = episode_len;
        self
    }

    fn observations(&self) -> Vec<f32> {
        (0..self.num_envs * self.obs_dim)
            .map(|k| ((k + self.steps) % 7) as f32 * 0.5)
            .collect()
    }
}

impl VecEnv for StubEnv {
    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn reset(&mut self) -> Vec<f32> {
        self.steps = 0;
        self.observations()
    }

    fn step(&mut self, _actions: &[f32]) -> EnvStep {
        self.steps += 1;
        let done = self.steps % self.episode_len == 0;
        EnvStep {
            observations: self.observations(),
            rewards: vec![1.0; self.num_envs],
            dones: vec![done; self.num_envs],
        }
    }

    fn metrics(&self) -> EnvMetrics {
        self.metrics.clone()
    }
}

#[derive(Serialize, Deserialize)]
struct SavedParam {
    shape: Vec<usize>,
    values: Vec<f32>,
}

/// Persist a parameter set as JSON, the stub stand-in for a real recorder.
pub(crate) fn write_params(
    params: &ModelParameters,
    path: &Path,
) -> Result<(), CheckpointError> {
    let mut map = BTreeMap::new();
    for (name, data) in params.iter() {
        map.insert(
            name.clone(),
            SavedParam {
                shape: data.shape.clone(),
                values: data.to_vec::<f32>().unwrap(),
            },
        );
    }
    fs::write(path, serde_json::to_string(&map)?)?;
    Ok(())
}

pub(crate) fn read_params(path: &Path) -> Result<ModelParameters, CheckpointError> {
    let content =
        fs::read_to_string(path).map_err(|e| CheckpointError::ModelLoad(e.to_string()))?;
    let map: BTreeMap<String, SavedParam> = serde_json::from_str(&content)?;
    let mut params = ModelParameters::new();
    for (name, saved) in map {
        params.insert(name, TensorData::new(saved.values, saved.shape));
    }
    Ok(params)
}

/// Minimal in-memory model: steps its environment once per timestep and
/// invokes every callback, honoring the cancel token.
pub(crate) struct StubModel {
    env: Box<dyn VecEnv>,
    params: ModelParameters,
    timesteps: u64,
}

impl PolicyModel for StubModel {
    fn learn(
        &mut self,
        total_timesteps: u64,
        callbacks: &mut [Box<dyn TrainingCallback>],
        cancel: &CancelToken,
    ) -> Result<TrainOutcome, TrainError> {
        for t in 1..=total_timesteps {
            if cancel.is_cancelled() {
                return Ok(TrainOutcome::CancelledEarly);
            }
            let actions = vec![0.0; self.env.num_envs()];
            self.env.step(&actions);
            {
                let ctx = StepContext {
                    num_timesteps: t,
                    env: self.env.as_ref(),
                    model: &*self,
                };
                for callback in callbacks.iter_mut() {
                    if !callback.on_step(&ctx) {
                        return Ok(TrainOutcome::CancelledEarly);
                    }
                }
            }
            self.timesteps = t;
        }
        Ok(TrainOutcome::Completed)
    }

    fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        write_params(&self.params, path)
    }

    fn parameters(&self) -> ModelParameters {
        self.params.clone()
    }

    fn set_parameters(
        &mut self,
        params: &ModelParameters,
        exact_match: bool,
    ) -> Result<(), TrainError> {
        self.params.merge_from(params, exact_match)?;
        Ok(())
    }

    fn predict(&self, _observations: &[f32], _deterministic: bool) -> Vec<f32> {
        vec![0.0; self.env.num_envs()]
    }

    fn num_timesteps(&self) -> u64 {
        self.timesteps
    }

    fn env(&self) -> &dyn VecEnv {
        self.env.as_ref()
    }

    fn env_mut(&mut self) -> &mut dyn VecEnv {
        self.env.as_mut()
    }
}

pub(crate) struct StubBackend;

impl ModelBackend for StubBackend {
    type Model = StubModel;

    fn build(
        &self,
        _policy: PolicyKind,
        env: Box<dyn VecEnv>,
        _config: &AppConfig,
        _log_dir: &Path,
    ) -> Result<StubModel, TrainError> {
        let mut params = ModelParameters::new();
        params.insert("actor.weight", TensorData::new(vec![0.0f32; 4], vec![2, 2]));
        params.insert("critic.weight", TensorData::new(vec![0.0f32; 4], vec![2, 2]));
        Ok(StubModel {
            env,
            params,
            timesteps: 0,
        })
    }

    fn load(&self, path: &Path, env: Box<dyn VecEnv>) -> Result<StubModel, TrainError> {
        let params = read_params(path)?;
        Ok(StubModel {
            env,
            params,
            timesteps: 0,
        })
    }

    fn load_parameters(&self, path: &Path) -> Result<ModelParameters, TrainError> {
        Ok(read_params(path)?)
    }
}
