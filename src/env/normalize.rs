//! Observation and reward normalization with running statistics.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::env::{EnvMetrics, EnvStep, VecEnv};
use crate::error::CheckpointError;

/// Default clip range for normalized observations.
pub const DEFAULT_CLIP_OBS: f32 = 10.0;

/// Discount used for the running return estimate that scales rewards.
const RETURN_GAMMA: f64 = 0.99;

const STATS_EPSILON: f64 = 1e-8;

/// Per-dimension running mean and standard deviation (Welford's algorithm).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningMeanStd {
    mean: Vec<f64>,
    // Sum of squared deviations; variance = var_sum / count.
    var_sum: Vec<f64>,
    count: f64,
}

impl RunningMeanStd {
    pub fn new(dim: usize) -> Self {
        RunningMeanStd {
            mean: vec![0.0; dim],
            var_sum: vec![0.0; dim],
            count: 0.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn mean(&self, i: usize) -> f64 {
        self.mean[i]
    }

    pub fn std(&self, i: usize) -> f64 {
        let var = if self.count > 0.0 {
            self.var_sum[i] / self.count
        } else {
            0.0
        };
        (var + STATS_EPSILON).sqrt()
    }

    /// Fold one sample into the statistics.
    pub fn update(&mut self, sample: &[f32]) {
        debug_assert_eq!(sample.len(), self.mean.len());
        self.count += 1.0;
        for (i, &x) in sample.iter().enumerate() {
            let x = x as f64;
            let delta = x - self.mean[i];
            self.mean[i] += delta / self.count;
            self.var_sum[i] += delta * (x - self.mean[i]);
        }
    }

    /// Fold a flattened batch of `dim`-sized samples into the statistics.
    pub fn update_batch(&mut self, batch: &[f32]) {
        for sample in batch.chunks_exact(self.mean.len()) {
            self.update(sample);
        }
    }

    /// Standardize one sample against the current statistics.
    pub fn normalize(&self, sample: &[f32]) -> Vec<f32> {
        debug_assert_eq!(sample.len(), self.mean.len());
        sample
            .iter()
            .enumerate()
            .map(|(i, &x)| ((x as f64 - self.mean[i]) / self.std(i)) as f32)
            .collect()
    }

    /// Standardize and clamp to `[-clip, clip]`.
    pub fn normalize_clipped(&self, sample: &[f32], clip: f32) -> Vec<f32> {
        self.normalize(sample)
            .into_iter()
            .map(|x| x.clamp(-clip, clip))
            .collect()
    }
}

/// Persisted form of the adapter: statistics plus the wrap-time switches,
/// so a restored wrapper normalizes exactly like the one that was saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NormalizeStats {
    obs_rms: RunningMeanStd,
    ret_rms: RunningMeanStd,
    norm_obs: bool,
    norm_reward: bool,
    clip_obs: f32,
}

/// Normalization adapter around a vectorized environment.
///
/// Observations are standardized per dimension and clipped; training rewards
/// are scaled by the standard deviation of a running discounted return.
/// Statistics only advance while `training` is set.
pub struct VecNormalize {
    inner: Box<dyn VecEnv>,
    training: bool,
    norm_obs: bool,
    norm_reward: bool,
    clip_obs: f32,
    obs_rms: RunningMeanStd,
    ret_rms: RunningMeanStd,
    // Per-env discounted return accumulator feeding ret_rms.
    returns: Vec<f64>,
}

impl VecNormalize {
    pub fn new(inner: Box<dyn VecEnv>, norm_obs: bool, norm_reward: bool, clip_obs: f32) -> Self {
        let obs_dim = inner.obs_dim();
        let num_envs = inner.num_envs();
        VecNormalize {
            inner,
            training: true,
            norm_obs,
            norm_reward,
            clip_obs,
            obs_rms: RunningMeanStd::new(obs_dim),
            ret_rms: RunningMeanStd::new(1),
            returns: vec![0.0; num_envs],
        }
    }

    /// Wrap `inner` and restore statistics persisted at `path`.
    pub fn load(path: &Path, inner: Box<dyn VecEnv>) -> Result<Self, CheckpointError> {
        let mut wrapper = VecNormalize::new(inner, true, true, DEFAULT_CLIP_OBS);
        wrapper.load_stats(path)?;
        Ok(wrapper)
    }

    /// Freeze or resume statistics updates.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn norm_obs(&self) -> bool {
        self.norm_obs
    }

    pub fn norm_reward(&self) -> bool {
        self.norm_reward
    }

    pub fn obs_stats(&self) -> &RunningMeanStd {
        &self.obs_rms
    }

    /// Standardize a flattened observation batch with the current statistics.
    pub fn normalize_obs(&self, observations: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(observations.len());
        for sample in observations.chunks_exact(self.obs_rms.dim()) {
            out.extend(self.obs_rms.normalize_clipped(sample, self.clip_obs));
        }
        out
    }

    fn apply_obs(&mut self, observations: Vec<f32>) -> Vec<f32> {
        if self.training {
            self.obs_rms.update_batch(&observations);
        }
        if self.norm_obs {
            self.normalize_obs(&observations)
        } else {
            observations
        }
    }

    /// Persist the statistics (and wrap-time switches) to `path`.
    pub fn save_stats(&self, path: &Path) -> Result<(), CheckpointError> {
        let stats = NormalizeStats {
            obs_rms: self.obs_rms.clone(),
            ret_rms: self.ret_rms.clone(),
            norm_obs: self.norm_obs,
            norm_reward: self.norm_reward,
            clip_obs: self.clip_obs,
        };
        fs::write(path, serde_json::to_string_pretty(&stats)?)?;
        Ok(())
    }

    /// Replace this wrapper's statistics and switches with the persisted
    /// ones. The `training` flag is left as set at wrap time.
    pub fn load_stats(&mut self, path: &Path) -> Result<(), CheckpointError> {
        let content = fs::read_to_string(path).map_err(|e| CheckpointError::StatsRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let stats: NormalizeStats =
            serde_json::from_str(&content).map_err(|e| CheckpointError::StatsParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        self.obs_rms = stats.obs_rms;
        self.ret_rms = stats.ret_rms;
        self.norm_obs = stats.norm_obs;
        self.norm_reward = stats.norm_reward;
        self.clip_obs = stats.clip_obs;
        Ok(())
    }
}

impl VecEnv for VecNormalize {
    fn num_envs(&self) -> usize {
        self.inner.num_envs()
    }

    fn obs_dim(&self) -> usize {
        self.inner.obs_dim()
    }

    fn reset(&mut self) -> Vec<f32> {
        let observations = self.inner.reset();
        self.returns.iter_mut().for_each(|r| *r = 0.0);
        self.apply_obs(observations)
    }

    fn step(&mut self, actions: &[f32]) -> EnvStep {
        let step = self.inner.step(actions);
        let observations = self.apply_obs(step.observations);

        let mut rewards = step.rewards;
        if self.norm_reward {
            if self.training {
                for (i, &r) in rewards.iter().enumerate() {
                    self.returns[i] = self.returns[i] * RETURN_GAMMA + r as f64;
                    self.ret_rms.update(&[self.returns[i] as f32]);
                }
            }
            let scale = self.ret_rms.std(0);
            for r in rewards.iter_mut() {
                *r = (*r as f64 / scale) as f32;
            }
        }
        for (i, &done) in step.dones.iter().enumerate() {
            if done {
                self.returns[i] = 0.0;
            }
        }

        EnvStep {
            observations,
            rewards,
            dones: step.dones,
        }
    }

    fn metrics(&self) -> EnvMetrics {
        self.inner.metrics()
    }

    fn as_normalize(&self) -> Option<&VecNormalize> {
        Some(self)
    }

    fn as_normalize_mut(&mut self) -> Option<&mut VecNormalize> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubEnv;

    #[test]
    fn test_running_mean_std_tracks_mean() {
        let mut rms = RunningMeanStd::new(2);
        rms.update(&[1.0, 10.0]);
        rms.update(&[3.0, 30.0]);
        assert!((rms.mean(0) - 2.0).abs() < 1e-9);
        assert!((rms.mean(1) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_mean_std_normalizes_to_unit_scale() {
        let mut rms = RunningMeanStd::new(1);
        for x in [2.0f32, 4.0, 6.0, 8.0] {
            rms.update(&[x]);
        }
        let normalized = rms.normalize(&[5.0]);
        assert!(normalized[0].abs() < 1e-3, "mean sample maps near zero");
    }

    #[test]
    fn test_normalize_clipped_respects_clip() {
        let mut rms = RunningMeanStd::new(1);
        rms.update(&[0.0]);
        rms.update(&[0.1]);
        let clipped = rms.normalize_clipped(&[1e6], 10.0);
        assert_eq!(clipped[0], 10.0);
    }

    #[test]
    fn test_update_batch_matches_sequential_updates() {
        let mut a = RunningMeanStd::new(2);
        let mut b = RunningMeanStd::new(2);
        a.update_batch(&[1.0, 2.0, 3.0, 4.0]);
        b.update(&[1.0, 2.0]);
        b.update(&[3.0, 4.0]);
        assert!((a.mean(0) - b.mean(0)).abs() < 1e-12);
        assert!((a.std(1) - b.std(1)).abs() < 1e-12);
    }

    #[test]
    fn test_vec_normalize_forwards_metrics() {
        let mut env = StubEnv::new(2, 3);
        env.metrics.success_rate = 0.75;
        env.metrics.curriculum_lambda = 0.4;
        let wrapper = VecNormalize::new(Box::new(env), true, true, DEFAULT_CLIP_OBS);
        let m = wrapper.metrics();
        assert!((m.success_rate - 0.75).abs() < 1e-6);
        assert!((m.curriculum_lambda - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_step_returns_raw_rewards_when_reward_norm_off() {
        let env = StubEnv::new(2, 3);
        let mut wrapper = VecNormalize::new(Box::new(env), true, false, DEFAULT_CLIP_OBS);
        wrapper.reset();
        let step = wrapper.step(&[0.0, 0.0]);
        assert!(step.rewards.iter().all(|&r| (r - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_step_scales_rewards_when_reward_norm_on() {
        let env = StubEnv::new(1, 2);
        let mut wrapper = VecNormalize::new(Box::new(env), false, true, DEFAULT_CLIP_OBS);
        wrapper.reset();
        let mut last = 0.0;
        for _ in 0..20 {
            last = wrapper.step(&[0.0]).rewards[0];
        }
        assert!(last > 0.0 && (last - 1.0).abs() > 1e-3, "reward was rescaled");
    }

    #[test]
    fn test_frozen_wrapper_keeps_statistics() {
        let env = StubEnv::new(1, 2);
        let mut wrapper = VecNormalize::new(Box::new(env), true, false, DEFAULT_CLIP_OBS);
        wrapper.reset();
        for _ in 0..5 {
            wrapper.step(&[0.0]);
        }
        let count = wrapper.obs_stats().count();
        wrapper.set_training(false);
        wrapper.step(&[0.0]);
        assert_eq!(wrapper.obs_stats().count(), count);
    }

    #[test]
    fn test_stats_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vecnormalize.json");

        let env = StubEnv::new(1, 2);
        let mut wrapper = VecNormalize::new(Box::new(env), true, true, 5.0);
        wrapper.reset();
        for _ in 0..10 {
            wrapper.step(&[0.0]);
        }
        wrapper.save_stats(&path).unwrap();

        // Wrap-time switches are off; the persisted ones take over on load.
        let mut restored = VecNormalize::new(Box::new(StubEnv::new(1, 2)), false, false, 1.0);
        restored.load_stats(&path).unwrap();
        assert!(restored.norm_obs());
        assert!(restored.norm_reward());

        let sample = vec![0.3, 0.6];
        assert_eq!(wrapper.normalize_obs(&sample), restored.normalize_obs(&sample));
    }

    #[test]
    fn test_load_missing_stats_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut wrapper =
            VecNormalize::new(Box::new(StubEnv::new(1, 2)), true, true, DEFAULT_CLIP_OBS);
        let err = wrapper
            .load_stats(&dir.path().join("vecnormalize.json"))
            .unwrap_err();
        assert!(matches!(err, CheckpointError::StatsRead { .. }));
    }
}
