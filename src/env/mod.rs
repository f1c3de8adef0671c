//! Vectorized-environment seam: the trait the driver and callbacks consume,
//! observation-mode selection data, and the normalization adapter.

mod normalize;

pub use normalize::{RunningMeanStd, VecNormalize, DEFAULT_CLIP_OBS};

use std::fmt;

/// Observation modality of the grasping environment, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ObservationMode {
    /// Proprioceptive state vector only, no camera.
    LowDim,
    /// Depth image observations.
    Depth,
    /// Registered RGB + depth observations.
    Rgbd,
}

impl fmt::Display for ObservationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationMode::LowDim => write!(f, "low-dim"),
            ObservationMode::Depth => write!(f, "depth"),
            ObservationMode::Rgbd => write!(f, "rgbd"),
        }
    }
}

/// Observation description produced once when the environment is built and
/// passed explicitly to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationSpec {
    pub mode: ObservationMode,
    /// Reduced scene variant (fewer objects, cropped workspace).
    pub simplified: bool,
}

impl ObservationSpec {
    pub fn new(mode: ObservationMode, simplified: bool) -> Self {
        ObservationSpec { mode, simplified }
    }
}

/// Snapshot of the per-episode metrics the environment exposes.
#[derive(Debug, Clone, Default)]
pub struct EnvMetrics {
    /// Rolling mean grasp success rate.
    pub success_rate: f32,
    /// Rewards of recently finished episodes.
    pub episode_rewards: Vec<f32>,
    /// Success/failure outcome of recently finished episodes.
    pub success_history: Vec<bool>,
    /// Current curriculum blending parameter.
    pub curriculum_lambda: f32,
}

/// One batched transition across all sub-environments.
#[derive(Debug, Clone)]
pub struct EnvStep {
    /// Flattened observations, `num_envs * obs_dim` values.
    pub observations: Vec<f32>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
}

/// Batched simulation interface stepping several environment instances in
/// lockstep. Implementations live outside this crate; episodes must
/// terminate, i.e. every sub-environment eventually reports `done`.
pub trait VecEnv {
    fn num_envs(&self) -> usize;

    /// Length of a single flattened observation.
    fn obs_dim(&self) -> usize;

    /// Reset all sub-environments, returning `num_envs * obs_dim` values.
    fn reset(&mut self) -> Vec<f32>;

    /// Step all sub-environments with a flattened action batch.
    fn step(&mut self, actions: &[f32]) -> EnvStep;

    /// Snapshot the exposed training metrics. Wrappers forward to the
    /// wrapped environment.
    fn metrics(&self) -> EnvMetrics;

    /// The outermost normalization wrapper, if this environment is one.
    fn as_normalize(&self) -> Option<&VecNormalize> {
        None
    }

    fn as_normalize_mut(&mut self) -> Option<&mut VecNormalize> {
        None
    }
}
