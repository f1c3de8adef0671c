//! The policy driver: owns environment handles and configuration, selects a
//! policy representation, constructs or restores a model, runs the bounded
//! training loop, and persists the result.

use std::fs;
use std::path::{Path, PathBuf};

use crate::checkpoint::{self, CheckpointMetadata};
use crate::config::AppConfig;
use crate::env::{ObservationSpec, VecEnv, VecNormalize, DEFAULT_CLIP_OBS};
use crate::error::{CheckpointError, TrainError};
use crate::model::{select_policy, CancelToken, ModelBackend, PolicyModel, TrainOutcome};
use crate::training::callbacks::{
    CheckpointCallback, EvalCallback, MetricsCallback, TrainingCallback,
};

/// Drives a train/save/load loop for one model directory.
///
/// `model_dir` names the run; its basename doubles as the artifact base
/// filename and as the model identifier in log lines. `load_dir`, when set,
/// is the full path of a prior model artifact whose parent directory also
/// holds the matching normalization statistics.
pub struct PolicyDriver<B: ModelBackend> {
    backend: B,
    env: Box<dyn VecEnv>,
    test_env: Box<dyn VecEnv>,
    observation: ObservationSpec,
    config: AppConfig,
    model_dir: PathBuf,
    load_dir: Option<PathBuf>,
    model_name: String,
}

impl<B: ModelBackend> PolicyDriver<B> {
    pub fn new(
        backend: B,
        env: Box<dyn VecEnv>,
        test_env: Box<dyn VecEnv>,
        observation: ObservationSpec,
        config: AppConfig,
        model_dir: impl Into<PathBuf>,
    ) -> Self {
        let model_dir = model_dir.into();
        let model_name = model_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        PolicyDriver {
            backend,
            env,
            test_env,
            observation,
            config,
            model_dir,
            load_dir: None,
            model_name,
        }
    }

    /// Bootstrap the next run from a previously saved artifact.
    pub fn with_load_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.load_dir = Some(path.into());
        self
    }

    /// Run the training loop and persist the result.
    ///
    /// Cancelling the token stops training early without treating the run as
    /// failed: the model saved so far is persisted and
    /// [`TrainOutcome::CancelledEarly`] is returned.
    pub fn learn(self, cancel: CancelToken) -> Result<TrainOutcome, TrainError> {
        let PolicyDriver {
            backend,
            env,
            test_env,
            observation,
            config,
            model_dir,
            load_dir,
            model_name,
        } = self;

        config.validate()?;
        let policy = select_policy(observation)?;

        // Evaluation sees normalized observations but true reward scale.
        let test_env: Box<dyn VecEnv> = if config.normalize {
            Box::new(VecNormalize::new(test_env, true, false, DEFAULT_CLIP_OBS))
        } else {
            test_env
        };
        let best_dir = model_dir.join("best_model");
        let eval_cb = EvalCallback::new(
            test_env,
            &best_dir,
            best_dir.join("logs"),
            config.schedule.eval_freq,
            config.schedule.n_eval_episodes,
        );
        let checkpoint_cb =
            CheckpointCallback::new(config.schedule.checkpoint_freq, model_dir.join("logs"), "rl_model");
        let metrics_cb = MetricsCallback::new(model_name, config.log_freq);

        let log_dir = PathBuf::from("tensorboard");

        let mut model = match &load_dir {
            Some(load_path) => {
                let parent = parent_dir(load_path);
                let env: Box<dyn VecEnv> = if config.normalize {
                    Box::new(VecNormalize::load(
                        &checkpoint::stats_path(&parent),
                        env,
                    )?)
                } else {
                    env
                };
                let mut model = backend.build(policy, env, &config, &log_dir)?;
                // Architecture-compatible transfer: parameters missing from
                // the prior run keep their fresh initialization.
                let params = backend.load_parameters(load_path)?;
                model.set_parameters(&params, false)?;
                tracing::info!("transferred parameters from {}", load_path.display());
                model
            }
            None => {
                let env: Box<dyn VecEnv> = if config.normalize {
                    Box::new(VecNormalize::new(env, true, true, DEFAULT_CLIP_OBS))
                } else {
                    env
                };
                backend.build(policy, env, &config, &log_dir)?
            }
        };

        let mut callbacks: Vec<Box<dyn TrainingCallback>> = vec![
            Box::new(metrics_cb),
            Box::new(checkpoint_cb),
            Box::new(eval_cb),
        ];
        let outcome = model.learn(config.sac.total_timesteps, &mut callbacks, &cancel)?;
        if outcome == TrainOutcome::CancelledEarly {
            tracing::info!("training cancelled, saving current model");
        }

        persist(&config, &model_dir, &model)?;
        Ok(outcome)
    }

    /// Restore a model for continued training or evaluation.
    ///
    /// The normalization statistics are loaded from the checkpoint's parent
    /// directory into a wrapper whose normalization effects are disabled at
    /// wrap time; the persisted switches take over once loaded.
    pub fn load_params(self) -> Result<B::Model, TrainError> {
        let PolicyDriver {
            backend,
            env,
            config,
            load_dir,
            ..
        } = self;
        let load_path = load_dir.ok_or(TrainError::NoLoadDir)?;
        let parent = parent_dir(&load_path);

        let env: Box<dyn VecEnv> = if config.normalize {
            let mut wrapper = VecNormalize::new(env, false, false, DEFAULT_CLIP_OBS);
            wrapper.load_stats(&checkpoint::stats_path(&parent))?;
            Box::new(wrapper)
        } else {
            env
        };
        backend.load(&load_path, env)
    }

    /// Persist `model` under this driver's model directory.
    pub fn save(&self, model: &B::Model) -> Result<PathBuf, TrainError> {
        persist(&self.config, &self.model_dir, model)
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Save `model` to the first unused artifact path in `model_dir`, write the
/// metadata sibling, and pair the save with the normalization statistics
/// when normalization is enabled.
fn persist<M: PolicyModel + ?Sized>(
    config: &AppConfig,
    model_dir: &Path,
    model: &M,
) -> Result<PathBuf, TrainError> {
    // Resolve the statistics handle first: a normalized model must never be
    // persisted without them.
    let stats = if config.normalize {
        Some(
            model
                .env()
                .as_normalize()
                .ok_or(CheckpointError::MissingStats)?,
        )
    } else {
        None
    };

    fs::create_dir_all(model_dir).map_err(CheckpointError::Io)?;
    let artifact = checkpoint::next_free_path(model_dir)?;
    model.save(&artifact)?;

    let metrics = model.env().metrics();
    let metadata = CheckpointMetadata::for_run(config, model.num_timesteps(), metrics.success_rate);
    metadata.write(&checkpoint::metadata_path(&artifact))?;

    if let Some(stats) = stats {
        stats.save_stats(&checkpoint::stats_path(model_dir))?;
    }

    tracing::info!("saved model to {}", artifact.display());
    Ok(artifact)
}
