//! Callbacks the external trainer invokes once per optimization step.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::checkpoint::VECNORMALIZE_FILE;
use crate::env::VecEnv;
use crate::model::PolicyModel;

/// Per-step view handed to callbacks by the trainer.
pub struct StepContext<'a> {
    /// Total environment steps taken so far.
    pub num_timesteps: u64,
    /// The training environment (outermost wrapper).
    pub env: &'a dyn VecEnv,
    pub model: &'a dyn PolicyModel,
}

/// Hook invoked at every training step. Returning `false` asks the trainer
/// to stop early.
pub trait TrainingCallback {
    fn on_step(&mut self, ctx: &StepContext<'_>) -> bool;
}

/// Decides whether a timestep should emit a metrics log line.
///
/// Emits when the timestep differs from the one last seen and is an exact
/// multiple of the logging frequency. The state is an explicit fold value:
/// `advance` consumes it and returns the successor plus the emit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCadence {
    log_freq: u64,
    last_seen: Option<u64>,
}

impl LogCadence {
    /// `log_freq` must be positive; config validation rejects zero.
    pub fn new(log_freq: u64) -> Self {
        debug_assert!(log_freq > 0, "log_freq must be validated as positive");
        LogCadence {
            log_freq,
            last_seen: None,
        }
    }

    pub fn advance(self, timestep: u64) -> (Self, bool) {
        if self.last_seen == Some(timestep) {
            return (self, false);
        }
        let emit = timestep % self.log_freq == 0;
        (
            LogCadence {
                last_seen: Some(timestep),
                ..self
            },
            emit,
        )
    }
}

/// Samples environment metrics on a fixed timestep cadence and emits one
/// log line per eligible step.
pub struct MetricsCallback {
    model_name: String,
    cadence: LogCadence,
}

impl MetricsCallback {
    pub fn new(model_name: impl Into<String>, log_freq: u64) -> Self {
        MetricsCallback {
            model_name: model_name.into(),
            cadence: LogCadence::new(log_freq),
        }
    }
}

impl TrainingCallback for MetricsCallback {
    fn on_step(&mut self, ctx: &StepContext<'_>) -> bool {
        let (next, emit) = self.cadence.advance(ctx.num_timesteps);
        self.cadence = next;
        if emit {
            let metrics = ctx.env.metrics();
            tracing::info!(
                "model {}: success rate {:.3} at timestep {} (lambda {:.3})",
                self.model_name,
                metrics.success_rate,
                ctx.num_timesteps,
                metrics.curriculum_lambda,
            );
        }
        true
    }
}

/// Saves the model into a log directory every `save_freq` timesteps.
pub struct CheckpointCallback {
    save_freq: u64,
    save_path: PathBuf,
    name_prefix: String,
    last_saved: Option<u64>,
}

impl CheckpointCallback {
    pub fn new(save_freq: u64, save_path: impl Into<PathBuf>, name_prefix: impl Into<String>) -> Self {
        CheckpointCallback {
            save_freq,
            save_path: save_path.into(),
            name_prefix: name_prefix.into(),
            last_saved: None,
        }
    }
}

impl TrainingCallback for CheckpointCallback {
    fn on_step(&mut self, ctx: &StepContext<'_>) -> bool {
        let t = ctx.num_timesteps;
        if t % self.save_freq != 0 || self.last_saved == Some(t) {
            return true;
        }
        self.last_saved = Some(t);

        if let Err(e) = fs::create_dir_all(&self.save_path) {
            tracing::warn!("could not create checkpoint directory: {}", e);
            return true;
        }
        let path = self
            .save_path
            .join(format!("{}_{}_steps.bin", self.name_prefix, t));
        match ctx.model.save(&path) {
            Ok(()) => tracing::info!("checkpoint saved: {}", path.display()),
            // A failed periodic checkpoint never aborts training.
            Err(e) => tracing::warn!("checkpoint failed: {}", e),
        }
        true
    }
}

/// Periodically evaluates the model on a held-out environment and keeps the
/// best-scoring snapshot.
///
/// On a new best mean episode reward the model is saved as
/// `best_model.bin`, the training environment's normalization statistics are
/// saved next to it when present, and a record is appended to
/// `evaluations.jsonl` in the log directory.
pub struct EvalCallback {
    test_env: Box<dyn VecEnv>,
    best_model_dir: PathBuf,
    log_dir: PathBuf,
    eval_freq: u64,
    n_eval_episodes: usize,
    best_mean_reward: f32,
    last_eval: Option<u64>,
}

impl EvalCallback {
    pub fn new(
        test_env: Box<dyn VecEnv>,
        best_model_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        eval_freq: u64,
        n_eval_episodes: usize,
    ) -> Self {
        EvalCallback {
            test_env,
            best_model_dir: best_model_dir.into(),
            log_dir: log_dir.into(),
            eval_freq,
            n_eval_episodes,
            best_mean_reward: f32::NEG_INFINITY,
            last_eval: None,
        }
    }

    /// Mean episode reward over `n_eval_episodes`, using stochastic actions
    /// so evaluation matches training-time behavior.
    fn evaluate(&mut self, model: &dyn PolicyModel) -> f32 {
        let num_envs = self.test_env.num_envs();
        let mut acc = vec![0.0f64; num_envs];
        let mut total = 0.0f64;
        let mut completed = 0usize;

        let mut observations = self.test_env.reset();
        while completed < self.n_eval_episodes {
            let actions = model.predict(&observations, false);
            let step = self.test_env.step(&actions);
            for i in 0..num_envs {
                acc[i] += step.rewards[i] as f64;
                if step.dones[i] {
                    total += acc[i];
                    acc[i] = 0.0;
                    completed += 1;
                }
            }
            observations = step.observations;
        }
        (total / completed as f64) as f32
    }

    fn record(&self, timestep: u64, mean_reward: f32) {
        if let Err(e) = fs::create_dir_all(&self.log_dir) {
            tracing::warn!("could not create eval log directory: {}", e);
            return;
        }
        let line = serde_json::json!({
            "timestep": timestep,
            "mean_reward": mean_reward,
            "episodes": self.n_eval_episodes,
        });
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_dir.join("evaluations.jsonl"))
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            tracing::warn!("could not append eval record: {}", e);
        }
    }

    fn save_best(&self, ctx: &StepContext<'_>) {
        if let Err(e) = fs::create_dir_all(&self.best_model_dir) {
            tracing::warn!("could not create best-model directory: {}", e);
            return;
        }
        let path = self.best_model_dir.join("best_model.bin");
        if let Err(e) = ctx.model.save(&path) {
            tracing::warn!("best-model save failed: {}", e);
            return;
        }
        // Keep the statistics the snapshot was trained under next to it.
        if let Some(stats) = ctx.env.as_normalize() {
            if let Err(e) = stats.save_stats(&self.best_model_dir.join(VECNORMALIZE_FILE)) {
                tracing::warn!("best-model statistics save failed: {}", e);
            }
        }
    }
}

impl TrainingCallback for EvalCallback {
    fn on_step(&mut self, ctx: &StepContext<'_>) -> bool {
        let t = ctx.num_timesteps;
        if t % self.eval_freq != 0 || self.last_eval == Some(t) {
            return true;
        }
        self.last_eval = Some(t);

        let mean_reward = self.evaluate(ctx.model);
        self.record(t, mean_reward);
        if mean_reward > self.best_mean_reward {
            self.best_mean_reward = mean_reward;
            tracing::info!(
                "new best mean reward {:.3} at timestep {}",
                mean_reward,
                t
            );
            self.save_best(ctx);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::env::{VecNormalize, DEFAULT_CLIP_OBS};
    use crate::model::{ModelBackend, PolicyKind};
    use crate::test_support::{StubBackend, StubEnv};
    use std::path::Path;

    fn stub_model() -> crate::test_support::StubModel {
        StubBackend
            .build(
                PolicyKind::AugmentedCnn,
                Box::new(StubEnv::new(1, 2)),
                &AppConfig::default(),
                Path::new("tensorboard"),
            )
            .unwrap()
    }

    #[test]
    fn test_cadence_skips_non_multiples() {
        let cadence = LogCadence::new(100);
        for t in [1, 50, 99, 101, 250] {
            let (_, emit) = cadence.advance(t);
            assert!(!emit, "timestep {t} must not emit");
        }
    }

    #[test]
    fn test_cadence_emits_once_per_multiple() {
        let cadence = LogCadence::new(100);
        let (cadence, emit) = cadence.advance(100);
        assert!(emit);
        let (cadence, emit) = cadence.advance(100);
        assert!(!emit, "repeated timestep must not emit twice");
        let (_, emit) = cadence.advance(200);
        assert!(emit);
    }

    #[test]
    fn test_cadence_tracks_unlogged_steps() {
        let cadence = LogCadence::new(100);
        let (cadence, emit) = cadence.advance(150);
        assert!(!emit);
        // The last-seen step advanced even though nothing was logged.
        let (_, emit) = cadence.advance(150);
        assert!(!emit);
    }

    #[test]
    fn test_metrics_callback_always_continues() {
        let model = stub_model();
        let env = StubEnv::new(1, 2);
        let mut cb = MetricsCallback::new("run1", 100);
        for t in [1, 100, 100, 101] {
            let ctx = StepContext {
                num_timesteps: t,
                env: &env,
                model: &model,
            };
            assert!(cb.on_step(&ctx));
        }
    }

    #[test]
    fn test_checkpoint_callback_saves_on_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let model = stub_model();
        let env = StubEnv::new(1, 2);
        let mut cb = CheckpointCallback::new(5000, &logs, "rl_model");

        let ctx = StepContext {
            num_timesteps: 4999,
            env: &env,
            model: &model,
        };
        assert!(cb.on_step(&ctx));
        assert!(!logs.exists(), "off-cadence step must not save");

        let ctx = StepContext {
            num_timesteps: 5000,
            env: &env,
            model: &model,
        };
        assert!(cb.on_step(&ctx));
        assert!(logs.join("rl_model_5000_steps.bin").exists());
    }

    #[test]
    fn test_eval_callback_mean_reward() {
        let model = stub_model();
        // One reward unit per step, four steps per episode.
        let test_env = StubEnv::new(1, 2).with_episode_len(4);
        let mut cb = EvalCallback::new(
            Box::new(test_env),
            "unused",
            "unused_logs",
            200,
            3,
        );
        let mean = cb.evaluate(&model);
        assert!((mean - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_eval_callback_saves_first_best_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let best_dir = dir.path().join("best_model");
        let log_dir = best_dir.join("logs");
        let model = stub_model();
        let train_env = StubEnv::new(1, 2);
        let mut cb = EvalCallback::new(
            Box::new(StubEnv::new(1, 2).with_episode_len(4)),
            &best_dir,
            &log_dir,
            200,
            2,
        );

        let ctx = StepContext {
            num_timesteps: 200,
            env: &train_env,
            model: &model,
        };
        assert!(cb.on_step(&ctx));
        assert!(best_dir.join("best_model.bin").exists());
        assert!(log_dir.join("evaluations.jsonl").exists());

        // Same mean reward again: recorded, but not a new best.
        std::fs::remove_file(best_dir.join("best_model.bin")).unwrap();
        let ctx = StepContext {
            num_timesteps: 400,
            env: &train_env,
            model: &model,
        };
        assert!(cb.on_step(&ctx));
        assert!(!best_dir.join("best_model.bin").exists());
        let records = std::fs::read_to_string(log_dir.join("evaluations.jsonl")).unwrap();
        assert_eq!(records.lines().count(), 2);
    }

    #[test]
    fn test_eval_callback_saves_training_stats_on_new_best() {
        let dir = tempfile::tempdir().unwrap();
        let best_dir = dir.path().join("best_model");
        let model = stub_model();
        let train_env = VecNormalize::new(
            Box::new(StubEnv::new(1, 2)),
            true,
            true,
            DEFAULT_CLIP_OBS,
        );
        let mut cb = EvalCallback::new(
            Box::new(StubEnv::new(1, 2).with_episode_len(4)),
            &best_dir,
            best_dir.join("logs"),
            200,
            2,
        );

        let ctx = StepContext {
            num_timesteps: 200,
            env: &train_env,
            model: &model,
        };
        cb.on_step(&ctx);
        assert!(best_dir.join(VECNORMALIZE_FILE).exists());
    }
}
