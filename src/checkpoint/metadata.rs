use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::CheckpointError;

/// Hyperparameters recorded next to a saved model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SacHyperparameters {
    pub discount_factor: f64,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub step_size: f64,
    pub total_timesteps: u64,
}

/// Metadata written as the `.json` sibling of a model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub algorithm: String,
    pub timestep: u64,
    pub timestamp: u64,
    pub success_rate: f32,
    pub normalize: bool,
    pub hyperparameters: SacHyperparameters,
}

impl CheckpointMetadata {
    /// Describe a run at `timestep` under `config`, stamped with the current
    /// wall-clock time.
    pub fn for_run(config: &AppConfig, timestep: u64, success_rate: f32) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        CheckpointMetadata {
            algorithm: "sac".to_string(),
            timestep,
            timestamp,
            success_rate,
            normalize: config.normalize,
            hyperparameters: SacHyperparameters {
                discount_factor: config.discount_factor,
                buffer_size: config.sac.buffer_size,
                batch_size: config.sac.batch_size,
                step_size: config.sac.step_size,
                total_timesteps: config.sac.total_timesteps,
            },
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), CheckpointError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, CheckpointError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::MetadataRead {
                path: path.to_path_buf(),
                source: e,
            })?;
        serde_json::from_str(&content).map_err(|e| CheckpointError::MetadataParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
