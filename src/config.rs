use std::path::Path;

use crate::error::ConfigError;

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Normalize observations (and training rewards) with running statistics.
    pub normalize: bool,
    /// Discount factor passed to the model backend.
    pub discount_factor: f64,
    /// Timestep cadence of the metrics log line. Must be > 0.
    pub log_freq: u64,
    pub sac: SacConfig,
    pub schedule: ScheduleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            normalize: true,
            discount_factor: 0.99,
            log_freq: 1000,
            sac: SacConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

/// SAC hyperparameters handed to the model backend.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SacConfig {
    pub buffer_size: usize,
    pub batch_size: usize,
    /// Learning rate.
    pub step_size: f64,
    pub total_timesteps: u64,
}

impl Default for SacConfig {
    fn default() -> Self {
        SacConfig {
            buffer_size: 1_000_000,
            batch_size: 256,
            step_size: 3e-4,
            total_timesteps: 1_000_000,
        }
    }
}

/// Cadences of the evaluation and periodic-checkpoint callbacks.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub eval_freq: u64,
    pub n_eval_episodes: usize,
    pub checkpoint_freq: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            eval_freq: 200,
            n_eval_episodes: 10,
            checkpoint_freq: 5000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(
                "config file '{}' not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_freq == 0 {
            return Err(ConfigError::Validation("log_freq must be > 0".into()));
        }
        if self.discount_factor < 0.0 || self.discount_factor > 1.0 {
            return Err(ConfigError::Validation(
                "discount_factor must be in [0, 1]".into(),
            ));
        }
        if self.sac.batch_size == 0 {
            return Err(ConfigError::Validation(
                "sac.batch_size must be > 0".into(),
            ));
        }
        if self.sac.buffer_size < self.sac.batch_size {
            return Err(ConfigError::Validation(
                "sac.buffer_size must be >= sac.batch_size".into(),
            ));
        }
        if self.sac.step_size <= 0.0 {
            return Err(ConfigError::Validation(
                "sac.step_size must be > 0".into(),
            ));
        }
        if self.sac.total_timesteps == 0 {
            return Err(ConfigError::Validation(
                "sac.total_timesteps must be > 0".into(),
            ));
        }
        if self.schedule.eval_freq == 0 {
            return Err(ConfigError::Validation(
                "schedule.eval_freq must be > 0".into(),
            ));
        }
        if self.schedule.n_eval_episodes == 0 {
            return Err(ConfigError::Validation(
                "schedule.n_eval_episodes must be > 0".into(),
            ));
        }
        if self.schedule.checkpoint_freq == 0 {
            return Err(ConfigError::Validation(
                "schedule.checkpoint_freq must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().expect("default config should be valid");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[sac]
batch_size = 64
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sac.batch_size, 64);
        // Other fields should be defaults
        assert_eq!(config.sac.buffer_size, 1_000_000);
        assert!(config.normalize);
        assert_eq!(config.log_freq, 1000);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        let default = AppConfig::default();
        assert_eq!(config.sac.batch_size, default.sac.batch_size);
        assert_eq!(config.schedule.eval_freq, default.schedule.eval_freq);
    }

    #[test]
    fn test_validation_rejects_zero_log_freq() {
        let mut config = AppConfig::default();
        config.log_freq = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_invalid_discount() {
        let mut config = AppConfig::default();
        config.discount_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_buffer_smaller_than_batch() {
        let mut config = AppConfig::default();
        config.sac.buffer_size = 100;
        config.sac.batch_size = 256;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timesteps() {
        let mut config = AppConfig::default();
        config.sac.total_timesteps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_eval_freq() {
        let mut config = AppConfig::default();
        config.schedule.eval_freq = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = AppConfig::load_or_default(Path::new("nonexistent_config.toml")).unwrap();
        assert_eq!(config.sac.batch_size, 256);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
normalize = false
log_freq = 500

[sac]
total_timesteps = 20000
"#
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert!(!config.normalize);
        assert_eq!(config.log_freq, 500);
        assert_eq!(config.sac.total_timesteps, 20000);
        // Others are defaults
        assert!((config.discount_factor - 0.99).abs() < 1e-9);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_config.toml");
        std::fs::write(&path, "log_freq = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Validation(_))
        ));
    }
}
