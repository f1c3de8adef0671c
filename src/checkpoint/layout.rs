//! Checkpoint directory layout.
//!
//! A model directory's basename doubles as the artifact base filename, and
//! existing artifacts are never overwritten: colliding saves probe `_1`,
//! `_2`, ... until a free path is found.

use std::path::{Path, PathBuf};

use crate::error::CheckpointError;

/// Extension of a persisted model artifact.
pub const MODEL_EXT: &str = "bin";

/// Filename of the normalization statistics saved next to a model artifact.
pub const VECNORMALIZE_FILE: &str = "vecnormalize.json";

/// Base filename for artifacts in `model_dir` (the directory's own name).
pub fn artifact_base(model_dir: &Path) -> Result<String, CheckpointError> {
    model_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CheckpointError::InvalidModelDir(model_dir.to_path_buf()))
}

/// First unused artifact path in `model_dir`: the base path when free,
/// otherwise the lowest unused `_<n>` suffix.
pub fn next_free_path(model_dir: &Path) -> Result<PathBuf, CheckpointError> {
    let base = artifact_base(model_dir)?;
    let mut candidate = model_dir.join(format!("{base}.{MODEL_EXT}"));
    let mut suffix = 1;
    while candidate.exists() {
        candidate = model_dir.join(format!("{base}_{suffix}.{MODEL_EXT}"));
        suffix += 1;
    }
    Ok(candidate)
}

/// Path of the normalization statistics sibling inside `model_dir`.
pub fn stats_path(model_dir: &Path) -> PathBuf {
    model_dir.join(VECNORMALIZE_FILE)
}

/// Metadata sibling of a model artifact (same stem, `.json`).
pub fn metadata_path(artifact: &Path) -> PathBuf {
    artifact.with_extension("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_artifact_base_is_directory_name() {
        assert_eq!(artifact_base(Path::new("runs/run42")).unwrap(), "run42");
    }

    #[test]
    fn test_artifact_base_rejects_rootless_path() {
        assert!(matches!(
            artifact_base(Path::new("/")),
            Err(CheckpointError::InvalidModelDir(_))
        ));
    }

    #[test]
    fn test_next_free_path_without_collision() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("run1");
        fs::create_dir_all(&model_dir).unwrap();

        let path = next_free_path(&model_dir).unwrap();
        assert_eq!(path, model_dir.join("run1.bin"));
    }

    #[test]
    fn test_next_free_path_skips_existing_base() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("run1");
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(model_dir.join("run1.bin"), b"x").unwrap();

        let path = next_free_path(&model_dir).unwrap();
        assert_eq!(path, model_dir.join("run1_1.bin"));
    }

    #[test]
    fn test_next_free_path_skips_base_and_first_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("run1");
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(model_dir.join("run1.bin"), b"x").unwrap();
        fs::write(model_dir.join("run1_1.bin"), b"x").unwrap();

        let path = next_free_path(&model_dir).unwrap();
        assert_eq!(path, model_dir.join("run1_2.bin"));
    }

    #[test]
    fn test_metadata_path_shares_stem() {
        assert_eq!(
            metadata_path(Path::new("runs/run1/run1_2.bin")),
            PathBuf::from("runs/run1/run1_2.json")
        );
    }
}
