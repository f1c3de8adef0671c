mod layout;
mod metadata;

pub use layout::{
    artifact_base, metadata_path, next_free_path, stats_path, MODEL_EXT, VECNORMALIZE_FILE,
};
pub use metadata::{CheckpointMetadata, SacHyperparameters};
