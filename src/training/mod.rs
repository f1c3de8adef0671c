//! Training orchestration: the callbacks the external trainer invokes each
//! step and the policy driver that owns the train/save/load loop.

pub mod callbacks;
pub mod driver;

pub use callbacks::{
    CheckpointCallback, EvalCallback, LogCadence, MetricsCallback, StepContext, TrainingCallback,
};
pub use driver::PolicyDriver;
