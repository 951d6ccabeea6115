//! Pit-stop hazard estimation: lap features, 2-step transitions, a QR-DQN
//! value model, Platt calibration and a recall-weighted alert threshold.

pub mod artifact;
pub mod calibrate;
pub mod config;
pub mod error;
pub mod features;
pub mod inference;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod priors;
pub mod records;
pub mod rolling;
pub mod threshold;
pub mod trainer;
pub mod transitions;

pub use artifact::{ArtifactPaths, LoadedModel, MetricsRecord, ModelMeta};
pub use calibrate::PlattCalibration;
pub use config::TrainConfig;
pub use error::{Error, Result};
pub use features::{FeatureBuilder, FeatureLayout, FeatureMatrix};
pub use inference::{within_three, HazardModel, HazardScore};
pub use records::{read_laps, Compound, GroupKey, LapRecord};
pub use rolling::{DriverRollingState, LiveFeatureState};
pub use threshold::ThresholdChoice;
pub use trainer::Trainer;
pub use transitions::Transition;
