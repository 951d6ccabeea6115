use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tensor backend error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("unknown feature name `{0}` in layout")]
    UnknownFeature(String),

    /// Feature vector / model input width disagree. Never padded or truncated.
    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("driver {driver} in {race_id}: lap {lap} arrived after lap {last}")]
    OutOfOrderLap {
        race_id: String,
        driver: String,
        lap: u32,
        last: u32,
    },

    #[error("empty dataset: {0}")]
    EmptyDataset(&'static str),

    /// Validation labels hold a single class; AUC/AP/calibration are undefined.
    #[error("validation labels are single-class ({positives} positive of {total})")]
    DegenerateLabels { positives: usize, total: usize },

    #[error("checkpoint {path}: no known weight layout matched (tried {tried:?})")]
    UnknownCheckpoint { path: String, tried: Vec<String> },

    /// Artifact has weights but no calibration/threshold; it must not be served.
    #[error("artifact at {0} has no calibration; refusing to serve raw gaps")]
    MissingCalibration(String),

    #[error("invalid config: {0}")]
    Config(String),
}
