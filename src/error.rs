use thiserror::Error;

/// Errors raised while configuring or running a [`crate::GaussianDiffusion`].
#[derive(Debug, Error)]
pub enum DiffusionError {
    #[error("invalid prediction objective {0:?}, expected one of `v`, `velocity`, `eps`, `noise`")]
    InvalidObjective(String),

    #[error("noise_d cannot be combined with noise_d_low/noise_d_high, pick either a shifted or an interpolated schedule")]
    ConflictingSchedule,

    #[error("both noise_d_low and noise_d_high must be set for an interpolated schedule")]
    IncompleteInterpolation,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("image batch shape mismatch: expected [B, {channels}, {image_size}, {image_size}], got {actual:?}")]
    ShapeMismatch { channels: i64, image_size: i64, actual: Vec<i64> },

    #[error("denoiser returned a prediction of shape {actual:?} for an input of shape {expected:?}")]
    PredictionShape { expected: Vec<i64>, actual: Vec<i64> },

    #[error("sampling cancelled before step {step} of {num_steps}")]
    Cancelled { step: usize, num_steps: usize },

    #[error(transparent)]
    Torch(#[from] tch::TchError),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("error opening {path}: {source}")]
    Io { path: String, source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, DiffusionError>;
