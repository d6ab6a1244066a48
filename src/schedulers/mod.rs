//! # Noise schedules
//!
//! The continuous log-SNR schedules driving both the forward corruption
//! process and the reverse sampler.
use crate::error::DiffusionError;
use serde::{Deserialize, Serialize};

pub mod logsnr;

pub use logsnr::LogSnrSchedule;

/// What the denoising model is trained to predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PredObjective {
    /// The velocity `alpha * noise - sigma * x_start`, see section 2.4 of
    /// https://arxiv.org/abs/2202.00512
    #[default]
    #[serde(rename = "v", alias = "velocity")]
    Velocity,
    /// The noise that was added to the clean sample.
    #[serde(rename = "eps", alias = "noise")]
    Noise,
}

impl std::str::FromStr for PredObjective {
    type Err = DiffusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v" | "velocity" => Ok(Self::Velocity),
            "eps" | "noise" => Ok(Self::Noise),
            _ => Err(DiffusionError::InvalidObjective(s.to_string())),
        }
    }
}
