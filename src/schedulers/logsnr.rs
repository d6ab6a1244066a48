//! # Continuous log-SNR schedules
//!
//! A schedule maps a continuous time `t` in `[0, 1]` to the log signal to
//! noise ratio of the diffusion process at that time, `t = 0` being the clean
//! sample and `t = 1` pure noise. The base schedule is the cosine one, it can
//! be shifted to account for the image resolution, or interpolated between two
//! shifted versions.
//!
//! simple diffusion: end-to-end diffusion for high resolution images,
//! E. Hoogeboom et al, 2023. https://arxiv.org/abs/2301.11093
use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};

/// Default lower bound of the cosine schedule, reached at `t = 1`.
pub const LOGSNR_MIN: f64 = -15.;
/// Default upper bound of the cosine schedule, reached at `t = 0`.
pub const LOGSNR_MAX: f64 = 15.;

// Argument floor for the logarithm of the cosine schedule.
const LOG_EPS: f64 = 1e-20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogSnrSchedule {
    /// `-2 log(tan(t_min + t (t_max - t_min)))`, bounded by `[logsnr_min, logsnr_max]`.
    Cosine { logsnr_min: f64, logsnr_max: f64 },
    /// The base schedule offset by a constant.
    Shifted { base: Box<LogSnrSchedule>, shift: f64 },
    /// `t * low(t) + (1 - t) * high(t)`.
    Interpolated { low: Box<LogSnrSchedule>, high: Box<LogSnrSchedule> },
}

impl Default for LogSnrSchedule {
    fn default() -> Self {
        Self::cosine(LOGSNR_MIN, LOGSNR_MAX)
    }
}

impl LogSnrSchedule {
    pub fn cosine(logsnr_min: f64, logsnr_max: f64) -> Self {
        Self::Cosine { logsnr_min, logsnr_max }
    }

    /// Shifts `base` by `2 log(noise_d / image_d)`, so that a model trained at
    /// resolution `noise_d` sees the same amount of noise at resolution `image_d`.
    pub fn shifted(base: LogSnrSchedule, image_d: f64, noise_d: f64) -> Self {
        let shift = 2. * (noise_d / image_d).ln();
        Self::Shifted { base: Box::new(base), shift }
    }

    pub fn interpolated(
        base: LogSnrSchedule,
        image_d: f64,
        noise_d_low: f64,
        noise_d_high: f64,
    ) -> Self {
        let low = Self::shifted(base.clone(), image_d, noise_d_low);
        let high = Self::shifted(base, image_d, noise_d_high);
        Self::Interpolated { low: Box::new(low), high: Box::new(high) }
    }

    /// Evaluates the schedule at a single time point.
    pub fn log_snr(&self, t: f64) -> f64 {
        match self {
            Self::Cosine { logsnr_min, logsnr_max } => {
                let (t_min, t_max) = cosine_bounds(*logsnr_min, *logsnr_max);
                -2. * f64::tan(t_min + t * (t_max - t_min)).max(LOG_EPS).ln()
            }
            Self::Shifted { base, shift } => base.log_snr(t) + shift,
            Self::Interpolated { low, high } => t * low.log_snr(t) + (1. - t) * high.log_snr(t),
        }
    }

    /// Evaluates the schedule element-wise. The computation is carried in
    /// double precision and the result has the same kind as `t`.
    pub fn log_snr_tensor(&self, t: &Tensor) -> Tensor {
        self.log_snr_double(&t.to_kind(Kind::Double)).to_kind(t.kind())
    }

    fn log_snr_double(&self, t: &Tensor) -> Tensor {
        match self {
            Self::Cosine { logsnr_min, logsnr_max } => {
                let (t_min, t_max) = cosine_bounds(*logsnr_min, *logsnr_max);
                (t * (t_max - t_min) + t_min).tan().clamp_min(LOG_EPS).log() * -2.
            }
            Self::Shifted { base, shift } => base.log_snr_double(t) + *shift,
            Self::Interpolated { low, high } => {
                t * low.log_snr_double(t) + (1. - t) * high.log_snr_double(t)
            }
        }
    }

    /// The signal and noise coefficients at time `t`, `alpha^2 + sigma^2 = 1`.
    pub fn alpha_sigma(&self, t: f64) -> (f64, f64) {
        let log_snr = self.log_snr(t);
        (sigmoid(log_snr).sqrt(), sigmoid(-log_snr).sqrt())
    }
}

fn cosine_bounds(logsnr_min: f64, logsnr_max: f64) -> (f64, f64) {
    let t_min = f64::atan(f64::exp(-0.5 * logsnr_max));
    let t_max = f64::atan(f64::exp(-0.5 * logsnr_min));
    (t_min, t_max)
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        let e = x.exp();
        e / (1. + e)
    }
}
