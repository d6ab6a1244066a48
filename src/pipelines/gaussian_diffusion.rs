//! # Continuous time Gaussian diffusion
//!
//! Variance preserving diffusion driven by a continuous log-SNR schedule, with
//! ancestral sampling and a denoising training loss.
//!
//! simple diffusion: end-to-end diffusion for high resolution images,
//! E. Hoogeboom et al, 2023. https://arxiv.org/abs/2301.11093
use crate::error::{DiffusionError, Result};
use crate::models::Denoiser;
use crate::noise::NoiseSource;
use crate::schedulers::{logsnr::sigmoid, LogSnrSchedule, PredObjective};
use crate::utils::{normalize_to_neg_one_to_one, right_pad_dims_to, unnormalize_to_zero_to_one};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::path::Path;
use tch::{Device, Kind, Reduction, Tensor};

/// Lower bound applied to alpha whenever it is used as a divisor. With the
/// default cosine schedule alpha never goes below 5.5e-4, the floor only
/// matters for heavily shifted schedules.
pub const ALPHA_FLOOR: f64 = 1e-8;

/// The configuration of a [`GaussianDiffusion`] process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianDiffusionConfig {
    /// Height and width of the generated images, also used as the reference
    /// resolution of shifted and interpolated schedules.
    pub image_size: i64,
    pub channels: i64,
    pub pred_objective: PredObjective,
    /// The base schedule, before any shift or interpolation.
    pub noise_schedule: LogSnrSchedule,
    /// Shift the schedule to this resolution.
    pub noise_d: Option<f64>,
    /// Interpolate between the schedules shifted to these two resolutions.
    pub noise_d_low: Option<f64>,
    pub noise_d_high: Option<f64>,
    /// Number of transitions of the reverse chain.
    pub num_sample_steps: usize,
    /// Not consulted by the sampler, the denoised estimate is always clamped
    /// to `[-1, 1]`.
    pub clip_sample_denoised: bool,
}

impl Default for GaussianDiffusionConfig {
    fn default() -> Self {
        Self {
            image_size: 64,
            channels: 3,
            pred_objective: PredObjective::Velocity,
            noise_schedule: LogSnrSchedule::default(),
            noise_d: None,
            noise_d_low: None,
            noise_d_high: None,
            num_sample_steps: 500,
            clip_sample_denoised: true,
        }
    }
}

impl GaussianDiffusionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&crate::utils::read_to_string(path)?)
    }

    /// Checks the configuration and builds the resulting log-SNR schedule.
    pub fn log_snr_schedule(&self) -> Result<LogSnrSchedule> {
        if self.image_size <= 0 || self.channels <= 0 {
            return Err(DiffusionError::InvalidConfig(format!(
                "image_size and channels must be positive, got {} and {}",
                self.image_size, self.channels
            )));
        }
        if self.num_sample_steps == 0 {
            return Err(DiffusionError::InvalidConfig("num_sample_steps must be positive".into()));
        }
        for d in [self.noise_d, self.noise_d_low, self.noise_d_high].into_iter().flatten() {
            if !(d.is_finite() && d > 0.) {
                return Err(DiffusionError::InvalidConfig(format!(
                    "noise resolutions must be positive, got {d}"
                )));
            }
        }
        let image_d = self.image_size as f64;
        let base = self.noise_schedule.clone();
        match (self.noise_d, self.noise_d_low, self.noise_d_high) {
            (None, None, None) => Ok(base),
            (Some(noise_d), None, None) => Ok(LogSnrSchedule::shifted(base, image_d, noise_d)),
            (Some(_), _, _) => Err(DiffusionError::ConflictingSchedule),
            (None, Some(low), Some(high)) => {
                Ok(LogSnrSchedule::interpolated(base, image_d, low, high))
            }
            (None, _, _) => Err(DiffusionError::IncompleteInterpolation),
        }
    }
}

/// A Gaussian diffusion process wrapping a denoising model.
#[derive(Debug)]
pub struct GaussianDiffusion<D> {
    model: D,
    log_snr: LogSnrSchedule,
    device: Device,
    config: GaussianDiffusionConfig,
}

impl<D: Denoiser> GaussianDiffusion<D> {
    pub fn new(model: D, config: GaussianDiffusionConfig) -> Result<Self> {
        let log_snr = config.log_snr_schedule()?;
        tracing::info!(
            image_size = config.image_size,
            channels = config.channels,
            objective = ?config.pred_objective,
            num_sample_steps = config.num_sample_steps,
            schedule = ?log_snr,
            "created gaussian diffusion"
        );
        Ok(Self { model, log_snr, device: Device::Cpu, config })
    }

    /// Sets the device on which the sampler draws its initial noise.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// The validated configuration, fixed at construction.
    pub fn config(&self) -> &GaussianDiffusionConfig {
        &self.config
    }

    pub fn model(&self) -> &D {
        &self.model
    }

    /// The schedule after shift or interpolation.
    pub fn log_snr(&self) -> &LogSnrSchedule {
        &self.log_snr
    }

    fn predict(&self, xs: &Tensor, log_snr: &Tensor) -> Result<Tensor> {
        let pred = self.model.predict(xs, log_snr);
        if pred.size() != xs.size() {
            return Err(DiffusionError::PredictionShape { expected: xs.size(), actual: pred.size() });
        }
        Ok(pred)
    }

    /// The mean and variance of `p(x_{t_next} | x_t)`.
    pub fn p_mean_variance(&self, xs: &Tensor, time: f64, time_next: f64) -> Result<(Tensor, f64)> {
        let log_snr = self.log_snr.log_snr(time);
        let log_snr_next = self.log_snr.log_snr(time_next);
        let c = -(log_snr - log_snr_next).exp_m1();

        let (squared_alpha, squared_alpha_next) = (sigmoid(log_snr), sigmoid(log_snr_next));
        let (squared_sigma, squared_sigma_next) = (sigmoid(-log_snr), sigmoid(-log_snr_next));
        let (alpha, sigma, alpha_next) =
            (squared_alpha.sqrt(), squared_sigma.sqrt(), squared_alpha_next.sqrt());
        let alpha_denom = alpha.max(ALPHA_FLOOR);

        let batch_log_snr = Tensor::full([xs.size()[0]], log_snr, (xs.kind(), xs.device()));
        let pred = self.predict(xs, &batch_log_snr)?;

        let x_start = match self.config.pred_objective {
            PredObjective::Velocity => alpha * xs - sigma * pred,
            PredObjective::Noise => (xs - sigma * pred) / alpha_denom,
        };
        let x_start = x_start.clamp(-1., 1.);

        let model_mean = alpha_next * (xs * ((1. - c) / alpha_denom) + c * x_start);
        let posterior_variance = squared_sigma_next * c;
        Ok((model_mean, posterior_variance))
    }

    /// A single ancestral step from `time` to `time_next`. No noise is added
    /// on the final step, when `time_next` is zero.
    pub fn p_sample(
        &self,
        xs: &Tensor,
        time: f64,
        time_next: f64,
        noise: &mut impl NoiseSource,
    ) -> Result<Tensor> {
        let _no_grad_guard = tch::no_grad_guard();
        let (model_mean, model_variance) = self.p_mean_variance(xs, time, time_next)?;
        tracing::debug!(time, time_next, model_variance, "ancestral step");
        if time_next == 0. {
            return Ok(model_mean);
        }
        let eps = noise.randn_like(xs);
        Ok(model_mean + eps * model_variance.sqrt())
    }

    /// The discretization of the reverse chain, from 1 down to 0.
    pub fn sample_times(&self) -> Vec<f64> {
        let n = self.config.num_sample_steps;
        (0..=n).map(|i| 1. - i as f64 / n as f64).collect()
    }

    pub fn p_sample_loop(&self, shape: &[i64], noise: &mut impl NoiseSource) -> Result<Tensor> {
        self.p_sample_loop_with_hook(shape, noise, |_, _, _| ControlFlow::Continue(()))
    }

    /// Runs the reverse chain, calling `hook(step, num_steps, xs)` before each
    /// transition. Returning `ControlFlow::Break` cancels the sampling.
    /// The result is mapped to `[0, 1]`.
    pub fn p_sample_loop_with_hook<F>(
        &self,
        shape: &[i64],
        noise: &mut impl NoiseSource,
        mut hook: F,
    ) -> Result<Tensor>
    where
        F: FnMut(usize, usize, &Tensor) -> ControlFlow<()>,
    {
        if shape.iter().any(|&d| d < 0) {
            return Err(DiffusionError::InvalidConfig(format!(
                "sample shape must be non-negative, got {shape:?}"
            )));
        }
        let _no_grad_guard = tch::no_grad_guard();
        let steps = self.sample_times();
        let num_steps = self.config.num_sample_steps;
        let mut img = noise.randn(shape, (Kind::Float, self.device));
        for (i, times) in steps.windows(2).enumerate() {
            if let ControlFlow::Break(()) = hook(i, num_steps, &img) {
                tracing::info!(step = i, num_steps, "sampling cancelled");
                return Err(DiffusionError::Cancelled { step: i, num_steps });
            }
            img = self.p_sample(&img, times[0], times[1], noise)?;
        }
        Ok(unnormalize_to_zero_to_one(&img.clamp(-1., 1.)))
    }

    /// Generates `batch_size` images with values in `[0, 1]`.
    pub fn sample(&self, batch_size: i64, noise: &mut impl NoiseSource) -> Result<Tensor> {
        let GaussianDiffusionConfig { channels, image_size, .. } = self.config;
        self.p_sample_loop(&[batch_size, channels, image_size, image_size], noise)
    }

    /// Noises `x_start` up to `times`, returns the noised sample and the
    /// log-SNR at `times`.
    pub fn q_sample(
        &self,
        x_start: &Tensor,
        times: &Tensor,
        noise: Option<&Tensor>,
        noise_source: &mut impl NoiseSource,
    ) -> (Tensor, Tensor) {
        let noise = match noise {
            Some(noise) => noise.shallow_clone(),
            None => noise_source.randn_like(x_start),
        };
        let log_snr = self.log_snr.log_snr_tensor(times);
        let log_snr_padded = right_pad_dims_to(x_start, &log_snr);
        let (alpha, sigma) = alpha_sigma(&log_snr_padded);
        let x_noised = x_start * alpha + noise * sigma;
        (x_noised, log_snr)
    }

    /// The regression target for the configured objective.
    pub fn training_target(&self, x_start: &Tensor, noise: &Tensor, log_snr: &Tensor) -> Tensor {
        match self.config.pred_objective {
            PredObjective::Velocity => {
                let (alpha, sigma) = alpha_sigma(&right_pad_dims_to(x_start, log_snr));
                alpha * noise - sigma * x_start
            }
            PredObjective::Noise => noise.shallow_clone(),
        }
    }

    /// The denoising loss on a normalized batch.
    ///
    /// The prediction is always scored against the noise, including with the
    /// velocity objective where the velocity target is computed but unused.
    pub fn p_losses(
        &self,
        x_start: &Tensor,
        times: &Tensor,
        noise: Option<&Tensor>,
        noise_source: &mut impl NoiseSource,
    ) -> Result<Tensor> {
        let noise = match noise {
            Some(noise) => noise.shallow_clone(),
            None => noise_source.randn_like(x_start),
        };
        let (xs, log_snr) = self.q_sample(x_start, times, Some(&noise), noise_source);
        let model_out = self.predict(&xs, &log_snr)?;
        let _target = self.training_target(x_start, &noise, &log_snr);
        Ok(model_out.mse_loss(&noise, Reduction::Mean))
    }

    fn check_shape(&self, img: &Tensor) -> Result<()> {
        let size = img.size();
        let GaussianDiffusionConfig { channels, image_size, .. } = self.config;
        let matches = matches!(
            size.as_slice(),
            [_, c, h, w] if *c == channels && *h == image_size && *w == image_size
        );
        if !matches {
            return Err(DiffusionError::ShapeMismatch { channels, image_size, actual: size });
        }
        Ok(())
    }

    /// The training loss for a batch of images with values in `[0, 1]`, with
    /// one uniformly drawn time per image.
    pub fn compute_loss(&self, img: &Tensor, noise_source: &mut impl NoiseSource) -> Result<Tensor> {
        self.check_shape(img)?;
        let img = normalize_to_neg_one_to_one(img);
        let times = noise_source.uniform(&[img.size()[0]], (Kind::Float, img.device()));
        let loss = self.p_losses(&img, &times, None, noise_source)?;
        tracing::trace!(loss = ?loss, "computed training loss");
        Ok(loss)
    }

    pub fn compute_loss_value(
        &self,
        img: &Tensor,
        noise_source: &mut impl NoiseSource,
    ) -> Result<f64> {
        let loss = self.compute_loss(img, noise_source)?;
        Ok(f64::try_from(loss)?)
    }
}

fn alpha_sigma(log_snr: &Tensor) -> (Tensor, Tensor) {
    (log_snr.sigmoid().sqrt(), log_snr.neg().sigmoid().sqrt())
}
