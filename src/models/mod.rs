//! # Models
//!
//! The diffusion process only needs a denoiser: something that, given a noisy
//! batch and the log-SNR of each batch element, predicts either the noise or
//! the velocity depending on the training objective.
use tch::Tensor;

pub mod embeddings;
pub mod resnet;
pub mod simple;

/// A denoising model conditioned on log-SNR.
///
/// `xs` has shape `[B, C, H, W]` and `log_snr` shape `[B]`, the prediction
/// must have the same shape and kind as `xs`.
pub trait Denoiser {
    fn predict(&self, xs: &Tensor, log_snr: &Tensor) -> Tensor;
}

impl<F> Denoiser for F
where
    F: Fn(&Tensor, &Tensor) -> Tensor,
{
    fn predict(&self, xs: &Tensor, log_snr: &Tensor) -> Tensor {
        self(xs, log_snr)
    }
}

/// Always predicts zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroDenoiser;

impl Denoiser for ZeroDenoiser {
    fn predict(&self, xs: &Tensor, _log_snr: &Tensor) -> Tensor {
        xs.zeros_like()
    }
}
