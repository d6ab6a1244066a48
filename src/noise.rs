//! # Random sources
//!
//! Every random draw of the diffusion process, the initial sampler noise, the
//! per-step ancestral noise and the training times and noise, goes through a
//! [`NoiseSource`] so that runs can be reproduced.
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use tch::{Device, Kind, Tensor};

pub trait NoiseSource {
    /// Standard normal samples of the given shape.
    fn randn(&mut self, shape: &[i64], options: (Kind, Device)) -> Tensor;

    /// Uniform samples in `[0, 1)` of the given shape.
    fn uniform(&mut self, shape: &[i64], options: (Kind, Device)) -> Tensor;

    fn randn_like(&mut self, xs: &Tensor) -> Tensor {
        self.randn(&xs.size(), (xs.kind(), xs.device()))
    }
}

/// Draws from the libtorch global generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TorchNoise;

impl TorchNoise {
    /// Reseeds the libtorch global generator, this affects every other user
    /// of that generator in the process.
    pub fn seeded(seed: i64) -> Self {
        tch::manual_seed(seed);
        Self
    }
}

impl NoiseSource for TorchNoise {
    fn randn(&mut self, shape: &[i64], options: (Kind, Device)) -> Tensor {
        Tensor::randn(shape, options)
    }

    fn uniform(&mut self, shape: &[i64], options: (Kind, Device)) -> Tensor {
        Tensor::rand(shape, options)
    }
}

/// A generator owned by the caller, reproducible across devices and
/// independent of the libtorch global state. Samples are drawn on the cpu
/// and moved to the requested device.
#[derive(Debug, Clone)]
pub struct SeededNoise {
    rng: ChaCha8Rng,
}

impl SeededNoise {
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    fn numel(shape: &[i64]) -> usize {
        shape.iter().map(|&d| d.max(0) as usize).product()
    }
}

impl NoiseSource for SeededNoise {
    fn randn(&mut self, shape: &[i64], options: (Kind, Device)) -> Tensor {
        let numel = Self::numel(shape);
        let values = if options.0 == Kind::Double {
            let values: Vec<f64> =
                (0..numel).map(|_| StandardNormal.sample(&mut self.rng)).collect();
            Tensor::from_slice(&values)
        } else {
            let values: Vec<f32> =
                (0..numel).map(|_| StandardNormal.sample(&mut self.rng)).collect();
            Tensor::from_slice(&values)
        };
        values.view(shape).to_kind(options.0).to_device(options.1)
    }

    fn uniform(&mut self, shape: &[i64], options: (Kind, Device)) -> Tensor {
        let numel = Self::numel(shape);
        let values = if options.0 == Kind::Double {
            let values: Vec<f64> = (0..numel).map(|_| self.rng.gen::<f64>()).collect();
            Tensor::from_slice(&values)
        } else {
            let values: Vec<f32> = (0..numel).map(|_| self.rng.gen::<f32>()).collect();
            Tensor::from_slice(&values)
        };
        values.view(shape).to_kind(options.0).to_device(options.1)
    }
}
