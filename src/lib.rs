//! # Simple diffusion
//!
//! Continuous time Gaussian diffusion in Rust using Torch via
//! [tch-rs](https://github.com/LaurentMazare/tch-rs), following the simple
//! diffusion recipe of Hoogeboom et al.
//!
//! This library includes:
//! - Cosine log-SNR schedules, with resolution dependent shifting and
//!   interpolation.
//! - The variance preserving forward process and its training loss, for
//!   models predicting either the noise or the velocity.
//! - An ancestral sampler running the reverse process from pure noise.
//!
//! The denoising network is pluggable through the [`models::Denoiser`] trait.

pub mod error;
pub mod models;
pub mod noise;
pub mod pipelines;
pub mod schedulers;
pub mod utils;

pub use error::{DiffusionError, Result};
pub use pipelines::gaussian_diffusion::{GaussianDiffusion, GaussianDiffusionConfig};
