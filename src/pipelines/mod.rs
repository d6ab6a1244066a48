//! # Pipelines

pub mod gaussian_diffusion;
