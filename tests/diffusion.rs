use simple_diffusion::{
    models::ZeroDenoiser,
    noise::{NoiseSource, SeededNoise},
    schedulers::{LogSnrSchedule, PredObjective},
    DiffusionError, GaussianDiffusion, GaussianDiffusionConfig,
};
use std::cell::Cell;
use std::ops::ControlFlow;
use tch::{Device, Kind, Tensor};

fn config(pred_objective: PredObjective) -> GaussianDiffusionConfig {
    GaussianDiffusionConfig {
        image_size: 8,
        channels: 1,
        pred_objective,
        num_sample_steps: 4,
        ..Default::default()
    }
}

fn sigmoid(x: f64) -> f64 {
    1. / (1. + (-x).exp())
}

#[test]
fn sampling_with_a_zero_denoiser() {
    let diffusion = GaussianDiffusion::new(ZeroDenoiser, config(PredObjective::Noise)).unwrap();
    assert_eq!(diffusion.sample_times(), vec![1., 0.75, 0.5, 0.25, 0.]);

    let images = diffusion.sample(3, &mut SeededNoise::new(0)).unwrap();
    assert_eq!(images.size(), vec![3, 1, 8, 8]);
    assert!(images.min().double_value(&[]) >= 0.);
    assert!(images.max().double_value(&[]) <= 1.);
}

#[test]
fn sampling_chain_matches_the_recurrence() {
    // With a zero noise prediction x_start = clamp(x / alpha), replay the
    // chain by hand with the same random draws.
    let diffusion = GaussianDiffusion::new(ZeroDenoiser, config(PredObjective::Noise)).unwrap();
    let images = diffusion.sample(2, &mut SeededNoise::new(5)).unwrap();

    let schedule = LogSnrSchedule::default();
    let mut rng = SeededNoise::new(5);
    // The sampler draws single precision noise.
    let opts = (Kind::Float, Device::Cpu);
    let mut xs = rng.randn(&[2, 1, 8, 8], opts).to_kind(Kind::Double);
    for times in [1f64, 0.75, 0.5, 0.25, 0.].windows(2) {
        let (l, l_next) = (schedule.log_snr(times[0]), schedule.log_snr(times[1]));
        let c = 1. - (l - l_next).exp();
        let (alpha, alpha_next) = (sigmoid(l).sqrt(), sigmoid(l_next).sqrt());
        let x_start = (&xs / alpha).clamp(-1., 1.);
        let mean = alpha_next * (&xs * ((1. - c) / alpha) + c * x_start);
        xs = if times[1] == 0. {
            mean
        } else {
            let eps = rng.randn(&[2, 1, 8, 8], opts).to_kind(Kind::Double);
            mean + eps * (sigmoid(-l_next) * c).sqrt()
        };
    }
    let expected = (xs.clamp(-1., 1.) + 1.) * 0.5;
    let diff = (images.to_kind(Kind::Double) - expected).abs().max().double_value(&[]);
    assert!(diff < 1e-4, "max diff {diff}");
}

#[test]
fn sampling_is_a_function_of_the_seed() {
    let diffusion = GaussianDiffusion::new(ZeroDenoiser, config(PredObjective::Velocity)).unwrap();
    let a = diffusion.sample(2, &mut SeededNoise::new(42)).unwrap();
    let b = diffusion.sample(2, &mut SeededNoise::new(42)).unwrap();
    let c = diffusion.sample(2, &mut SeededNoise::new(43)).unwrap();
    assert!(a.equal(&b));
    assert!(!a.equal(&c));
}

#[test]
fn sampling_can_be_cancelled() {
    let calls = Cell::new(0);
    let denoiser = |xs: &Tensor, _: &Tensor| {
        calls.set(calls.get() + 1);
        xs.zeros_like()
    };
    let diffusion = GaussianDiffusion::new(denoiser, config(PredObjective::Noise)).unwrap();
    let result = diffusion.p_sample_loop_with_hook(
        &[1, 1, 8, 8],
        &mut SeededNoise::new(0),
        |step, _, _| if step == 2 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) },
    );
    assert!(matches!(result, Err(DiffusionError::Cancelled { step: 2, num_steps: 4 })));
    assert_eq!(calls.get(), 2);
}

#[test]
fn loss_against_constant_images() {
    // Images at 0.5 normalize to zero, so the noised sample is noise * sigma
    // and an identity denoiser scores (sigma - 1)^2 * noise^2.
    let identity = |xs: &Tensor, _: &Tensor| xs.shallow_clone();
    let diffusion = GaussianDiffusion::new(identity, config(PredObjective::Noise)).unwrap();
    let img = Tensor::full([2, 1, 8, 8], 0.5, (Kind::Double, Device::Cpu));
    let x_start = simple_diffusion::utils::normalize_to_neg_one_to_one(&img);
    assert_eq!(x_start.abs().max().double_value(&[]), 0.);

    let noise = Tensor::full([2, 1, 8, 8], 0.5, (Kind::Double, Device::Cpu));
    let times = Tensor::from_slice(&[0.25f64, 0.75]);
    let loss = diffusion.p_losses(&x_start, &times, Some(&noise), &mut SeededNoise::new(0)).unwrap();

    let schedule = LogSnrSchedule::default();
    let expected = [0.25, 0.75]
        .iter()
        .map(|&t| {
            let sigma = sigmoid(-schedule.log_snr(t)).sqrt();
            (sigma - 1.).powi(2) * 0.25
        })
        .sum::<f64>()
        / 2.;
    assert!((loss.double_value(&[]) - expected).abs() < 1e-9);
}

#[test]
fn velocity_loss_is_scored_against_the_noise() {
    let identity = |xs: &Tensor, _: &Tensor| xs.shallow_clone();
    let v = GaussianDiffusion::new(identity, config(PredObjective::Velocity)).unwrap();
    let eps = GaussianDiffusion::new(identity, config(PredObjective::Noise)).unwrap();
    let mut rng = SeededNoise::new(9);
    let opts = (Kind::Double, Device::Cpu);
    let x_start = rng.randn(&[2, 1, 8, 8], opts).clamp(-1., 1.);
    let noise = rng.randn(&[2, 1, 8, 8], opts);
    let times = Tensor::from_slice(&[0.1f64, 0.6]);
    let loss_v = v.p_losses(&x_start, &times, Some(&noise), &mut rng).unwrap();
    let loss_eps = eps.p_losses(&x_start, &times, Some(&noise), &mut rng).unwrap();
    assert!(loss_v.equal(&loss_eps));

    // The velocity target itself is still available.
    let log_snr = v.log_snr().log_snr_tensor(&times);
    let target = v.training_target(&x_start, &noise, &log_snr);
    let (alpha, sigma) = v.log_snr().alpha_sigma(0.1);
    let expected = noise.get(0) * alpha - x_start.get(0) * sigma;
    assert!((target.get(0) - expected).abs().max().double_value(&[]) < 1e-9);
}

#[test]
fn compute_loss_rejects_mismatched_shapes() {
    let calls = Cell::new(0);
    let denoiser = |xs: &Tensor, _: &Tensor| {
        calls.set(calls.get() + 1);
        xs.zeros_like()
    };
    let diffusion = GaussianDiffusion::new(denoiser, config(PredObjective::Velocity)).unwrap();
    let mut rng = SeededNoise::new(1);
    for shape in [[2, 1, 8, 4], [2, 1, 4, 8], [2, 3, 8, 8]] {
        let img = Tensor::zeros(shape, (Kind::Float, Device::Cpu));
        assert!(matches!(
            diffusion.compute_loss(&img, &mut rng),
            Err(DiffusionError::ShapeMismatch { .. })
        ));
    }
    assert_eq!(calls.get(), 0);

    let img = Tensor::full([2, 1, 8, 8], 0.5, (Kind::Float, Device::Cpu));
    let loss = diffusion.compute_loss_value(&img, &mut rng).unwrap();
    assert!(loss.is_finite() && loss > 0.);
    assert_eq!(calls.get(), 1);
}

#[test]
fn shifted_and_interpolated_diffusions_sample() {
    let shifted = GaussianDiffusionConfig { noise_d: Some(2.), ..config(PredObjective::Noise) };
    let interpolated = GaussianDiffusionConfig {
        noise_d_low: Some(2.),
        noise_d_high: Some(32.),
        ..config(PredObjective::Velocity)
    };
    for cfg in [shifted, interpolated] {
        let diffusion = GaussianDiffusion::new(ZeroDenoiser, cfg).unwrap();
        let images = diffusion.sample(1, &mut SeededNoise::new(3)).unwrap();
        assert_eq!(images.size(), vec![1, 1, 8, 8]);
        assert!(images.sum(Kind::Double).double_value(&[]).is_finite());
    }
}
