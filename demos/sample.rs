// Unconditional sampling with the continuous time Gaussian diffusion.
//
// The denoiser is the small convolutional model from `models::simple`. Without
// `--weights` it is randomly initialized, which is enough to exercise the
// sampler but will not produce meaningful images. Trained weights can be
// loaded from a tch `.ot` file:
//
//   cargo run --release --example sample --features clap,tracing-subscriber -- \
//     --weights data/simple_denoiser.ot --image-size 32 --channels 3 --n-steps 250
//
// The diffusion settings can also be read from a TOML file with `--config`,
// e.g.
//
//   image_size = 64
//   channels = 3
//   pred_objective = "v"
//   noise_d = 32.0
//   num_sample_steps = 500
use clap::Parser;
use simple_diffusion::{
    models::simple::{SimpleDenoiser, SimpleDenoiserConfig},
    noise::{NoiseSource, SeededNoise, TorchNoise},
    schedulers::PredObjective,
    GaussianDiffusion, GaussianDiffusionConfig,
};
use std::ops::ControlFlow;
use tch::{nn, Device, Kind, Tensor};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Diffusion configuration file, the other diffusion flags are ignored when set.
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Weights for the denoiser.
    #[arg(long, value_name = "FILE")]
    weights: Option<String>,

    /// When set, use the CPU even if some CUDA devices are available.
    #[arg(long)]
    cpu: bool,

    #[arg(long, default_value_t = 32)]
    image_size: i64,

    #[arg(long, default_value_t = 3)]
    channels: i64,

    /// The prediction objective, `v` or `eps`.
    #[arg(long, default_value = "v")]
    objective: String,

    /// Shift the noise schedule to this resolution.
    #[arg(long)]
    noise_d: Option<f64>,

    /// The number of steps to run the diffusion for.
    #[arg(long, default_value_t = 100)]
    n_steps: usize,

    /// The number of images to generate.
    #[arg(long, default_value_t = 4)]
    batch_size: i64,

    /// The hidden width of the denoiser.
    #[arg(long, default_value_t = 32)]
    dim: i64,

    /// Seed for the noise, libtorch's global generator is used when unset.
    #[arg(long)]
    seed: Option<u64>,

    /// The name of the final image to generate.
    #[arg(long, value_name = "FILE")]
    final_image: Option<String>,
}

fn diffusion_config(args: &Args) -> anyhow::Result<GaussianDiffusionConfig> {
    let config = match &args.config {
        Some(path) => GaussianDiffusionConfig::from_file(path)?,
        None => GaussianDiffusionConfig {
            image_size: args.image_size,
            channels: args.channels,
            pred_objective: args.objective.parse::<PredObjective>()?,
            noise_d: args.noise_d,
            num_sample_steps: args.n_steps,
            ..Default::default()
        },
    };
    Ok(config)
}

fn run(args: &Args, noise: &mut impl NoiseSource) -> anyhow::Result<()> {
    let device = if args.cpu { Device::Cpu } else { Device::cuda_if_available() };
    let config = diffusion_config(args)?;

    let mut vs = nn::VarStore::new(device);
    let denoiser_cfg = SimpleDenoiserConfig { dim: args.dim, ..Default::default() };
    let denoiser = SimpleDenoiser::new(vs.root(), config.channels, denoiser_cfg);
    if let Some(weights) = &args.weights {
        vs.load(weights)?;
    } else {
        tracing::warn!("no weights provided, sampling with a randomly initialized denoiser");
    }

    let diffusion = GaussianDiffusion::new(denoiser, config)?.with_device(device);
    let images = diffusion.p_sample_loop_with_hook(
        &[
            args.batch_size,
            diffusion.config().channels,
            diffusion.config().image_size,
            diffusion.config().image_size,
        ],
        noise,
        |step, num_steps, _| {
            if step % 50 == 0 {
                tracing::info!("sampling step {step}/{num_steps}");
            }
            ControlFlow::Continue(())
        },
    )?;

    // Lay the batch out horizontally: [C, H, B * W].
    let images = images.to_device(Device::Cpu);
    let grid = Tensor::cat(&images.unbind(0), -1);
    let grid = (grid * 255.).round().to_kind(Kind::Uint8);
    let final_image = args.final_image.clone().unwrap_or("sample.png".to_string());
    tch::vision::image::save(&grid, &final_image)?;
    tracing::info!("wrote {final_image}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    tracing::info!("Cuda available: {}", tch::Cuda::is_available());
    match args.seed {
        Some(seed) => run(&args, &mut SeededNoise::new(seed)),
        None => run(&args, &mut TorchNoise),
    }
}
