//! A small convolutional denoiser conditioned on log-SNR.
//!
//! This is a lightweight stand-in for the U-ViT of the simple diffusion
//! paper: a stack of residual blocks at full resolution with no attention and
//! no down-sampling. It is mostly useful for smoke tests and demos.
use super::embeddings::{LogSnrEmbedding, LogSnrMlp};
use super::resnet::{ResnetBlock, ResnetBlockConfig};
use super::Denoiser;
use tch::{nn, nn::Module, Tensor};

#[derive(Debug, Clone, Copy)]
pub struct SimpleDenoiserConfig {
    pub dim: i64,
    pub num_blocks: usize,
    pub groups: i64,
    pub sinusoidal_dim: i64,
}

impl Default for SimpleDenoiserConfig {
    fn default() -> Self {
        Self { dim: 32, num_blocks: 2, groups: 8, sinusoidal_dim: 16 }
    }
}

#[derive(Debug)]
pub struct SimpleDenoiser {
    log_snr_emb: LogSnrEmbedding,
    log_snr_mlp: LogSnrMlp,
    conv_in: nn::Conv2D,
    blocks: Vec<ResnetBlock>,
    conv_out: nn::Conv2D,
}

impl SimpleDenoiser {
    pub fn new(vs: nn::Path, channels: i64, config: SimpleDenoiserConfig) -> Self {
        let time_dim = config.dim * 4;
        let log_snr_emb = LogSnrEmbedding::new(config.sinusoidal_dim, 10000.);
        let log_snr_mlp = LogSnrMlp::new(&vs / "log_snr_mlp", log_snr_emb.out_dim(), time_dim);
        let conv_cfg = nn::ConvConfig { padding: 1, ..Default::default() };
        let conv_in = nn::conv2d(&vs / "conv_in", channels, config.dim, 3, conv_cfg);
        let block_cfg = ResnetBlockConfig {
            out_channels: None,
            temb_channels: Some(time_dim),
            groups: config.groups,
            ..Default::default()
        };
        let vs_b = &vs / "blocks";
        let blocks = (0..config.num_blocks)
            .map(|i| ResnetBlock::new(&vs_b / i, config.dim, block_cfg))
            .collect();
        let conv_out = nn::conv2d(&vs / "conv_out", config.dim, channels, 3, conv_cfg);
        Self { log_snr_emb, log_snr_mlp, conv_in, blocks, conv_out }
    }

    pub fn forward(&self, xs: &Tensor, log_snr: &Tensor) -> Tensor {
        let temb = self.log_snr_emb.forward(log_snr).to_kind(xs.kind()).apply(&self.log_snr_mlp);
        let mut hs = xs.apply(&self.conv_in);
        for block in self.blocks.iter() {
            hs = block.forward(&hs, Some(&temb));
        }
        hs.apply(&self.conv_out)
    }
}

impl Denoiser for SimpleDenoiser {
    fn predict(&self, xs: &Tensor, log_snr: &Tensor) -> Tensor {
        self.forward(xs, log_snr)
    }
}
