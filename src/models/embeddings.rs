use tch::{nn, nn::Module, Kind, Tensor};

/// Two layer perceptron projecting the sinusoidal features.
#[derive(Debug)]
pub struct LogSnrMlp {
    linear_1: nn::Linear,
    linear_2: nn::Linear,
}

impl LogSnrMlp {
    // act_fn: "gelu"
    pub fn new(vs: nn::Path, channel: i64, time_embed_dim: i64) -> Self {
        let linear_cfg = Default::default();
        let linear_1 = nn::linear(&vs / "linear_1", channel, time_embed_dim, linear_cfg);
        let linear_2 = nn::linear(&vs / "linear_2", time_embed_dim, time_embed_dim, linear_cfg);
        Self { linear_1, linear_2 }
    }
}

impl Module for LogSnrMlp {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.linear_1).gelu("none").apply(&self.linear_2)
    }
}

/// Sinusoidal features of the log-SNR. Unlike integer timesteps the log-SNR
/// is a real number of order ten, so the raw value is concatenated to the
/// features.
#[derive(Debug)]
pub struct LogSnrEmbedding {
    num_channels: i64,
    max_period: f64,
}

impl LogSnrEmbedding {
    pub fn new(num_channels: i64, max_period: f64) -> Self {
        Self { num_channels, max_period }
    }

    /// The number of features produced per batch element.
    pub fn out_dim(&self) -> i64 {
        2 * (self.num_channels / 2) + 1
    }
}

impl Module for LogSnrEmbedding {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let half_dim = self.num_channels / 2;
        let xs = xs.to_kind(Kind::Float);
        let exponent = Tensor::arange(half_dim, (Kind::Float, xs.device()))
            * (-f64::ln(self.max_period) / half_dim as f64);
        let freqs = exponent.exp();
        // emb = log_snr[:, None] * freqs[None, :]
        let emb = xs.unsqueeze(-1) * freqs.unsqueeze(0);
        Tensor::cat(&[xs.unsqueeze(-1), emb.sin(), emb.cos()], -1)
    }
}
