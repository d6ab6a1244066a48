use tch::{nn, Tensor};

#[derive(Debug, Clone, Copy)]
pub struct ResnetBlockConfig {
    pub out_channels: Option<i64>,
    pub temb_channels: Option<i64>,
    pub groups: i64,
    pub eps: f64,
}

impl Default for ResnetBlockConfig {
    fn default() -> Self {
        Self { out_channels: None, temb_channels: Some(128), groups: 8, eps: 1e-5 }
    }
}

/// Residual block where the embedding modulates the first normalized
/// activations with a scale and a shift.
#[derive(Debug)]
pub struct ResnetBlock {
    norm1: nn::GroupNorm,
    conv1: nn::Conv2D,
    norm2: nn::GroupNorm,
    conv2: nn::Conv2D,
    time_emb_proj: Option<nn::Linear>,
    conv_shortcut: Option<nn::Conv2D>,
}

impl ResnetBlock {
    pub fn new(vs: nn::Path, in_channels: i64, config: ResnetBlockConfig) -> Self {
        let out_channels = config.out_channels.unwrap_or(in_channels);
        let conv_cfg = nn::ConvConfig { stride: 1, padding: 1, ..Default::default() };
        let group_cfg = nn::GroupNormConfig { eps: config.eps, affine: true, ..Default::default() };
        let conv1 = nn::conv2d(&vs / "conv1", in_channels, out_channels, 3, conv_cfg);
        let norm1 = nn::group_norm(&vs / "norm1", config.groups, out_channels, group_cfg);
        let conv2 = nn::conv2d(&vs / "conv2", out_channels, out_channels, 3, conv_cfg);
        let norm2 = nn::group_norm(&vs / "norm2", config.groups, out_channels, group_cfg);
        let conv_shortcut = if in_channels != out_channels {
            let conv_cfg = nn::ConvConfig { stride: 1, padding: 0, ..Default::default() };
            Some(nn::conv2d(&vs / "conv_shortcut", in_channels, out_channels, 1, conv_cfg))
        } else {
            None
        };
        // scale and shift
        let time_emb_proj = config.temb_channels.map(|temb_channels| {
            nn::linear(&vs / "time_emb_proj", temb_channels, 2 * out_channels, Default::default())
        });
        Self { norm1, conv1, norm2, conv2, time_emb_proj, conv_shortcut }
    }

    pub fn forward(&self, xs: &Tensor, temb: Option<&Tensor>) -> Tensor {
        let shortcut_xs = match &self.conv_shortcut {
            Some(conv_shortcut) => xs.apply(conv_shortcut),
            None => xs.shallow_clone(),
        };
        let hs = xs.apply(&self.conv1).apply(&self.norm1);
        let hs = match (temb, &self.time_emb_proj) {
            (Some(temb), Some(time_emb_proj)) => {
                let scale_shift = temb.silu().apply(time_emb_proj).unsqueeze(-1).unsqueeze(-1);
                let chunks = scale_shift.chunk(2, 1);
                hs * (&chunks[0] + 1.) + &chunks[1]
            }
            _ => hs,
        };
        let hs = hs.silu().apply(&self.conv2).apply(&self.norm2).silu();
        shortcut_xs + hs
    }
}
