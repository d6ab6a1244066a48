use crate::error::{DiffusionError, Result};
use std::path::Path;
use tch::Tensor;

// A simple wrapper around read_to_string adding details about the
// problematic file.
pub(crate) fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
    std::fs::read_to_string(path.as_ref()).map_err(|source| DiffusionError::Io {
        path: path.as_ref().to_string_lossy().into_owned(),
        source,
    })
}

/// Maps pixel values from `[0, 1]` to `[-1, 1]`.
pub fn normalize_to_neg_one_to_one(img: &Tensor) -> Tensor {
    img * 2. - 1.
}

/// Maps values from `[-1, 1]` back to `[0, 1]`.
pub fn unnormalize_to_zero_to_one(xs: &Tensor) -> Tensor {
    (xs + 1.) * 0.5
}

/// Appends singleton dimensions to `t` until it has the same rank as `xs`,
/// so that a per-batch value broadcasts over the remaining dimensions.
pub fn right_pad_dims_to(xs: &Tensor, t: &Tensor) -> Tensor {
    let padding_dims = xs.dim() as i64 - t.dim() as i64;
    if padding_dims <= 0 {
        return t.shallow_clone();
    }
    let mut shape = t.size();
    shape.extend(std::iter::repeat(1).take(padding_dims as usize));
    t.view(shape.as_slice())
}
