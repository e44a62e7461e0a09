//! Quantized tensor kernels.
//!
//! Every kernel exists twice: a scalar reference over host slices in
//! [`scalar`] and a vectorized form over device memory in [`vec`]. The two
//! must agree bit for bit on every input.

pub mod scalar;
pub mod scratch;
pub mod softmax;
pub mod vec;

pub use scratch::KernelScratch;
pub use softmax::{exp_table, softmax, softmax_vec, SoftmaxScratch, SOFTMAX_CAPACITY};

use crate::error::{Error, Result};

pub(crate) fn expect_len(what: &str, len: usize, want: usize) -> Result<()> {
  if len != want {
    return Err(Error::Shape(format!("{} has {} elements, expected {}", what, len, want)));
  }
  Ok(())
}

/// Truncating division by `scale` (0 skips it), then clamp to [0, 32767].
pub fn scale_clip_i16(sum: i32, scale: i32) -> i16 {
  let scaled = if scale != 0 { sum.wrapping_div(scale) } else { sum };
  scaled.clamp(0, i16::MAX as i32) as i16
}

/// Truncating division by `scale` (0 skips it), then clamp to the i32 range.
pub fn scale_clip_i32(sum: i64, scale: i32) -> i32 {
  let scaled = if scale != 0 { sum.wrapping_div(scale as i64) } else { sum };
  scaled.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}
