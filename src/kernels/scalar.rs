// Scalar reference kernels over host slices.
//
// These define the exact integer results the vectorized kernels must
// reproduce, down to the wraparound of the accumulators.

use super::{expect_len, scale_clip_i16, scale_clip_i32};
use crate::error::{Error, Result};

/// Output spatial size of a stride-1, unpadded KxK window.
pub fn conv_out_dims(h: usize, w: usize, k: usize) -> Result<(usize, usize)> {
  if k == 0 || k > h || k > w {
    return Err(Error::Shape(format!("kernel {}x{} does not fit a {}x{} input", k, k, h, w)));
  }
  Ok((h - k + 1, w - k + 1))
}

/// Weights are already in [N, K*K*C] layout; this is a plain copy.
pub fn im2col_weight_i8(weight: &[i8], col: &mut [i8], n: usize, c: usize, k: usize) -> Result<()> {
  let size = n * k * k * c;
  expect_len("weight", weight.len(), size)?;
  expect_len("col", col.len(), size)?;
  col.copy_from_slice(weight);
  Ok(())
}

/// Unfold a channel-last image into B[K*K*C, H_out*W_out], row-major.
///
/// Row index runs kh, kw, c; column index is the output pixel.
pub fn im2col_input_i8(img: &[i8], col: &mut [i8], c: usize, h: usize, w: usize, k: usize) -> Result<()> {
  let (h_out, w_out) = conv_out_dims(h, w, k)?;
  let n_patches = h_out * w_out;
  expect_len("img", img.len(), h * w * c)?;
  expect_len("col", col.len(), k * k * c * n_patches)?;

  for ho in 0..h_out {
    for wo in 0..w_out {
      let patch_col = ho * w_out + wo;
      let mut matrix_row = 0;
      for kh in 0..k {
        for kw in 0..k {
          let pixel = ((ho + kh) * w + (wo + kw)) * c;
          for ch in 0..c {
            col[matrix_row * n_patches + patch_col] = img[pixel + ch];
            matrix_row += 1;
          }
        }
      }
    }
  }
  Ok(())
}

fn check_matmul<A, B, C>(a: &[A], b: &[B], c: &[C], m: usize, n: usize, k: usize) -> Result<()> {
  expect_len("A", a.len(), m * k)?;
  expect_len("B", b.len(), k * n)?;
  expect_len("C", c.len(), m * n)
}

fn dot_i8(a: &[i8], b: &[i8], row: usize, col: usize, n: usize, k: usize) -> i32 {
  let mut sum: i32 = 0;
  for kk in 0..k {
    sum = sum.wrapping_add(a[row * k + kk] as i32 * b[kk * n + col] as i32);
  }
  sum
}

fn dot_wide<T: Copy + Into<i64>>(a: &[T], b: &[T], row: usize, col: usize, n: usize, k: usize) -> i64 {
  let mut sum: i64 = 0;
  for kk in 0..k {
    sum = sum.wrapping_add(a[row * k + kk].into().wrapping_mul(b[kk * n + col].into()));
  }
  sum
}

/// C[M,N] = clamp((A[M,K] * B[K,N]) / scale, 0, 32767)
pub fn matmul_i8_scale_clip(
  a: &[i8],
  b: &[i8],
  c: &mut [i16],
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<()> {
  check_matmul(a, b, c, m, n, k)?;
  for row in 0..m {
    for col in 0..n {
      c[row * n + col] = scale_clip_i16(dot_i8(a, b, row, col, n, k), scale);
    }
  }
  Ok(())
}

/// Same as `matmul_i8_scale_clip`, stored channel-last: C[n * M + m].
pub fn matmul_i8_scale_clip_nhwc(
  a: &[i8],
  b: &[i8],
  c: &mut [i16],
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<()> {
  check_matmul(a, b, c, m, n, k)?;
  for col in 0..n {
    for row in 0..m {
      c[col * m + row] = scale_clip_i16(dot_i8(a, b, row, col, n, k), scale);
    }
  }
  Ok(())
}

/// 64-bit accumulation, clamp to the i32 range.
pub fn matmul_i16_scale_clip(
  a: &[i16],
  b: &[i16],
  c: &mut [i32],
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<()> {
  check_matmul(a, b, c, m, n, k)?;
  for row in 0..m {
    for col in 0..n {
      c[row * n + col] = scale_clip_i32(dot_wide(a, b, row, col, n, k), scale);
    }
  }
  Ok(())
}

pub fn matmul_i32_scale_clip(
  a: &[i32],
  b: &[i32],
  c: &mut [i32],
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<()> {
  check_matmul(a, b, c, m, n, k)?;
  for row in 0..m {
    for col in 0..n {
      c[row * n + col] = scale_clip_i32(dot_wide(a, b, row, col, n, k), scale);
    }
  }
  Ok(())
}

/// Element-wise C = A + B (wrapping).
pub fn matadd_i32(a: &[i32], b: &[i32], c: &mut [i32]) -> Result<()> {
  expect_len("B", b.len(), a.len())?;
  expect_len("C", c.len(), a.len())?;
  for ((c, &x), &y) in c.iter_mut().zip(a).zip(b) {
    *c = x.wrapping_add(y);
  }
  Ok(())
}

/// In-place bias add: data += bias.
pub fn bias_add_i32(data: &mut [i32], bias: &[i32]) -> Result<()> {
  expect_len("bias", bias.len(), data.len())?;
  for (d, &b) in data.iter_mut().zip(bias) {
    *d = d.wrapping_add(b);
  }
  Ok(())
}

pub fn relu_i16(data: &mut [i16]) {
  for v in data.iter_mut() {
    *v = (*v).max(0);
  }
}

pub fn relu_i32(data: &mut [i32]) {
  for v in data.iter_mut() {
    *v = (*v).max(0);
  }
}

/// 2x2 stride-2 max-pool over a channel-last [H, W, C] tensor.
pub fn maxpool_i16(src: &[i16], dst: &mut [i16], c: usize, h: usize, w: usize) -> Result<()> {
  let (h_out, w_out) = (h / 2, w / 2);
  expect_len("src", src.len(), h * w * c)?;
  expect_len("dst", dst.len(), h_out * w_out * c)?;
  for ho in 0..h_out {
    for wo in 0..w_out {
      for ch in 0..c {
        let at = |dh: usize, dw: usize| src[((ho * 2 + dh) * w + (wo * 2 + dw)) * c + ch];
        dst[(ho * w_out + wo) * c + ch] = at(0, 0).max(at(0, 1)).max(at(1, 0)).max(at(1, 1));
      }
    }
  }
  Ok(())
}

/// [H, W, C] -> [C, H, W]
pub fn transpose_nhwc_to_nchw_i16(src: &[i16], dst: &mut [i16], c: usize, h: usize, w: usize) -> Result<()> {
  expect_len("src", src.len(), h * w * c)?;
  expect_len("dst", dst.len(), h * w * c)?;
  for y in 0..h {
    for x in 0..w {
      for ch in 0..c {
        dst[ch * h * w + y * w + x] = src[(y * w + x) * c + ch];
      }
    }
  }
  Ok(())
}

/// [M, N] -> [N, M]
pub fn transpose_i8(src: &[i8], dst: &mut [i8], m: usize, n: usize) -> Result<()> {
  expect_len("src", src.len(), m * n)?;
  expect_len("dst", dst.len(), m * n)?;
  for row in 0..m {
    for col in 0..n {
      dst[col * m + row] = src[row * n + col];
    }
  }
  Ok(())
}

pub fn flatten_i16(src: &[i16], dst: &mut [i16]) -> Result<()> {
  expect_len("dst", dst.len(), src.len())?;
  dst.copy_from_slice(src);
  Ok(())
}
