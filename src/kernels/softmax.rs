// Q16.16 fixed-point softmax driven by a 256-entry exponential table.
//
// x_i is clamped to +-32767 and lifted to Q16.16, delta_i = x_i - max is
// clamped to [-8.0, 0] and mapped onto the table, and the looked-up values
// are normalised against their sum with two guard bits dropped.

use super::{expect_len, KernelScratch};
use crate::error::{Error, Result};
use crate::isa::{ElemWidth, XReg, LANES};
use crate::vector::{Coprocessor, VectorUnit};

/// Longest vector either softmax accepts.
pub const SOFTMAX_CAPACITY: usize = 1024;
pub const EXP_TABLE_LEN: usize = 256;

const Q_ONE: i64 = 1 << 16;
const LOGIT_MAX: i64 = 32767;
const DELTA_FLOOR: i64 = -8 * Q_ONE;
const SAFE_SHIFT: u32 = 2;
/// (delta + 8.0) * 255 / 8.0 is a right shift by 19 on the Q16.16 value
const INDEX_SHIFT: i32 = 19;
/// round(e^(-8/255) * 2^32)
const EXP_STEP_Q32: u64 = 4_162_314_925;

/// Build the Q16.16 table of exp(-8 + 8*i/255).
///
/// Entry 255 is 1.0; each lower entry is the next one times e^(-8/255),
/// rounded to nearest in integer arithmetic.
pub fn exp_table() -> [i32; EXP_TABLE_LEN] {
  let mut table = [0i32; EXP_TABLE_LEN];
  let mut value = Q_ONE as u64;
  table[EXP_TABLE_LEN - 1] = value as i32;
  for slot in table.iter_mut().rev().skip(1) {
    value = (value * EXP_STEP_Q32 + (1 << 31)) >> 32;
    *slot = value as i32;
  }
  table
}

/// Host work arrays, sized once for [`SOFTMAX_CAPACITY`].
#[derive(Debug, Clone)]
pub struct SoftmaxScratch {
  index: Vec<usize>,
  exp: Vec<i64>,
}

impl SoftmaxScratch {
  pub fn new() -> Self {
    Self {
      index: Vec::with_capacity(SOFTMAX_CAPACITY),
      exp: Vec::with_capacity(SOFTMAX_CAPACITY),
    }
  }
}

impl Default for SoftmaxScratch {
  fn default() -> Self {
    Self::new()
  }
}

fn check_capacity(len: usize) {
  if len > SOFTMAX_CAPACITY {
    log::error!("softmax length {} exceeds capacity {}", len, SOFTMAX_CAPACITY);
    panic!("softmax length {} exceeds capacity {}", len, SOFTMAX_CAPACITY);
  }
}

fn lift(logit: i32) -> i64 {
  (logit as i64).clamp(-LOGIT_MAX, LOGIT_MAX) << 16
}

/// Table index for a lifted value against the lifted maximum.
pub fn table_index(shifted: i64, max: i64) -> usize {
  let delta = (shifted - max).clamp(DELTA_FLOOR, 0);
  (((delta - DELTA_FLOOR) * (EXP_TABLE_LEN as i64 - 1)) / -DELTA_FLOOR).clamp(0, EXP_TABLE_LEN as i64 - 1) as usize
}

/// Look up, sum and normalise. `scratch.index` is already filled.
fn normalise(scratch: &mut SoftmaxScratch, lookup: impl Fn(usize) -> Result<i32>) -> Result<Vec<i32>> {
  scratch.exp.clear();
  let mut sum: i64 = 0;
  for &idx in &scratch.index {
    let e = (lookup(idx)? as i64) >> SAFE_SHIFT;
    scratch.exp.push(e);
    sum += e;
  }
  let sum = sum.max(1);
  Ok(scratch.exp.iter().map(|&e| ((e * Q_ONE) / sum) as i32).collect())
}

/// Softmax over host slices; `lut` is the 256-entry table.
///
/// Panics when `src` is longer than [`SOFTMAX_CAPACITY`].
pub fn softmax(src: &[i32], dst: &mut [i32], lut: &[i32], scratch: &mut SoftmaxScratch) -> Result<()> {
  check_capacity(src.len());
  expect_len("dst", dst.len(), src.len())?;
  expect_len("lut", lut.len(), EXP_TABLE_LEN)?;
  if src.is_empty() {
    return Ok(());
  }

  let max = src.iter().map(|&v| lift(v)).max().unwrap_or(i64::MIN);
  scratch.index.clear();
  scratch.index.extend(src.iter().map(|&v| table_index(lift(v), max)));
  let out = normalise(scratch, |idx| Ok(lut[idx]))?;
  dst.copy_from_slice(&out);
  Ok(())
}

/// Softmax over device memory.
///
/// The clamp, lift, running maximum and index computation run on the vector
/// unit in 8-element chunks, staged through `kscratch.patch()`; table
/// lookups and the division are done on the host.
pub fn softmax_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  kscratch: &KernelScratch,
  src: u64,
  dst: u64,
  lut: u64,
  len: usize,
  scratch: &mut SoftmaxScratch,
) -> Result<()> {
  check_capacity(len);
  let width = ElemWidth::B32;
  let bytes = len * width.bytes();
  kscratch.check_patch(bytes)?;
  for (addr, size) in [(src, bytes), (dst, bytes), (lut, EXP_TABLE_LEN * 4)] {
    if !vu.mem().contains(addr, size) {
      return Err(Error::OutOfBounds { addr, len: size });
    }
  }
  if len == 0 {
    return Ok(());
  }

  let staged = kscratch.patch();
  let at = |base: u64, i: usize| base + (i * width.bytes()) as u64;
  let full = len / LANES * LANES;

  let lease = vu.lease(5, 2)?;
  let (xp, xa, xb, xc, xd) = (lease.x(0), lease.x(1), lease.x(2), lease.x(3), lease.x(4));
  let (vt, vmax) = (lease.v(0), lease.v(1));

  // Pass 1: clamp, lift to Q16.16, track the maximum
  vu.set_x(xa, LOGIT_MAX as u64);
  vu.set_x(xb, (-LOGIT_MAX) as u64);
  vu.set_x(xc, Q_ONE as u64);
  vu.splat(vmax, xd, i64::MIN);
  for i in (0..full).step_by(LANES) {
    vu.load_at(vt, xp, at(src, i), width, LANES, true);
    vu.vmin_vx(vt, vt, xa);
    vu.vmax_vx(vt, vt, xb);
    vu.vmul_vx(vt, vt, xc);
    vu.store_at(vt, xp, at(staged, i), width, LANES);
    vu.vredmax_vs(vmax, vt, vmax);
  }
  vu.store_at(vmax, xp, kscratch.lanes(), ElemWidth::B64, 1);

  let result = (|| -> Result<()> {
    let mut max: i64 = vu.mem().read(kscratch.lanes())?;
    for i in full..len {
      let shifted = lift(vu.mem().read(at(src, i))?);
      vu.mem_mut().write(at(staged, i), shifted as i32)?;
      max = max.max(shifted);
    }

    // Pass 2: delta, clamp to [-8.0, 0], rescale to a table index
    vu.set_x(xa, max as u64);
    vu.set_x(xb, DELTA_FLOOR as u64);
    vu.set_x(xc, (-DELTA_FLOOR) as u64);
    vu.set_x(xd, EXP_TABLE_LEN as u64 - 1);
    for i in (0..full).step_by(LANES) {
      vu.load_at(vt, xp, at(staged, i), width, LANES, true);
      vu.vsub_vx(vt, vt, xa);
      vu.vmax_vx(vt, vt, xb);
      vu.vmin_vx(vt, vt, XReg::ZERO);
      vu.vadd_vx(vt, vt, xc);
      vu.vmul_vx(vt, vt, xd);
      vu.vsra_vi(vt, vt, INDEX_SHIFT);
      vu.vsx(vt, xp, width, LANES);
    }

    scratch.index.clear();
    for i in 0..full {
      let idx: i32 = vu.mem().read(at(staged, i))?;
      scratch.index.push(idx as usize);
    }
    for i in full..len {
      let shifted: i32 = vu.mem().read(at(staged, i))?;
      scratch.index.push(table_index(shifted as i64, max));
    }

    let mem = vu.mem();
    let out = normalise(scratch, |idx| mem.read(at(lut, idx)))?;
    vu.mem_mut().write_slice(dst, &out)
  })();

  vu.release(lease);
  result
}
