// Vectorized kernels over device memory.
//
// Operands are device addresses. Each kernel leases its registers from the
// unit's arena for the duration of the call and stages through the caller's
// `KernelScratch`. Results are bit-identical to `kernels::scalar`.

use super::scalar::conv_out_dims;
use super::{scale_clip_i16, scale_clip_i32, KernelScratch};
use crate::arch::{Dram, Element};
use crate::error::{Error, Result};
use crate::isa::{ElemWidth, XReg, LANES};
use crate::vector::{Coprocessor, Lease, VectorUnit};

fn check_device(mem: &Dram, addr: u64, len: usize) -> Result<()> {
  if !mem.contains(addr, len) {
    return Err(Error::OutOfBounds { addr, len });
  }
  Ok(())
}

fn check_tensor<T: Element>(mem: &Dram, addr: u64, count: usize) -> Result<()> {
  check_device(mem, addr, count * T::WIDTH.bytes())
}

fn elem(addr: u64, index: usize, width: ElemWidth) -> u64 {
  addr + (index * width.bytes()) as u64
}

/// Run `body` with a fresh lease and hand the registers back on every path.
fn with_lease<D, R>(
  vu: &mut VectorUnit<D>,
  nx: usize,
  nv: usize,
  body: impl FnOnce(&mut VectorUnit<D>, &Lease) -> Result<R>,
) -> Result<R>
where
  D: Coprocessor,
{
  let lease = vu.lease(nx, nv)?;
  let result = body(vu, &lease);
  vu.release(lease);
  result
}

/// Dot products of every A row with every B column.
///
/// Full 8-element chunks go through vmul + vredsum into a seeded
/// accumulator; the K remainder is summed on the host. Rows whose address is
/// not 8-byte aligned are copied to `scratch.stage()` first. `emit` receives
/// the exact 64-bit sum for (row, col).
fn dot_products<T, D>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  a: u64,
  b: u64,
  (m, n, k): (usize, usize, usize),
  mut emit: impl FnMut(&mut Dram, usize, usize, i64) -> Result<()>,
) -> Result<()>
where
  T: Element,
  D: Coprocessor,
{
  scratch.check_k(k)?;
  check_tensor::<T>(vu.mem(), a, m * k)?;
  check_tensor::<T>(vu.mem(), b, k * n)?;
  let width = T::WIDTH;
  let row_bytes = k * width.bytes();
  let full = k / LANES * LANES;

  with_lease(vu, 3, 4, |vu, lease| {
    let (xa, xb, xo) = (lease.x(0), lease.x(1), lease.x(2));
    let (va, vb, vt, vacc) = (lease.v(0), lease.v(1), lease.v(2), lease.v(3));
    vu.set_x(xo, scratch.lanes());

    for row in 0..m {
      let row_addr = elem(a, row * k, width);
      let a_row = if row_addr & 7 != 0 {
        vu.mem_mut().copy_within(row_addr, scratch.stage(), row_bytes)?;
        scratch.stage()
      } else {
        row_addr
      };

      for col in 0..n {
        for kk in 0..k {
          let value: T = vu.mem().read(elem(b, kk * n + col, width))?;
          vu.mem_mut().write(elem(scratch.col(), kk, width), value)?;
        }

        vu.vmv_v_x(vacc, XReg::ZERO);
        for kk in (0..full).step_by(LANES) {
          vu.load_at(va, xa, elem(a_row, kk, width), width, LANES, true);
          vu.load_at(vb, xb, elem(scratch.col(), kk, width), width, LANES, true);
          vu.vmul_vv(vt, va, vb);
          vu.vredsum_vs(vacc, vt, vacc);
        }
        vu.vsx(vacc, xo, ElemWidth::B64, 1);
        let mut sum: i64 = vu.mem().read(scratch.lanes())?;

        for kk in full..k {
          let x: T = vu.mem().read(elem(a_row, kk, width))?;
          let y: T = vu.mem().read(elem(scratch.col(), kk, width))?;
          sum = sum.wrapping_add(x.to_i64().wrapping_mul(y.to_i64()));
        }
        emit(vu.mem_mut(), row, col, sum)?;
      }
    }
    Ok(())
  })
}

#[allow(clippy::too_many_arguments)]
pub fn matmul_i8_scale_clip_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  a: u64,
  b: u64,
  c: u64,
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<()> {
  check_tensor::<i16>(vu.mem(), c, m * n)?;
  dot_products::<i8, D>(vu, scratch, a, b, (m, n, k), |mem, row, col, sum| {
    mem.write(elem(c, row * n + col, ElemWidth::B16), scale_clip_i16(sum as i32, scale))
  })?;
  log::info!("matmul_i8_scale_clip_vec: {}x{}x{} scale={} cycles={}", m, n, k, scale, vu.cycles());
  Ok(())
}

/// Channel-last output: C[col * M + row].
#[allow(clippy::too_many_arguments)]
pub fn matmul_i8_scale_clip_nhwc_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  a: u64,
  b: u64,
  c: u64,
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<()> {
  check_tensor::<i16>(vu.mem(), c, m * n)?;
  dot_products::<i8, D>(vu, scratch, a, b, (m, n, k), |mem, row, col, sum| {
    mem.write(elem(c, col * m + row, ElemWidth::B16), scale_clip_i16(sum as i32, scale))
  })
}

#[allow(clippy::too_many_arguments)]
pub fn matmul_i16_scale_clip_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  a: u64,
  b: u64,
  c: u64,
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<()> {
  check_tensor::<i32>(vu.mem(), c, m * n)?;
  dot_products::<i16, D>(vu, scratch, a, b, (m, n, k), |mem, row, col, sum| {
    mem.write(elem(c, row * n + col, ElemWidth::B32), scale_clip_i32(sum, scale))
  })
}

#[allow(clippy::too_many_arguments)]
pub fn matmul_i32_scale_clip_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  a: u64,
  b: u64,
  c: u64,
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<()> {
  check_tensor::<i32>(vu.mem(), c, m * n)?;
  dot_products::<i32, D>(vu, scratch, a, b, (m, n, k), |mem, row, col, sum| {
    mem.write(elem(c, row * n + col, ElemWidth::B32), scale_clip_i32(sum, scale))
  })
}

/// Copy `len` elements of `width` in 8-element chunks, the tail on the host.
fn copy_chunks<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  lease: &Lease,
  src: u64,
  dst: u64,
  len: usize,
  width: ElemWidth,
) -> Result<()> {
  let (xs, xd, v) = (lease.x(0), lease.x(1), lease.v(0));
  let full = len / LANES * LANES;
  for i in (0..full).step_by(LANES) {
    vu.load_at(v, xs, elem(src, i, width), width, LANES, false);
    vu.store_at(v, xd, elem(dst, i, width), width, LANES);
  }
  let tail = (len - full) * width.bytes();
  if tail > 0 {
    vu.mem_mut().copy_within(elem(src, full, width), elem(dst, full, width), tail)?;
  }
  Ok(())
}

/// C = A + B over `len` i32 elements; C may alias A or B.
pub fn matadd_i32_vec<D: Coprocessor>(vu: &mut VectorUnit<D>, a: u64, b: u64, c: u64, len: usize) -> Result<()> {
  for addr in [a, b, c] {
    check_tensor::<i32>(vu.mem(), addr, len)?;
  }
  let width = ElemWidth::B32;
  let full = len / LANES * LANES;
  with_lease(vu, 3, 3, |vu, lease| {
    let (va, vb, vc) = (lease.v(0), lease.v(1), lease.v(2));
    for i in (0..full).step_by(LANES) {
      vu.load_at(va, lease.x(0), elem(a, i, width), width, LANES, true);
      vu.load_at(vb, lease.x(1), elem(b, i, width), width, LANES, true);
      vu.vadd_vv(vc, va, vb);
      vu.store_at(vc, lease.x(2), elem(c, i, width), width, LANES);
    }
    Ok(())
  })?;
  for i in full..len {
    let x: i32 = vu.mem().read(elem(a, i, width))?;
    let y: i32 = vu.mem().read(elem(b, i, width))?;
    vu.mem_mut().write(elem(c, i, width), x.wrapping_add(y))?;
  }
  Ok(())
}

pub fn bias_add_i32_vec<D: Coprocessor>(vu: &mut VectorUnit<D>, data: u64, bias: u64, len: usize) -> Result<()> {
  matadd_i32_vec(vu, data, bias, data, len)
}

fn relu_vec<T: Element, D: Coprocessor>(vu: &mut VectorUnit<D>, data: u64, len: usize) -> Result<()> {
  check_tensor::<T>(vu.mem(), data, len)?;
  let width = T::WIDTH;
  let full = len / LANES * LANES;
  with_lease(vu, 1, 1, |vu, lease| {
    let (x, v) = (lease.x(0), lease.v(0));
    for i in (0..full).step_by(LANES) {
      let addr = elem(data, i, width);
      vu.load_at(v, x, addr, width, LANES, true);
      vu.vmax_vx(v, v, XReg::ZERO);
      vu.vsx(v, x, width, LANES);
    }
    Ok(())
  })?;
  for i in full..len {
    let addr = elem(data, i, width);
    let value: T = vu.mem().read(addr)?;
    if value.to_i64() < 0 {
      vu.mem_mut().write(addr, T::default())?;
    }
  }
  Ok(())
}

pub fn relu_i16_vec<D: Coprocessor>(vu: &mut VectorUnit<D>, data: u64, len: usize) -> Result<()> {
  relu_vec::<i16, D>(vu, data, len)
}

pub fn relu_i32_vec<D: Coprocessor>(vu: &mut VectorUnit<D>, data: u64, len: usize) -> Result<()> {
  relu_vec::<i32, D>(vu, data, len)
}

/// 2x2 stride-2 max-pool over channel-last i16, eight channels per step.
pub fn maxpool_i16_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  src: u64,
  dst: u64,
  c: usize,
  h: usize,
  w: usize,
) -> Result<()> {
  let (h_out, w_out) = (h / 2, w / 2);
  check_tensor::<i16>(vu.mem(), src, h * w * c)?;
  check_tensor::<i16>(vu.mem(), dst, h_out * w_out * c)?;
  let width = ElemWidth::B16;
  let full = c / LANES * LANES;

  with_lease(vu, 5, 7, |vu, lease| {
    for ho in 0..h_out {
      for wo in 0..w_out {
        let window = |dh: usize, dw: usize, ch: usize| elem(src, ((ho * 2 + dh) * w + (wo * 2 + dw)) * c + ch, width);
        let out = |ch: usize| elem(dst, (ho * w_out + wo) * c + ch, width);

        for ch in (0..full).step_by(LANES) {
          vu.load_at(lease.v(0), lease.x(0), window(0, 0, ch), width, LANES, true);
          vu.load_at(lease.v(1), lease.x(1), window(0, 1, ch), width, LANES, true);
          vu.load_at(lease.v(2), lease.x(2), window(1, 0, ch), width, LANES, true);
          vu.load_at(lease.v(3), lease.x(3), window(1, 1, ch), width, LANES, true);
          vu.vmax_vv(lease.v(4), lease.v(0), lease.v(1));
          vu.vmax_vv(lease.v(5), lease.v(2), lease.v(3));
          vu.vmax_vv(lease.v(6), lease.v(4), lease.v(5));
          vu.store_at(lease.v(6), lease.x(4), out(ch), width, LANES);
        }

        for ch in full..c {
          let mut best: i16 = vu.mem().read(window(0, 0, ch))?;
          for (dh, dw) in [(0, 1), (1, 0), (1, 1)] {
            best = best.max(vu.mem().read(window(dh, dw, ch))?);
          }
          vu.mem_mut().write(out(ch), best)?;
        }
      }
    }
    Ok(())
  })
}

// The unit has no strided or per-lane store, so the transposes move their
// elements with host accesses to device memory.

pub fn transpose_nhwc_to_nchw_i16_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  src: u64,
  dst: u64,
  c: usize,
  h: usize,
  w: usize,
) -> Result<()> {
  check_tensor::<i16>(vu.mem(), src, h * w * c)?;
  check_tensor::<i16>(vu.mem(), dst, h * w * c)?;
  let mem = vu.mem_mut();
  for ch in 0..c {
    for pixel in 0..h * w {
      let value: i16 = mem.read(elem(src, pixel * c + ch, ElemWidth::B16))?;
      mem.write(elem(dst, ch * h * w + pixel, ElemWidth::B16), value)?;
    }
  }
  Ok(())
}

pub fn transpose_i8_vec<D: Coprocessor>(vu: &mut VectorUnit<D>, src: u64, dst: u64, m: usize, n: usize) -> Result<()> {
  check_tensor::<i8>(vu.mem(), src, m * n)?;
  check_tensor::<i8>(vu.mem(), dst, m * n)?;
  let mem = vu.mem_mut();
  for row in 0..m {
    for col in 0..n {
      let value: i8 = mem.read(src + (row * n + col) as u64)?;
      mem.write(dst + (col * m + row) as u64, value)?;
    }
  }
  Ok(())
}

/// Copy; a no-op when `src == dst`.
pub fn flatten_i16_vec<D: Coprocessor>(vu: &mut VectorUnit<D>, src: u64, dst: u64, len: usize) -> Result<()> {
  if src == dst {
    return Ok(());
  }
  check_tensor::<i16>(vu.mem(), src, len)?;
  check_tensor::<i16>(vu.mem(), dst, len)?;
  with_lease(vu, 2, 1, |vu, lease| copy_chunks(vu, lease, src, dst, len, ElemWidth::B16))
}

pub fn im2col_weight_i8_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  weight: u64,
  col: u64,
  n: usize,
  c: usize,
  k: usize,
) -> Result<()> {
  if weight == col {
    return Ok(());
  }
  let size = n * k * k * c;
  check_tensor::<i8>(vu.mem(), weight, size)?;
  check_tensor::<i8>(vu.mem(), col, size)?;
  with_lease(vu, 2, 1, |vu, lease| copy_chunks(vu, lease, weight, col, size, ElemWidth::B8))
}

/// Unfold into B[K*K*C, H_out*W_out].
///
/// Each patch's channel runs are copied patch-major into `scratch.patch()`
/// with wide loads and stores, then the staging matrix is transposed into
/// `col`.
#[allow(clippy::too_many_arguments)]
pub fn im2col_input_i8_vec<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  img: u64,
  col: u64,
  c: usize,
  h: usize,
  w: usize,
  k: usize,
) -> Result<()> {
  let (h_out, w_out) = conv_out_dims(h, w, k)?;
  let n_patches = h_out * w_out;
  let kernel_dim = k * k * c;
  scratch.check_patch(n_patches * kernel_dim)?;
  check_tensor::<i8>(vu.mem(), img, h * w * c)?;
  check_tensor::<i8>(vu.mem(), col, kernel_dim * n_patches)?;
  let staging = scratch.patch();

  with_lease(vu, 2, 1, |vu, lease| {
    for ho in 0..h_out {
      for wo in 0..w_out {
        let mut dst = staging + ((ho * w_out + wo) * kernel_dim) as u64;
        for kh in 0..k {
          for kw in 0..k {
            let pixel = img + (((ho + kh) * w + (wo + kw)) * c) as u64;
            copy_chunks(vu, lease, pixel, dst, c, ElemWidth::B8)?;
            dst += c as u64;
          }
        }
      }
    }
    Ok(())
  })?;
  transpose_i8_vec(vu, staging, col, n_patches, kernel_dim)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::Machine;
  use crate::kernels::scalar;
  use crate::simulator::config::DeviceSection;

  struct Rig {
    vu: VectorUnit<Machine>,
    scratch: KernelScratch,
  }

  fn rig() -> Rig {
    let mut machine = Machine::new(Dram::new(0x10_0000, 1 << 18), DeviceSection::default());
    let scratch = KernelScratch::new(machine.memory_mut(), 64, 4096).unwrap();
    Rig {
      vu: VectorUnit::new(machine),
      scratch,
    }
  }

  #[test]
  fn test_matmul_i8_matches_scalar_with_remainder() {
    let mut r = rig();
    let (m, n, k) = (3usize, 5usize, 11usize);
    let a: Vec<i8> = (0..m * k).map(|i| (i * 29 + 7) as i8).collect();
    let b: Vec<i8> = (0..k * n).map(|i| ((i * 13) as i8).wrapping_sub(60)).collect();
    let mut want = vec![0i16; m * n];
    scalar::matmul_i8_scale_clip(&a, &b, &mut want, m, n, k, 3).unwrap();

    let ra = r.vu.mem_mut().upload(&a, 8).unwrap();
    let rb = r.vu.mem_mut().upload(&b, 8).unwrap();
    let rc = r.vu.mem_mut().alloc(m * n * 2, 8).unwrap();
    matmul_i8_scale_clip_vec(&mut r.vu, &r.scratch, ra.addr, rb.addr, rc.addr, m, n, k, 3).unwrap();
    assert_eq!(r.vu.mem().read_slice::<i16>(rc.addr, m * n).unwrap(), want);
    assert_eq!(r.vu.arena().leased(), (0, 0));
  }

  #[test]
  fn test_k_over_scratch_is_rejected() {
    let mut r = rig();
    let err = matmul_i32_scale_clip_vec(&mut r.vu, &r.scratch, 0x10_0000, 0x10_0000, 0x10_0000, 1, 1, 65, 0);
    assert!(matches!(err, Err(Error::ScratchCapacity { needed: 65, .. })));
    assert_eq!(r.vu.issued(), 0);
  }

  #[test]
  fn test_relu_and_bias_tail() {
    let mut r = rig();
    let data: Vec<i32> = (0..13).map(|i| i * 7 - 40).collect();
    let bias: Vec<i32> = (0..13).map(|i| 3 - i).collect();
    let rd = r.vu.mem_mut().upload(&data, 8).unwrap();
    let rbias = r.vu.mem_mut().upload(&bias, 8).unwrap();

    let mut want = data.clone();
    scalar::bias_add_i32(&mut want, &bias).unwrap();
    scalar::relu_i32(&mut want);
    bias_add_i32_vec(&mut r.vu, rd.addr, rbias.addr, 13).unwrap();
    relu_i32_vec(&mut r.vu, rd.addr, 13).unwrap();
    assert_eq!(r.vu.mem().read_slice::<i32>(rd.addr, 13).unwrap(), want);
  }

  #[test]
  fn test_flatten_in_place_issues_nothing() {
    let mut r = rig();
    flatten_i16_vec(&mut r.vu, 0x10_0000, 0x10_0000, 100).unwrap();
    assert_eq!(r.vu.issued(), 0);
  }

  #[test]
  fn test_im2col_input_matches_scalar() {
    let mut r = rig();
    let (c, h, w, k) = (3usize, 5usize, 4usize, 3usize);
    let img: Vec<i8> = (0..c * h * w).map(|i| (i as i8).wrapping_mul(5)).collect();
    let (ho, wo) = conv_out_dims(h, w, k).unwrap();
    let mut want = vec![0i8; k * k * c * ho * wo];
    scalar::im2col_input_i8(&img, &mut want, c, h, w, k).unwrap();

    let rimg = r.vu.mem_mut().upload(&img, 8).unwrap();
    let rcol = r.vu.mem_mut().alloc(want.len(), 8).unwrap();
    im2col_input_i8_vec(&mut r.vu, &r.scratch, rimg.addr, rcol.addr, c, h, w, k).unwrap();
    assert_eq!(r.vu.mem().read_slice::<i8>(rcol.addr, want.len()).unwrap(), want);
  }
}
