// Host tiling of an arbitrary MxNxK matmul onto the 8x8x8 array.
//
// M tiles outer, N tiles middle, K tiles inner. The output tile stays
// resident across its whole K reduction: the first K tile starts with
// accumulate=false, every later one adds into the partial sums.

use super::driver::{SystolicDriver, SystolicStats};
use super::Poller;
use crate::arch::{Dram, Element};
use crate::error::{Error, Result};
use crate::isa::{ElemWidth, TILE};
use crate::kernels::{scale_clip_i16, KernelScratch};
use crate::vector::{Coprocessor, VectorUnit};

fn check_tensor<T: Element>(mem: &Dram, addr: u64, count: usize) -> Result<()> {
  let len = count * T::WIDTH.bytes();
  if !mem.contains(addr, len) {
    return Err(Error::OutOfBounds { addr, len });
  }
  Ok(())
}

/// Drive every tile and hand each finished output element to `emit`.
///
/// An empty reduction (K = 0) never touches the array: every output is 0.
fn run_tiles<T, D>(
  drv: &mut SystolicDriver<'_, D>,
  a: u64,
  b: u64,
  (m, n, k): (usize, usize, usize),
  mut emit: impl FnMut(&mut Dram, usize, usize, i64) -> Result<()>,
) -> Result<()>
where
  T: Element,
  D: Coprocessor,
{
  let width = T::WIDTH;
  let bytes = width.bytes();
  let (tile_x, tile_w) = (drv.scratch().tile_x(), drv.scratch().tile_w());

  if k == 0 {
    let mem = drv.unit().mem_mut();
    for row in 0..m {
      for col in 0..n {
        emit(mem, row, col, 0)?;
      }
    }
    return Ok(());
  }

  for m0 in (0..m).step_by(TILE) {
    let m_size = TILE.min(m - m0);
    for n0 in (0..n).step_by(TILE) {
      let n_size = TILE.min(n - n0);
      let mut configured_k = None;

      for (kt, k0) in (0..k).step_by(TILE).enumerate() {
        let k_size = TILE.min(k - k0);
        if configured_k != Some(k_size) {
          drv.configure(m_size, n_size, k_size);
          configured_k = Some(k_size);
        }

        for kk in 0..k_size {
          // X slot: column k0+kk of the A tile, gathered and zero-padded
          let mem = drv.unit().mem_mut();
          for i in 0..TILE {
            let value = if i < m_size {
              let at = a + (((m0 + i) * k + k0 + kk) * bytes) as u64;
              mem.read::<T>(at)?.to_i64()
            } else {
              0
            };
            mem.write(tile_x + (i * 8) as u64, value)?;
          }
          drv.load_x(tile_x, ElemWidth::B64, TILE, kk);

          // W slot: row k0+kk of the B tile, contiguous in memory
          let row = b + (((k0 + kk) * n + n0) * bytes) as u64;
          let row = if row & 7 != 0 {
            drv.unit().mem_mut().copy_within(row, tile_w, n_size * bytes)?;
            tile_w
          } else {
            row
          };
          drv.load_w(row, width, n_size, kk);
        }

        drv.start(kt > 0);
        drv.wait_done()?;
      }

      let rows = drv.read_tile(m_size, n_size)?;
      let mem = drv.unit().mem_mut();
      for (i, lanes) in rows.iter().enumerate() {
        for (j, &value) in lanes.iter().take(n_size).enumerate() {
          emit(mem, m0 + i, n0 + j, value)?;
        }
      }
    }
  }
  Ok(())
}

fn session<T, D>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  poller: &Poller,
  a: u64,
  b: u64,
  dims: (usize, usize, usize),
  emit: impl FnMut(&mut Dram, usize, usize, i64) -> Result<()>,
) -> Result<SystolicStats>
where
  T: Element,
  D: Coprocessor,
{
  let (m, n, k) = dims;
  check_tensor::<T>(vu.mem(), a, m * k)?;
  check_tensor::<T>(vu.mem(), b, k * n)?;
  let mut drv = SystolicDriver::new(vu, scratch, poller.clone())?;
  run_tiles::<T, D>(&mut drv, a, b, dims, emit)?;
  let stats = drv.stats();
  log::info!(
    "systolic matmul {}x{}x{}: {} tiles, {} starts, {} polls, {} cycles",
    m,
    n,
    k,
    stats.tiles,
    stats.starts,
    stats.polls,
    stats.cycles
  );
  Ok(stats)
}

/// C[M,N] (i64, row-major) = A[M,K] * B[K,N] on the systolic array.
#[allow(clippy::too_many_arguments)]
pub fn matmul_systolic<T: Element, D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  poller: &Poller,
  a: u64,
  b: u64,
  c: u64,
  m: usize,
  n: usize,
  k: usize,
) -> Result<SystolicStats> {
  check_tensor::<i64>(vu.mem(), c, m * n)?;
  session::<T, D>(vu, scratch, poller, a, b, (m, n, k), |mem, row, col, value| {
    mem.write(c + ((row * n + col) * 8) as u64, value)
  })
}

/// Int8 matmul with the same scale-and-clip contract as the scalar kernel.
///
/// The array's 64-bit sums are truncated to 32 bits first, which matches the
/// wrapping 32-bit accumulator of the reference.
#[allow(clippy::too_many_arguments)]
pub fn matmul_i8_scale_clip_systolic<D: Coprocessor>(
  vu: &mut VectorUnit<D>,
  scratch: &KernelScratch,
  poller: &Poller,
  a: u64,
  b: u64,
  c: u64,
  m: usize,
  n: usize,
  k: usize,
  scale: i32,
) -> Result<SystolicStats> {
  check_tensor::<i16>(vu.mem(), c, m * n)?;
  session::<i8, D>(vu, scratch, poller, a, b, (m, n, k), |mem, row, col, value| {
    mem.write(c + ((row * n + col) * 2) as u64, scale_clip_i16(value as i32, scale))
  })
}
