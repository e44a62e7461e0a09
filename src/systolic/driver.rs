// Systolic array protocol driver.
//
// Each call emits the instruction words for one protocol step. Operands are
// moved between device memory and the array through two vector registers
// leased below v8, since the systolic words carry 3-bit register fields.

use super::Poller;
use crate::error::{Error, Result};
use crate::isa::{encode, ElemWidth, TILE};
use crate::kernels::KernelScratch;
use crate::vector::{Coprocessor, Lease, VectorUnit};

/// Counters for one driver session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystolicStats {
  /// Output tiles read back
  pub tiles: u64,
  pub configs: u64,
  pub starts: u64,
  /// Status reads across all waits
  pub polls: u64,
  /// Device cycles spent inside the session
  pub cycles: u64,
}

pub struct SystolicDriver<'a, D: Coprocessor> {
  vu: &'a mut VectorUnit<D>,
  scratch: &'a KernelScratch,
  poller: Poller,
  lease: Lease,
  stats: SystolicStats,
  start_cycles: u64,
}

impl<'a, D: Coprocessor> SystolicDriver<'a, D> {
  pub fn new(vu: &'a mut VectorUnit<D>, scratch: &'a KernelScratch, poller: Poller) -> Result<Self> {
    let lease = vu.lease_low(1, 2)?;
    let start_cycles = vu.cycles();
    Ok(Self {
      vu,
      scratch,
      poller,
      lease,
      stats: SystolicStats::default(),
      start_cycles,
    })
  }

  pub fn unit(&mut self) -> &mut VectorUnit<D> {
    self.vu
  }

  pub fn scratch(&self) -> &KernelScratch {
    self.scratch
  }

  pub fn stats(&self) -> SystolicStats {
    SystolicStats {
      cycles: self.vu.cycles() - self.start_cycles,
      ..self.stats
    }
  }

  /// Set the logical shape of the next computation (each dimension <= 8).
  pub fn configure(&mut self, m: usize, n: usize, k: usize) {
    self.stats.configs += 1;
    self.vu.issue(encode::vsa_config(m as u32, n as u32, k as u32));
  }

  /// Wide-load `num` elements at `addr` and stream them into X slot `idx`.
  ///
  /// Lanes past `num` are zero, which pads boundary tiles.
  pub fn load_x(&mut self, addr: u64, width: ElemWidth, num: usize, idx: usize) {
    let (x, v) = (self.lease.x(0), self.lease.v(0));
    self.vu.load_at(v, x, addr, width, num, true);
    self.vu.issue(encode::vsa_load_x(v, idx as u32));
  }

  /// Same as `load_x` for the W buffer.
  pub fn load_w(&mut self, addr: u64, width: ElemWidth, num: usize, idx: usize) {
    let (x, v) = (self.lease.x(0), self.lease.v(0));
    self.vu.load_at(v, x, addr, width, num, true);
    self.vu.issue(encode::vsa_load_w(v, idx as u32));
  }

  /// Trigger a computation. `accumulate` adds into the resident partial sums.
  pub fn start(&mut self, accumulate: bool) {
    self.stats.starts += 1;
    self.vu.issue(encode::vsa_start(accumulate));
  }

  /// Current (busy, done), read back through the status scratch.
  pub fn status(&mut self) -> Result<(bool, bool)> {
    let (x, v) = (self.lease.x(0), self.lease.v(1));
    self.vu.issue(encode::vsa_status(v));
    self.vu.store_at(v, x, self.scratch.status(), ElemWidth::B64, 2);
    let flags = self.vu.mem().read_slice::<i64>(self.scratch.status(), 2)?;
    Ok((flags[0] != 0, flags[1] != 0))
  }

  /// Spin on status until busy has dropped and done is raised.
  ///
  /// Both flags are checked so a done left over from the previous tile is
  /// not taken for completion.
  pub fn wait_done(&mut self) -> Result<u64> {
    let poller = self.poller.clone();
    let result = poller.poll(|| {
      let (busy, done) = self.status()?;
      Ok(!busy && done)
    });
    match result {
      Ok(polls) => {
        self.stats.polls += polls;
        Ok(polls)
      },
      Err(e) => {
        log::warn!("systolic wait aborted: {}", e);
        Err(e)
      },
    }
  }

  /// Read output row `row` and wide-store `num` elements of it to `dst`.
  pub fn read_y(&mut self, row: usize, dst: u64, width: ElemWidth, num: usize) {
    let (x, v) = (self.lease.x(0), self.lease.v(1));
    self.vu.issue(encode::vsa_read_y(v, row as u32));
    self.vu.store_at(v, x, dst, width, num);
  }

  /// Read the first `m` rows of a finished tile as 64-bit values.
  ///
  /// Lanes from `n` on are zero. Both dimensions are bounded by the tile edge.
  pub fn read_tile(&mut self, m: usize, n: usize) -> Result<Vec<[i64; TILE]>> {
    if m > TILE || n > TILE {
      return Err(Error::Shape(format!("tile {}x{} exceeds the {}x{} array", m, n, TILE, TILE)));
    }
    let staging = self.scratch.tile_y();
    let mut rows = Vec::with_capacity(m);
    for row in 0..m {
      self.read_y(row, staging, ElemWidth::B64, TILE);
      let values = self.vu.mem().read_slice::<i64>(staging, TILE)?;
      let mut lanes = [0i64; TILE];
      lanes[..n].copy_from_slice(&values[..n]);
      rows.push(lanes);
    }
    self.stats.tiles += 1;
    Ok(rows)
  }
}

impl<D: Coprocessor> Drop for SystolicDriver<'_, D> {
  fn drop(&mut self) {
    let lease = std::mem::take(&mut self.lease);
    self.vu.release(lease);
  }
}
