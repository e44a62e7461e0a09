// Caller-owned device scratch shared by the vectorized kernels.

use crate::arch::{Dram, Region};
use crate::error::{Error, Result};
use crate::isa::{LANES, TILE};

/// Device regions a vectorized kernel stages data through.
///
/// One `KernelScratch` serves one kernel call at a time; give concurrent
/// callers their own.
#[derive(Debug, Clone)]
pub struct KernelScratch {
  /// Gathered right-operand column, up to `max_k` elements of 8 bytes
  col: Region,
  /// Aligned copy of an unaligned left-operand row
  stage: Region,
  /// Eight 64-bit lanes written back by reductions and lane dumps
  lanes: Region,
  /// Systolic X slice, W slice and Y row, 8 x i64 each
  tile: Region,
  /// Systolic status dump
  status: Region,
  /// im2col patch-major staging
  patch: Region,
  max_k: usize,
}

impl KernelScratch {
  pub const DEFAULT_MAX_K: usize = 256;
  pub const DEFAULT_PATCH_BYTES: usize = 16 * 1024;

  pub fn new(mem: &mut Dram, max_k: usize, patch_bytes: usize) -> Result<Self> {
    Ok(Self {
      col: mem.alloc(max_k * 8, 64)?,
      stage: mem.alloc(max_k * 8, 64)?,
      lanes: mem.alloc(LANES * 8, 64)?,
      tile: mem.alloc(3 * LANES * 8, 64)?,
      status: mem.alloc(LANES * 8, 64)?,
      patch: mem.alloc(patch_bytes, 64)?,
      max_k,
    })
  }

  pub fn with_defaults(mem: &mut Dram) -> Result<Self> {
    Self::new(mem, Self::DEFAULT_MAX_K, Self::DEFAULT_PATCH_BYTES)
  }

  pub fn max_k(&self) -> usize {
    self.max_k
  }

  /// Fail early when a reduction length does not fit the staging buffers.
  pub fn check_k(&self, k: usize) -> Result<()> {
    if k > self.max_k {
      return Err(Error::ScratchCapacity {
        needed: k,
        capacity: self.max_k,
      });
    }
    Ok(())
  }

  pub fn check_patch(&self, bytes: usize) -> Result<()> {
    if bytes > self.patch.len {
      return Err(Error::ScratchCapacity {
        needed: bytes,
        capacity: self.patch.len,
      });
    }
    Ok(())
  }

  pub fn col(&self) -> u64 {
    self.col.addr
  }

  pub fn stage(&self) -> u64 {
    self.stage.addr
  }

  pub fn lanes(&self) -> u64 {
    self.lanes.addr
  }

  pub fn tile_x(&self) -> u64 {
    self.tile.addr
  }

  pub fn tile_w(&self) -> u64 {
    self.tile.addr + (TILE * 8) as u64
  }

  pub fn tile_y(&self) -> u64 {
    self.tile.addr + (2 * TILE * 8) as u64
  }

  pub fn status(&self) -> u64 {
    self.status.addr
  }

  pub fn patch(&self) -> u64 {
    self.patch.addr
  }
}
