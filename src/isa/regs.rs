// Register naming table and the fixed-size register arena.

use crate::error::{Error, Result};
use std::fmt;

/// Scalar (address) register id, 0..=31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XReg(u8);

/// Vector register id, 0..=31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(u8);

impl XReg {
  pub const ZERO: XReg = XReg(0);

  /// Ids wider than five bits wrap, exactly as the encoder field would.
  pub const fn new(id: u8) -> Self {
    XReg(id & 0x1f)
  }

  pub fn id(self) -> u32 {
    self.0 as u32
  }

  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl VReg {
  pub const fn new(id: u8) -> Self {
    VReg(id & 0x1f)
  }

  pub fn id(self) -> u32 {
    self.0 as u32
  }

  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for XReg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "x{}", self.0)
  }
}

impl fmt::Display for VReg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "v{}", self.0)
  }
}

/// ABI aliases of the scalar registers, indexed by id.
pub const XREG_ABI_NAMES: [&str; 32] = [
  "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "s2",
  "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

fn numbered(name: &str, prefix: char) -> Option<u8> {
  let digits = name.strip_prefix(prefix)?;
  if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
    return None;
  }
  let id: u8 = digits.parse().ok()?;
  (id < 32).then_some(id)
}

/// Resolve `x5`, `t0` or `fp` to a scalar register.
pub fn parse_xreg(name: &str) -> Option<XReg> {
  let name = name.trim();
  if let Some(id) = numbered(name, 'x') {
    return Some(XReg(id));
  }
  if name == "fp" {
    return Some(XReg(8));
  }
  XREG_ABI_NAMES.iter().position(|n| *n == name).map(|id| XReg(id as u8))
}

pub fn parse_vreg(name: &str) -> Option<VReg> {
  numbered(name.trim(), 'v').map(VReg)
}

/// Scalar registers the arena never hands out (zero, ra, sp, gp, tp).
pub const RESERVED_XREGS: u32 = 0b1_1111;

/// Bitmask arena over the 32 scalar and 32 vector registers.
///
/// Kernels lease the registers they need for one call and hand them back
/// when done, so two in-flight operands never share an id.
#[derive(Debug, Clone)]
pub struct RegArena {
  x_used: u32,
  v_used: u32,
}

impl Default for RegArena {
  fn default() -> Self {
    Self::new()
  }
}

impl RegArena {
  pub fn new() -> Self {
    Self {
      x_used: RESERVED_XREGS,
      v_used: 0,
    }
  }

  fn take_lowest(used: &mut u32, limit: u32) -> Option<u8> {
    let free = !*used & mask_below(limit);
    if free == 0 {
      return None;
    }
    let id = free.trailing_zeros();
    *used |= 1 << id;
    Some(id as u8)
  }

  pub fn alloc_x(&mut self) -> Result<XReg> {
    Self::take_lowest(&mut self.x_used, 32)
      .map(XReg)
      .ok_or(Error::RegistersExhausted("scalar"))
  }

  pub fn alloc_v(&mut self) -> Result<VReg> {
    self.alloc_v_below(32)
  }

  /// Lowest free vector register with an id below `limit`.
  pub fn alloc_v_below(&mut self, limit: u32) -> Result<VReg> {
    Self::take_lowest(&mut self.v_used, limit)
      .map(VReg)
      .ok_or(Error::RegistersExhausted("vector"))
  }

  pub fn free_x(&mut self, reg: XReg) {
    let bit = 1u32 << reg.0;
    if bit & RESERVED_XREGS != 0 {
      log::warn!("attempt to free reserved register {}", reg);
      return;
    }
    self.x_used &= !bit;
  }

  pub fn free_v(&mut self, reg: VReg) {
    self.v_used &= !(1u32 << reg.0);
  }

  pub fn x_in_use(&self, reg: XReg) -> bool {
    self.x_used & (1 << reg.0) != 0
  }

  pub fn v_in_use(&self, reg: VReg) -> bool {
    self.v_used & (1 << reg.0) != 0
  }

  /// Number of leased (non-reserved) scalar and vector registers.
  pub fn leased(&self) -> (u32, u32) {
    ((self.x_used & !RESERVED_XREGS).count_ones(), self.v_used.count_ones())
  }
}

fn mask_below(limit: u32) -> u32 {
  if limit >= 32 {
    u32::MAX
  } else {
    (1u32 << limit) - 1
  }
}
