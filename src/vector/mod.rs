//! Vector ALU façade: one method per instruction, each emitting exactly one
//! encoded word to the coprocessor.

use crate::arch::Dram;
use crate::error::Result;
use crate::isa::{encode, AluOp, ElemWidth, InstWord, ReduceOp, RegArena, VReg, XReg};

/// The seam between the driver and whatever executes its instruction words.
///
/// `issue` blocks for the instruction's fixed latency and never fails:
/// malformed words are the device's problem, not the host's.
pub trait Coprocessor {
  fn set_xreg(&mut self, reg: XReg, value: u64);
  fn issue(&mut self, word: InstWord);
  fn memory(&self) -> &Dram;
  fn memory_mut(&mut self) -> &mut Dram;
  fn cycles(&self) -> u64;
}

/// Registers handed out for one kernel call. Return them with `VectorUnit::release`.
#[derive(Debug, Default)]
pub struct Lease {
  x: Vec<XReg>,
  v: Vec<VReg>,
}

impl Lease {
  pub fn x(&self, i: usize) -> XReg {
    self.x[i]
  }

  pub fn v(&self, i: usize) -> VReg {
    self.v[i]
  }

  pub fn is_empty(&self) -> bool {
    self.x.is_empty() && self.v.is_empty()
  }
}

pub struct VectorUnit<D: Coprocessor> {
  dev: D,
  arena: RegArena,
  issued: u64,
}

impl<D: Coprocessor> VectorUnit<D> {
  pub fn new(dev: D) -> Self {
    Self {
      dev,
      arena: RegArena::new(),
      issued: 0,
    }
  }

  pub fn device(&self) -> &D {
    &self.dev
  }

  pub fn device_mut(&mut self) -> &mut D {
    &mut self.dev
  }

  pub fn mem(&self) -> &Dram {
    self.dev.memory()
  }

  pub fn mem_mut(&mut self) -> &mut Dram {
    self.dev.memory_mut()
  }

  pub fn arena(&self) -> &RegArena {
    &self.arena
  }

  /// Words emitted through this unit
  pub fn issued(&self) -> u64 {
    self.issued
  }

  pub fn cycles(&self) -> u64 {
    self.dev.cycles()
  }

  fn lease_with(&mut self, nx: usize, nv: usize, v_limit: u32) -> Result<Lease> {
    let mut lease = Lease::default();
    for _ in 0..nx {
      match self.arena.alloc_x() {
        Ok(reg) => lease.x.push(reg),
        Err(e) => {
          self.release(lease);
          return Err(e);
        },
      }
    }
    for _ in 0..nv {
      match self.arena.alloc_v_below(v_limit) {
        Ok(reg) => lease.v.push(reg),
        Err(e) => {
          self.release(lease);
          return Err(e);
        },
      }
    }
    Ok(lease)
  }

  /// Lease `nx` scalar and `nv` vector registers.
  pub fn lease(&mut self, nx: usize, nv: usize) -> Result<Lease> {
    self.lease_with(nx, nv, 32)
  }

  /// Lease vector registers addressable by the 3-bit systolic fields (v0..v7).
  pub fn lease_low(&mut self, nx: usize, nv: usize) -> Result<Lease> {
    self.lease_with(nx, nv, 8)
  }

  pub fn release(&mut self, lease: Lease) {
    for reg in lease.x {
      self.arena.free_x(reg);
    }
    for reg in lease.v {
      self.arena.free_v(reg);
    }
  }

  pub fn issue(&mut self, word: InstWord) {
    self.issued += 1;
    self.dev.issue(word);
  }

  pub fn set_x(&mut self, reg: XReg, value: u64) {
    self.dev.set_xreg(reg, value);
  }

  // Arithmetic: vd = vs2 op vs1

  pub fn vadd_vv(&mut self, vd: VReg, vs2: VReg, vs1: VReg) {
    self.issue(encode::vadd_vv(vd, vs2, vs1));
  }

  pub fn vsub_vv(&mut self, vd: VReg, vs2: VReg, vs1: VReg) {
    self.issue(encode::vsub_vv(vd, vs2, vs1));
  }

  pub fn vmul_vv(&mut self, vd: VReg, vs2: VReg, vs1: VReg) {
    self.issue(encode::vmul_vv(vd, vs2, vs1));
  }

  pub fn vmin_vv(&mut self, vd: VReg, vs2: VReg, vs1: VReg) {
    self.issue(encode::vmin_vv(vd, vs2, vs1));
  }

  pub fn vmax_vv(&mut self, vd: VReg, vs2: VReg, vs1: VReg) {
    self.issue(encode::vmax_vv(vd, vs2, vs1));
  }

  pub fn vsra_vv(&mut self, vd: VReg, vs2: VReg, vs1: VReg) {
    self.issue(encode::vsra_vv(vd, vs2, vs1));
  }

  pub fn alu_vx(&mut self, op: AluOp, vd: VReg, vs2: VReg, rs1: XReg) {
    self.issue(encode::alu_vx(op, vd, vs2, rs1));
  }

  pub fn vadd_vx(&mut self, vd: VReg, vs2: VReg, rs1: XReg) {
    self.alu_vx(AluOp::Add, vd, vs2, rs1);
  }

  pub fn vsub_vx(&mut self, vd: VReg, vs2: VReg, rs1: XReg) {
    self.alu_vx(AluOp::Sub, vd, vs2, rs1);
  }

  pub fn vmul_vx(&mut self, vd: VReg, vs2: VReg, rs1: XReg) {
    self.alu_vx(AluOp::Mul, vd, vs2, rs1);
  }

  pub fn vmin_vx(&mut self, vd: VReg, vs2: VReg, rs1: XReg) {
    self.alu_vx(AluOp::Min, vd, vs2, rs1);
  }

  pub fn vmax_vx(&mut self, vd: VReg, vs2: VReg, rs1: XReg) {
    self.alu_vx(AluOp::Max, vd, vs2, rs1);
  }

  pub fn vsra_vx(&mut self, vd: VReg, vs2: VReg, rs1: XReg) {
    self.alu_vx(AluOp::Sra, vd, vs2, rs1);
  }

  pub fn vadd_vi(&mut self, vd: VReg, vs2: VReg, imm5: i32) {
    self.issue(encode::vadd_vi(vd, vs2, imm5));
  }

  pub fn vsra_vi(&mut self, vd: VReg, vs2: VReg, imm5: i32) {
    self.issue(encode::vsra_vi(vd, vs2, imm5));
  }

  pub fn vmv_v_x(&mut self, vd: VReg, rs1: XReg) {
    self.issue(encode::vmv_v_x(vd, rs1));
  }

  // Reductions: vd[0] = vs1[0] op fold(vs2). The caller seeds vs1.

  pub fn vredsum_vs(&mut self, vd: VReg, vs2: VReg, vs1: VReg) {
    self.issue(encode::reduce(ReduceOp::Sum, vd, vs2, vs1));
  }

  pub fn vredmax_vs(&mut self, vd: VReg, vs2: VReg, vs1: VReg) {
    self.issue(encode::reduce(ReduceOp::Max, vd, vs2, vs1));
  }

  // Memory

  pub fn vle64(&mut self, vd: VReg, rs1: XReg) {
    self.issue(encode::vle64(vd, rs1));
  }

  pub fn vse64(&mut self, vs3: VReg, rs1: XReg) {
    self.issue(encode::vse64(vs3, rs1));
  }

  pub fn vlx(&mut self, vd: VReg, rs1: XReg, offset: i8, width: ElemWidth, num: usize, signed: bool) {
    self.issue(encode::vlx(vd, rs1, offset, width, num as u32, signed));
  }

  pub fn vsx(&mut self, vs3: VReg, rs1: XReg, width: ElemWidth, num: usize) {
    self.issue(encode::vsx(vs3, rs1, 0, width, num as u32));
  }

  /// Point `base` at `addr` and wide-load `num` elements from it.
  pub fn load_at(&mut self, vd: VReg, base: XReg, addr: u64, width: ElemWidth, num: usize, signed: bool) {
    self.set_x(base, addr);
    self.vlx(vd, base, 0, width, num, signed);
  }

  /// Point `base` at `addr` and wide-store `num` elements there.
  pub fn store_at(&mut self, vs3: VReg, base: XReg, addr: u64, width: ElemWidth, num: usize) {
    self.set_x(base, addr);
    self.vsx(vs3, base, width, num);
  }

  /// Broadcast a constant through a scalar register.
  pub fn splat(&mut self, vd: VReg, scratch: XReg, value: i64) {
    self.set_x(scratch, value as u64);
    self.vmv_v_x(vd, scratch);
  }
}
