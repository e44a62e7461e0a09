// Vector register file and lane arithmetic.

use crate::isa::{AluOp, ReduceOp, VReg, LANES};

pub type Lanes = [i64; LANES];

/// Lanewise result of `a op b`, 64-bit two's complement with wraparound.
pub fn alu_lane(op: AluOp, a: i64, b: i64) -> i64 {
  match op {
    AluOp::Add => a.wrapping_add(b),
    AluOp::Sub => a.wrapping_sub(b),
    AluOp::Mul => a.wrapping_mul(b),
    AluOp::Min => a.min(b),
    AluOp::Max => a.max(b),
    AluOp::Sra => a >> (b as u64 & 63),
  }
}

pub fn alu(op: AluOp, a: &Lanes, b: &Lanes) -> Lanes {
  let mut out = [0; LANES];
  for (lane, out) in out.iter_mut().enumerate() {
    *out = alu_lane(op, a[lane], b[lane]);
  }
  out
}

/// seed op fold(src)
pub fn reduce(op: ReduceOp, src: &Lanes, seed: i64) -> i64 {
  match op {
    ReduceOp::Sum => src.iter().fold(seed, |acc, &v| acc.wrapping_add(v)),
    ReduceOp::Max => src.iter().fold(seed, |acc, &v| acc.max(v)),
  }
}

/// 32 registers of 8 signed 64-bit lanes.
#[derive(Debug, Clone)]
pub struct VectorRegFile {
  regs: [Lanes; 32],
}

impl Default for VectorRegFile {
  fn default() -> Self {
    Self { regs: [[0; LANES]; 32] }
  }
}

impl VectorRegFile {
  pub fn read(&self, reg: VReg) -> Lanes {
    self.regs[reg.index()]
  }

  pub fn write(&mut self, reg: VReg, lanes: Lanes) {
    self.regs[reg.index()] = lanes;
  }

  pub fn lane(&self, reg: VReg, lane: usize) -> i64 {
    self.regs[reg.index()][lane]
  }

  pub fn set_lane(&mut self, reg: VReg, lane: usize, value: i64) {
    self.regs[reg.index()][lane] = value;
  }
}
