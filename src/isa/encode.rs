// Pure bit-packing of coprocessor instruction words.
//
// Every field is masked to its width and never saturated: callers are
// expected to pass representable values.

use super::opcode::*;
use super::regs::{VReg, XReg};
use std::fmt;

/// One 32-bit coprocessor instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstWord(u32);

impl InstWord {
  pub const fn from_bits(bits: u32) -> Self {
    InstWord(bits)
  }

  pub fn bits(self) -> u32 {
    self.0
  }

  pub fn opcode(self) -> u32 {
    self.0 & 0x7f
  }

  /// Extract `len` bits starting at `lo`.
  pub fn field(self, lo: u32, len: u32) -> u32 {
    (self.0 >> lo) & ((1u32 << len) - 1)
  }
}

impl fmt::Display for InstWord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:#010x}", self.0)
  }
}

impl From<InstWord> for u32 {
  fn from(word: InstWord) -> u32 {
    word.0
  }
}

/// ALU family: [31:26]=funct6 [25]=vm [24:20]=rs2 [19:15]=rs1 [14:12]=funct3 [11:7]=rd [6:0]=opcode
pub fn pack_alu(funct6: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> InstWord {
  InstWord(
    ((funct6 & 0x3f) << 26)
      | ((VM_BIT & 0x1) << 25)
      | ((rs2 & 0x1f) << 20)
      | ((rs1 & 0x1f) << 15)
      | ((funct3 & 0x7) << 12)
      | ((rd & 0x1f) << 7)
      | (opcode & 0x7f),
  )
}

/// Lane count field: 1..=8 maps to 0..=7, anything else to 0.
fn count_field(num: u32) -> u32 {
  if (1..=8).contains(&num) {
    num - 1
  } else {
    0
  }
}

/// Wide load: [31:29]=num-1 [28:21]=offset [20]=sign [19:15]=rs1 [14:12]=width [11:7]=vd [6:0]=0x0B
pub fn vlx(vd: VReg, rs1: XReg, offset: i8, width: ElemWidth, num: u32, signed: bool) -> InstWord {
  InstWord(
    (count_field(num) << 29)
      | (((offset as u8) as u32) << 21)
      | ((signed as u32) << 20)
      | (rs1.id() << 15)
      | (width.code() << 12)
      | (vd.id() << 7)
      | OPCODE_VLX,
  )
}

/// Wide store: [31:29]=num-1 [28:21]=offset [24:20]=vs3 [19:15]=rs1 [14:12]=width [6:0]=0x2B
///
/// The source register shares bits [24:21] with the offset; the two are
/// OR-ed together, so only a zero offset keeps the register id intact.
pub fn vsx(vs3: VReg, rs1: XReg, offset: i8, width: ElemWidth, num: u32) -> InstWord {
  InstWord(
    (count_field(num) << 29)
      | (((offset as u8) as u32) << 21)
      | (vs3.id() << 20)
      | (rs1.id() << 15)
      | (width.code() << 12)
      | OPCODE_VSX,
  )
}

pub fn vle64(vd: VReg, rs1: XReg) -> InstWord {
  pack_alu(FUNCT6_VLE64, 0, rs1.id(), WIDTH_E64, vd.id(), OPCODE_VL)
}

pub fn vse64(vs3: VReg, rs1: XReg) -> InstWord {
  pack_alu(FUNCT6_VSE64, 0, rs1.id(), WIDTH_E64, vs3.id(), OPCODE_VS)
}

/// vd = vs2 op vs1
pub fn alu_vv(op: AluOp, vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  pack_alu(op.funct6(), vs2.id(), vs1.id(), FUNCT3_IVV, vd.id(), OPCODE_VEC)
}

/// vd = vs2 op x[rs1]
pub fn alu_vx(op: AluOp, vd: VReg, vs2: VReg, rs1: XReg) -> InstWord {
  pack_alu(op.funct6(), vs2.id(), rs1.id(), FUNCT3_IVX, vd.id(), OPCODE_VEC)
}

/// vd = vs2 op imm5
pub fn alu_vi(op: AluOp, vd: VReg, vs2: VReg, imm5: i32) -> InstWord {
  pack_alu(op.funct6(), vs2.id(), (imm5 as u32) & 0x1f, FUNCT3_IVI, vd.id(), OPCODE_VEC)
}

pub fn vadd_vv(vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  alu_vv(AluOp::Add, vd, vs2, vs1)
}

pub fn vsub_vv(vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  alu_vv(AluOp::Sub, vd, vs2, vs1)
}

pub fn vmul_vv(vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  alu_vv(AluOp::Mul, vd, vs2, vs1)
}

pub fn vmin_vv(vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  alu_vv(AluOp::Min, vd, vs2, vs1)
}

pub fn vmax_vv(vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  alu_vv(AluOp::Max, vd, vs2, vs1)
}

pub fn vsra_vv(vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  alu_vv(AluOp::Sra, vd, vs2, vs1)
}

pub fn vadd_vi(vd: VReg, vs2: VReg, imm5: i32) -> InstWord {
  alu_vi(AluOp::Add, vd, vs2, imm5)
}

pub fn vsra_vi(vd: VReg, vs2: VReg, imm5: i32) -> InstWord {
  alu_vi(AluOp::Sra, vd, vs2, imm5)
}

/// Broadcast x[rs1] into every lane of vd.
pub fn vmv_v_x(vd: VReg, rs1: XReg) -> InstWord {
  pack_alu(FUNCT6_VMV_V_X, 0, rs1.id(), FUNCT3_IVX, vd.id(), OPCODE_VEC)
}

/// vd[0] = vs1[0] op fold(vs2)
pub fn reduce(op: ReduceOp, vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  pack_alu(op.funct6(), vs2.id(), vs1.id(), FUNCT3_MVV, vd.id(), OPCODE_VEC)
}

pub fn vredsum_vs(vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  reduce(ReduceOp::Sum, vd, vs2, vs1)
}

pub fn vredmax_vs(vd: VReg, vs2: VReg, vs1: VReg) -> InstWord {
  reduce(ReduceOp::Max, vd, vs2, vs1)
}

// Systolic array words. Shape and index fields are 9 bits wide, the vector
// register fields only 3, so systolic operands must live in v0..v7.

/// [31:24]=M [23:16]=N [15:8]=K [7]=0 [6:0]=0x5F
pub fn vsa_config(m: u32, n: u32, k: u32) -> InstWord {
  InstWord(
    ((m & CONFIG_FIELD_MAX) << 24) | ((n & CONFIG_FIELD_MAX) << 16) | ((k & CONFIG_FIELD_MAX) << 8) | OPCODE_VSA_CONFIG,
  )
}

/// [31:23]=idx [22:20]=vs
pub fn vsa_load_x(vs: VReg, idx: u32) -> InstWord {
  InstWord(((idx & SHAPE_FIELD_MAX) << 23) | ((vs.id() & 0x7) << 20) | OPCODE_VSA_LOAD_X)
}

pub fn vsa_load_w(vs: VReg, idx: u32) -> InstWord {
  InstWord(((idx & SHAPE_FIELD_MAX) << 23) | ((vs.id() & 0x7) << 20) | OPCODE_VSA_LOAD_W)
}

/// [20]=accumulate
pub fn vsa_start(accumulate: bool) -> InstWord {
  InstWord(((accumulate as u32) << 20) | OPCODE_VSA_START)
}

/// [31:23]=row [11:7]=vd
pub fn vsa_read_y(vd: VReg, row: u32) -> InstWord {
  InstWord(((row & SHAPE_FIELD_MAX) << 23) | ((vd.id() & 0x7) << 7) | OPCODE_VSA_READ_Y)
}

/// Lane 0 <- busy, lane 1 <- done
pub fn vsa_status(vd: VReg) -> InstWord {
  InstWord(((vd.id() & 0x7) << 7) | OPCODE_VSA_STATUS)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v(id: u8) -> VReg {
    VReg::new(id)
  }

  fn x(id: u8) -> XReg {
    XReg::new(id)
  }

  #[test]
  fn test_alu_operand_order() {
    // vadd.vv v3, v1, v2: rs2 field carries v1, rs1 field carries v2
    let word = vadd_vv(v(3), v(1), v(2));
    assert_eq!(word.field(26, 6), FUNCT6_VADD);
    assert_eq!(word.field(25, 1), 1);
    assert_eq!(word.field(20, 5), 1);
    assert_eq!(word.field(15, 5), 2);
    assert_eq!(word.field(12, 3), FUNCT3_IVV);
    assert_eq!(word.field(7, 5), 3);
    assert_eq!(word.opcode(), OPCODE_VEC);
    assert_eq!(word.bits(), 0x0211_01d7);
  }

  #[test]
  fn test_vmul_and_reduction() {
    assert_eq!(vmul_vv(v(3), v(1), v(2)).bits(), 0x9611_01d7);
    let red = vredsum_vs(v(4), v(3), v(4));
    assert_eq!(red.field(12, 3), FUNCT3_MVV);
    assert_eq!(red.bits(), 0x0232_2257);
  }

  #[test]
  fn test_immediate_masking() {
    let word = vadd_vi(v(1), v(2), -1);
    assert_eq!(word.field(15, 5), 0x1f);
    assert_eq!(word.field(12, 3), FUNCT3_IVI);
    assert_eq!(vsra_vi(v(1), v(2), 33).field(15, 5), 1);
  }

  #[test]
  fn test_wide_load_fields() {
    let word = vlx(v(1), x(5), -4, ElemWidth::B16, 8, true);
    assert_eq!(word.field(29, 3), 7);
    assert_eq!(word.field(21, 8), 0xfc);
    assert_eq!(word.field(20, 1), 1);
    assert_eq!(word.field(15, 5), 5);
    assert_eq!(word.field(12, 3), 1);
    assert_eq!(word.field(7, 5), 1);
    assert_eq!(word.opcode(), OPCODE_VLX);
    assert_eq!(vlx(v(1), x(5), 0, ElemWidth::B8, 8, false).bits(), 0xe002_808b);
  }

  #[test]
  fn test_count_out_of_range_encodes_one() {
    assert_eq!(vlx(v(1), x(5), 0, ElemWidth::B8, 0, false).field(29, 3), 0);
    assert_eq!(vlx(v(1), x(5), 0, ElemWidth::B8, 9, false).field(29, 3), 0);
    assert_eq!(vsx(v(1), x(5), 0, ElemWidth::B8, 1).field(29, 3), 0);
  }

  #[test]
  fn test_wide_store_register_overlaps_offset() {
    let word = vsx(v(4), x(7), 0, ElemWidth::B64, 1);
    assert_eq!(word.field(20, 5), 4);
    assert_eq!(word.field(7, 5), 0);
    assert_eq!(word.bits(), 0x0043_b02b);
    // a nonzero offset bleeds into the register field
    let word = vsx(v(0), x(7), 1, ElemWidth::B64, 1);
    assert_eq!(word.field(20, 5), 2);
  }

  #[test]
  fn test_systolic_words() {
    let cfg = vsa_config(8, 4, 3);
    assert_eq!(cfg.field(24, 8), 8);
    assert_eq!(cfg.field(16, 8), 4);
    assert_eq!(cfg.field(8, 8), 3);
    assert_eq!(cfg.field(7, 1), 0);
    assert_eq!(cfg.opcode(), OPCODE_VSA_CONFIG);
    assert_eq!(cfg.bits(), 0x0804_035f);
    assert_eq!(vsa_config(256, 0, 0).field(24, 8), 0);

    let load = vsa_load_x(v(9), 7);
    assert_eq!(load.field(23, 9), 7);
    assert_eq!(load.field(20, 3), 1);
    assert_eq!(vsa_start(true).bits(), (1 << 20) | OPCODE_VSA_START);
    assert_eq!(vsa_start(false).bits(), OPCODE_VSA_START);
    assert_eq!(vsa_read_y(v(3), 2).bits(), (2 << 23) | (3 << 7) | OPCODE_VSA_READ_Y);
    assert_eq!(vsa_status(v(0)).bits(), OPCODE_VSA_STATUS);
  }

  #[test]
  fn test_whole_register_moves() {
    let word = vle64(v(2), x(6));
    assert_eq!(word.field(12, 3), WIDTH_E64);
    assert_eq!(word.field(15, 5), 6);
    assert_eq!(word.field(7, 5), 2);
    assert_eq!(vse64(v(2), x(6)).opcode(), OPCODE_VS);
    assert_eq!(vmv_v_x(v(2), XReg::ZERO).field(26, 6), FUNCT6_VMV_V_X);
  }
}
