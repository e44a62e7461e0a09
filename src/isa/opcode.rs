// Opcode, function-code and width constants of the coprocessor ABI.
// Any change here must be mirrored in the hardware decoder.

// Major opcodes (bits [6:0])
pub const OPCODE_VL: u32 = 0x07; // whole-register 64-bit load
pub const OPCODE_VS: u32 = 0x27; // whole-register 64-bit store
pub const OPCODE_VEC: u32 = 0x57; // vector ALU
pub const OPCODE_VLX: u32 = 0x0B; // wide load, 1-8 elements, zero/sign extend
pub const OPCODE_VSX: u32 = 0x2B; // wide store, 1-8 elements, truncate

pub const OPCODE_VSA_CONFIG: u32 = 0x5F;
pub const OPCODE_VSA_LOAD_X: u32 = 0x6F;
pub const OPCODE_VSA_LOAD_W: u32 = 0x7F;
pub const OPCODE_VSA_START: u32 = 0x5B;
pub const OPCODE_VSA_READ_Y: u32 = 0x1B;
pub const OPCODE_VSA_STATUS: u32 = 0x7B;

// funct3 / operand mode (bits [14:12])
pub const FUNCT3_IVV: u32 = 0x0;
pub const FUNCT3_MVV: u32 = 0x2;
pub const FUNCT3_IVI: u32 = 0x3;
pub const FUNCT3_IVX: u32 = 0x4;

// Width code of the whole-register load/store
pub const WIDTH_E64: u32 = 0x7;

// funct6 (bits [31:26])
pub const FUNCT6_VADD: u32 = 0x00;
pub const FUNCT6_VSUB: u32 = 0x02;
pub const FUNCT6_VMIN: u32 = 0x05;
pub const FUNCT6_VMAX: u32 = 0x07;
pub const FUNCT6_VMV_V_X: u32 = 0x17;
pub const FUNCT6_VMUL: u32 = 0x25;
pub const FUNCT6_VSRA: u32 = 0x29;
pub const FUNCT6_VREDSUM: u32 = 0x00;
pub const FUNCT6_VREDMAX: u32 = 0x07;
pub const FUNCT6_VLE64: u32 = 0x00;
pub const FUNCT6_VSE64: u32 = 0x00;

/// Predicate bit, always set: every lane is active.
pub const VM_BIT: u32 = 1;

/// Physical lanes per vector register
pub const LANES: usize = 8;
/// Physical systolic tile edge
pub const TILE: usize = 8;
/// Largest value a 9-bit systolic index field can carry
pub const SHAPE_FIELD_MAX: u32 = 0x1FF;
/// Largest value an 8-bit `vsa.config` dimension can carry
pub const CONFIG_FIELD_MAX: u32 = 0xFF;

/// Element width code of the wide load/store family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemWidth {
  B8 = 0,
  B16 = 1,
  B32 = 2,
  B64 = 3,
}

impl ElemWidth {
  pub fn code(self) -> u32 {
    self as u32
  }

  pub fn bytes(self) -> usize {
    1 << (self as usize)
  }

  /// Decode the low two bits of a width field. Codes 4..7 alias the low two bits.
  pub fn from_code(code: u32) -> Self {
    match code & 0x3 {
      0 => ElemWidth::B8,
      1 => ElemWidth::B16,
      2 => ElemWidth::B32,
      _ => ElemWidth::B64,
    }
  }

  pub fn suffix(self) -> &'static str {
    match self {
      ElemWidth::B8 => "8",
      ElemWidth::B16 => "16",
      ElemWidth::B32 => "32",
      ElemWidth::B64 => "64",
    }
  }
}

/// Lanewise vector ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
  Add,
  Sub,
  Mul,
  Min,
  Max,
  Sra,
}

impl AluOp {
  pub fn funct6(self) -> u32 {
    match self {
      AluOp::Add => FUNCT6_VADD,
      AluOp::Sub => FUNCT6_VSUB,
      AluOp::Mul => FUNCT6_VMUL,
      AluOp::Min => FUNCT6_VMIN,
      AluOp::Max => FUNCT6_VMAX,
      AluOp::Sra => FUNCT6_VSRA,
    }
  }

  pub fn from_funct6(funct6: u32) -> Option<Self> {
    match funct6 {
      FUNCT6_VADD => Some(AluOp::Add),
      FUNCT6_VSUB => Some(AluOp::Sub),
      FUNCT6_VMUL => Some(AluOp::Mul),
      FUNCT6_VMIN => Some(AluOp::Min),
      FUNCT6_VMAX => Some(AluOp::Max),
      FUNCT6_VSRA => Some(AluOp::Sra),
      _ => None,
    }
  }

  pub fn mnemonic(self) -> &'static str {
    match self {
      AluOp::Add => "vadd",
      AluOp::Sub => "vsub",
      AluOp::Mul => "vmul",
      AluOp::Min => "vmin",
      AluOp::Max => "vmax",
      AluOp::Sra => "vsra",
    }
  }

  pub fn from_mnemonic(name: &str) -> Option<Self> {
    match name {
      "vadd" => Some(AluOp::Add),
      "vsub" => Some(AluOp::Sub),
      "vmul" => Some(AluOp::Mul),
      "vmin" => Some(AluOp::Min),
      "vmax" => Some(AluOp::Max),
      "vsra" => Some(AluOp::Sra),
      _ => None,
    }
  }

  /// The shift immediate is an unsigned amount, every other immediate is signed.
  pub fn signed_imm(self) -> bool {
    self != AluOp::Sra
  }
}

/// Fold of all lanes of one operand into lane 0 of the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
  Sum,
  Max,
}

impl ReduceOp {
  pub fn funct6(self) -> u32 {
    match self {
      ReduceOp::Sum => FUNCT6_VREDSUM,
      ReduceOp::Max => FUNCT6_VREDMAX,
    }
  }

  pub fn from_funct6(funct6: u32) -> Option<Self> {
    match funct6 {
      FUNCT6_VREDSUM => Some(ReduceOp::Sum),
      FUNCT6_VREDMAX => Some(ReduceOp::Max),
      _ => None,
    }
  }

  pub fn mnemonic(self) -> &'static str {
    match self {
      ReduceOp::Sum => "vredsum.vs",
      ReduceOp::Max => "vredmax.vs",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_funct6_round_trip() {
    for op in [AluOp::Add, AluOp::Sub, AluOp::Mul, AluOp::Min, AluOp::Max, AluOp::Sra] {
      assert_eq!(AluOp::from_funct6(op.funct6()), Some(op));
      assert_eq!(AluOp::from_mnemonic(op.mnemonic()), Some(op));
    }
    assert_eq!(AluOp::from_funct6(FUNCT6_VMV_V_X), None);
    assert_eq!(ReduceOp::from_funct6(0x07), Some(ReduceOp::Max));
  }

  #[test]
  fn test_elem_width() {
    assert_eq!(ElemWidth::B32.bytes(), 4);
    assert_eq!(ElemWidth::from_code(5), ElemWidth::B16);
    assert_eq!(ElemWidth::B64.code(), 3);
  }
}
