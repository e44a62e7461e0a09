// Instruction word decoder and disassembler.

use super::encode::InstWord;
use super::opcode::*;
use super::regs::{VReg, XReg};
use std::fmt;

/// Second source operand of a lanewise ALU op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluSrc {
  Vector(VReg),
  Scalar(XReg),
  Imm(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
  Alu {
    op: AluOp,
    vd: VReg,
    vs2: VReg,
    src: AluSrc,
  },
  MvVX {
    vd: VReg,
    rs1: XReg,
  },
  Reduce {
    op: ReduceOp,
    vd: VReg,
    vs2: VReg,
    vs1: VReg,
  },
  Vle64 {
    vd: VReg,
    rs1: XReg,
  },
  Vse64 {
    vs3: VReg,
    rs1: XReg,
  },
  Vlx {
    vd: VReg,
    rs1: XReg,
    offset: i8,
    width: ElemWidth,
    num: u8,
    signed: bool,
  },
  /// The store offset bits overlap the source register, so the device
  /// reads only the register and stores at x[rs1].
  Vsx {
    vs3: VReg,
    rs1: XReg,
    width: ElemWidth,
    num: u8,
  },
  VsaConfig {
    m: u16,
    n: u16,
    k: u16,
  },
  VsaLoadX {
    vs: VReg,
    idx: u16,
  },
  VsaLoadW {
    vs: VReg,
    idx: u16,
  },
  VsaStart {
    accumulate: bool,
  },
  VsaReadY {
    vd: VReg,
    row: u16,
  },
  VsaStatus {
    vd: VReg,
  },
  Unknown(InstWord),
}

fn sext5(v: u32) -> i64 {
  ((v << 27) as i32 >> 27) as i64
}

fn vreg(word: InstWord, lo: u32) -> VReg {
  VReg::new(word.field(lo, 5) as u8)
}

fn xreg(word: InstWord, lo: u32) -> XReg {
  XReg::new(word.field(lo, 5) as u8)
}

fn decode_vec(word: InstWord) -> Inst {
  let funct6 = word.field(26, 6);
  let funct3 = word.field(12, 3);
  let vd = vreg(word, 7);
  let vs2 = vreg(word, 20);
  let rs1_field = word.field(15, 5);

  match funct3 {
    FUNCT3_MVV => match ReduceOp::from_funct6(funct6) {
      Some(op) => Inst::Reduce {
        op,
        vd,
        vs2,
        vs1: VReg::new(rs1_field as u8),
      },
      None => Inst::Unknown(word),
    },
    FUNCT3_IVX if funct6 == FUNCT6_VMV_V_X => Inst::MvVX {
      vd,
      rs1: XReg::new(rs1_field as u8),
    },
    FUNCT3_IVV | FUNCT3_IVX | FUNCT3_IVI => {
      let Some(op) = AluOp::from_funct6(funct6) else {
        return Inst::Unknown(word);
      };
      let src = match funct3 {
        FUNCT3_IVV => AluSrc::Vector(VReg::new(rs1_field as u8)),
        FUNCT3_IVX => AluSrc::Scalar(XReg::new(rs1_field as u8)),
        _ if op.signed_imm() => AluSrc::Imm(sext5(rs1_field)),
        _ => AluSrc::Imm(rs1_field as i64),
      };
      Inst::Alu { op, vd, vs2, src }
    },
    _ => Inst::Unknown(word),
  }
}

/// Decode one word. Anything outside the ABI comes back as `Inst::Unknown`.
pub fn decode(word: InstWord) -> Inst {
  match word.opcode() {
    OPCODE_VEC => decode_vec(word),
    OPCODE_VL if word.field(12, 3) == WIDTH_E64 => Inst::Vle64 {
      vd: vreg(word, 7),
      rs1: xreg(word, 15),
    },
    OPCODE_VS if word.field(12, 3) == WIDTH_E64 => Inst::Vse64 {
      vs3: vreg(word, 7),
      rs1: xreg(word, 15),
    },
    OPCODE_VLX => Inst::Vlx {
      vd: vreg(word, 7),
      rs1: xreg(word, 15),
      offset: word.field(21, 8) as u8 as i8,
      width: ElemWidth::from_code(word.field(12, 3)),
      num: word.field(29, 3) as u8 + 1,
      signed: word.field(20, 1) == 1,
    },
    OPCODE_VSX => Inst::Vsx {
      vs3: vreg(word, 20),
      rs1: xreg(word, 15),
      width: ElemWidth::from_code(word.field(12, 3)),
      num: word.field(29, 3) as u8 + 1,
    },
    OPCODE_VSA_CONFIG => Inst::VsaConfig {
      m: word.field(24, 8) as u16,
      n: word.field(16, 8) as u16,
      k: word.field(8, 8) as u16,
    },
    OPCODE_VSA_LOAD_X => Inst::VsaLoadX {
      vs: VReg::new(word.field(20, 3) as u8),
      idx: word.field(23, 9) as u16,
    },
    OPCODE_VSA_LOAD_W => Inst::VsaLoadW {
      vs: VReg::new(word.field(20, 3) as u8),
      idx: word.field(23, 9) as u16,
    },
    OPCODE_VSA_START => Inst::VsaStart {
      accumulate: word.field(20, 1) == 1,
    },
    OPCODE_VSA_READ_Y => Inst::VsaReadY {
      vd: VReg::new(word.field(7, 3) as u8),
      row: word.field(23, 9) as u16,
    },
    OPCODE_VSA_STATUS => Inst::VsaStatus {
      vd: VReg::new(word.field(7, 3) as u8),
    },
    _ => Inst::Unknown(word),
  }
}

impl fmt::Display for Inst {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Inst::Alu { op, vd, vs2, src } => match src {
        AluSrc::Vector(vs1) => write!(f, "{}.vv {}, {}, {}", op.mnemonic(), vd, vs2, vs1),
        AluSrc::Scalar(rs1) => write!(f, "{}.vx {}, {}, {}", op.mnemonic(), vd, vs2, rs1),
        AluSrc::Imm(imm) => write!(f, "{}.vi {}, {}, {}", op.mnemonic(), vd, vs2, imm),
      },
      Inst::MvVX { vd, rs1 } => write!(f, "vmv.v.x {}, {}", vd, rs1),
      Inst::Reduce { op, vd, vs2, vs1 } => write!(f, "{} {}, {}, {}", op.mnemonic(), vd, vs2, vs1),
      Inst::Vle64 { vd, rs1 } => write!(f, "vle64.v {}, ({})", vd, rs1),
      Inst::Vse64 { vs3, rs1 } => write!(f, "vse64.v {}, ({})", vs3, rs1),
      Inst::Vlx {
        vd,
        rs1,
        offset,
        width,
        num,
        signed,
      } => {
        let sign = if signed { ".s" } else { "" };
        write!(f, "vlx.e{}{} {}, {}({}), {}", width.suffix(), sign, vd, offset, rs1, num)
      },
      Inst::Vsx { vs3, rs1, width, num } => write!(f, "vsx.e{} {}, ({}), {}", width.suffix(), vs3, rs1, num),
      Inst::VsaConfig { m, n, k } => write!(f, "vsa.config {}, {}, {}", m, n, k),
      Inst::VsaLoadX { vs, idx } => write!(f, "vsa.load_x {}, {}", vs, idx),
      Inst::VsaLoadW { vs, idx } => write!(f, "vsa.load_w {}, {}", vs, idx),
      Inst::VsaStart { accumulate } => write!(f, "vsa.start {}", accumulate as u8),
      Inst::VsaReadY { vd, row } => write!(f, "vsa.read_y {}, {}", vd, row),
      Inst::VsaStatus { vd } => write!(f, "vsa.status {}", vd),
      Inst::Unknown(word) => write!(f, ".word {}", word),
    }
  }
}
