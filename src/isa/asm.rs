// One-line assembler for the coprocessor instruction set.
//
// Accepts the syntax printed by the disassembler, plus ABI register names
// and a raw `.word` directive.

use super::encode::{self, InstWord};
use super::opcode::{AluOp, ElemWidth, ReduceOp};
use super::regs::{parse_vreg, parse_xreg, VReg, XReg};
use crate::error::{Error, Result};

fn asm_err(line: &str, msg: impl std::fmt::Display) -> Error {
  Error::Asm(format!("{}: `{}`", msg, line))
}

fn parse_int(text: &str) -> Option<i64> {
  let text = text.trim();
  let (neg, body) = match text.strip_prefix('-') {
    Some(rest) => (true, rest),
    None => (false, text),
  };
  let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
    i64::from_str_radix(hex, 16).ok()?
  } else {
    body.parse::<i64>().ok()?
  };
  Some(if neg { -value } else { value })
}

struct Operands<'a> {
  line: &'a str,
  items: Vec<&'a str>,
}

impl<'a> Operands<'a> {
  fn expect(&self, count: usize) -> Result<()> {
    if self.items.len() != count {
      return Err(asm_err(
        self.line,
        format!("expected {} operands, found {}", count, self.items.len()),
      ));
    }
    Ok(())
  }

  fn v(&self, i: usize) -> Result<VReg> {
    parse_vreg(self.items[i]).ok_or_else(|| asm_err(self.line, format!("bad vector register `{}`", self.items[i])))
  }

  fn x(&self, i: usize) -> Result<XReg> {
    parse_xreg(self.items[i]).ok_or_else(|| asm_err(self.line, format!("bad scalar register `{}`", self.items[i])))
  }

  fn int(&self, i: usize, min: i64, max: i64) -> Result<i64> {
    let value =
      parse_int(self.items[i]).ok_or_else(|| asm_err(self.line, format!("bad immediate `{}`", self.items[i])))?;
    if value < min || value > max {
      return Err(asm_err(
        self.line,
        format!("immediate {} outside {}..={}", value, min, max),
      ));
    }
    Ok(value)
  }

  /// `off(xN)` or `(xN)`
  fn mem(&self, i: usize) -> Result<(i8, XReg)> {
    let text = self.items[i];
    let bad = || asm_err(self.line, format!("bad memory operand `{}`", text));
    let open = text.find('(').ok_or_else(bad)?;
    let inner = text[open + 1..].strip_suffix(')').ok_or_else(bad)?;
    let reg = parse_xreg(inner).ok_or_else(bad)?;
    let off_text = text[..open].trim();
    let offset = if off_text.is_empty() {
      0
    } else {
      let off = parse_int(off_text).ok_or_else(bad)?;
      i8::try_from(off).map_err(|_| asm_err(self.line, format!("offset {} does not fit 8 bits", off)))?
    };
    Ok((offset, reg))
  }
}

fn parse_width(suffix: &str) -> Option<ElemWidth> {
  match suffix {
    "e8" => Some(ElemWidth::B8),
    "e16" => Some(ElemWidth::B16),
    "e32" => Some(ElemWidth::B32),
    "e64" => Some(ElemWidth::B64),
    _ => None,
  }
}

/// Assemble one instruction. Comments start with `#` or `//`.
pub fn assemble(line: &str) -> Result<InstWord> {
  let text = line.split('#').next().unwrap_or("");
  let text = text.split("//").next().unwrap_or("").trim();
  if text.is_empty() {
    return Err(asm_err(line, "empty instruction"));
  }

  let (mnemonic, rest) = match text.find(char::is_whitespace) {
    Some(pos) => (&text[..pos], text[pos..].trim()),
    None => (text, ""),
  };
  let items: Vec<&str> = if rest.is_empty() {
    Vec::new()
  } else {
    rest.split(',').map(str::trim).collect()
  };
  let ops = Operands { line, items };

  if mnemonic == ".word" {
    ops.expect(1)?;
    let value = ops.int(0, 0, u32::MAX as i64)?;
    return Ok(InstWord::from_bits(value as u32));
  }

  match mnemonic {
    "vmv.v.x" => {
      ops.expect(2)?;
      return Ok(encode::vmv_v_x(ops.v(0)?, ops.x(1)?));
    },
    "vredsum.vs" | "vredmax.vs" => {
      ops.expect(3)?;
      let op = if mnemonic == ReduceOp::Sum.mnemonic() {
        ReduceOp::Sum
      } else {
        ReduceOp::Max
      };
      return Ok(encode::reduce(op, ops.v(0)?, ops.v(1)?, ops.v(2)?));
    },
    "vle64.v" | "vse64.v" => {
      ops.expect(2)?;
      let (offset, rs1) = ops.mem(1)?;
      if offset != 0 {
        return Err(asm_err(line, "whole-register moves take no offset"));
      }
      let reg = ops.v(0)?;
      return Ok(if mnemonic == "vle64.v" {
        encode::vle64(reg, rs1)
      } else {
        encode::vse64(reg, rs1)
      });
    },
    "vsa.config" => {
      ops.expect(3)?;
      let max = crate::isa::opcode::CONFIG_FIELD_MAX as i64;
      return Ok(encode::vsa_config(
        ops.int(0, 0, max)? as u32,
        ops.int(1, 0, max)? as u32,
        ops.int(2, 0, max)? as u32,
      ));
    },
    "vsa.load_x" | "vsa.load_w" => {
      ops.expect(2)?;
      let vs = ops.v(0)?;
      let idx = ops.int(1, 0, crate::isa::opcode::SHAPE_FIELD_MAX as i64)? as u32;
      return Ok(if mnemonic == "vsa.load_x" {
        encode::vsa_load_x(vs, idx)
      } else {
        encode::vsa_load_w(vs, idx)
      });
    },
    "vsa.start" => {
      let accumulate = match ops.items.len() {
        0 => false,
        _ => {
          ops.expect(1)?;
          ops.int(0, 0, 1)? == 1
        },
      };
      return Ok(encode::vsa_start(accumulate));
    },
    "vsa.read_y" => {
      ops.expect(2)?;
      return Ok(encode::vsa_read_y(
        ops.v(0)?,
        ops.int(1, 0, crate::isa::opcode::SHAPE_FIELD_MAX as i64)? as u32,
      ));
    },
    "vsa.status" => {
      ops.expect(1)?;
      return Ok(encode::vsa_status(ops.v(0)?));
    },
    _ => {},
  }

  // vlx.e16[.s] / vsx.e32
  if let Some(tail) = mnemonic.strip_prefix("vlx.") {
    let (width, signed) = match tail.strip_suffix(".s") {
      Some(w) => (w, true),
      None => (tail, false),
    };
    let width = parse_width(width).ok_or_else(|| asm_err(line, "bad element width"))?;
    ops.expect(3)?;
    let (offset, rs1) = ops.mem(1)?;
    let num = ops.int(2, 1, 8)? as u32;
    return Ok(encode::vlx(ops.v(0)?, rs1, offset, width, num, signed));
  }
  if let Some(tail) = mnemonic.strip_prefix("vsx.") {
    let width = parse_width(tail).ok_or_else(|| asm_err(line, "bad element width"))?;
    ops.expect(3)?;
    let (offset, rs1) = ops.mem(1)?;
    if offset != 0 {
      return Err(asm_err(line, "wide stores take no offset"));
    }
    let num = ops.int(2, 1, 8)? as u32;
    return Ok(encode::vsx(ops.v(0)?, rs1, 0, width, num));
  }

  // vadd.vv / vadd.vx / vadd.vi ...
  let (base, form) = mnemonic
    .rsplit_once('.')
    .ok_or_else(|| asm_err(line, "unknown mnemonic"))?;
  let op = AluOp::from_mnemonic(base).ok_or_else(|| asm_err(line, "unknown mnemonic"))?;
  ops.expect(3)?;
  let vd = ops.v(0)?;
  let vs2 = ops.v(1)?;
  match form {
    "vv" => Ok(encode::alu_vv(op, vd, vs2, ops.v(2)?)),
    "vx" => Ok(encode::alu_vx(op, vd, vs2, ops.x(2)?)),
    "vi" => {
      let (min, max) = if op.signed_imm() { (-16, 15) } else { (0, 31) };
      Ok(encode::alu_vi(op, vd, vs2, ops.int(2, min, max)? as i32))
    },
    _ => Err(asm_err(line, "unknown operand form")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::isa::decode::decode;

  #[test]
  fn test_assemble_matches_encoder() {
    let v = VReg::new;
    let x = XReg::new;
    assert_eq!(assemble("vadd.vv v3, v1, v2").unwrap(), encode::vadd_vv(v(3), v(1), v(2)));
    assert_eq!(assemble("vmax.vx v2, v1, t0").unwrap(), encode::alu_vx(AluOp::Max, v(2), v(1), x(5)));
    assert_eq!(assemble("vsra.vi v2, v1, 2").unwrap(), encode::vsra_vi(v(2), v(1), 2));
    assert_eq!(
      assemble("vlx.e8.s v1, 0(x5), 8").unwrap(),
      encode::vlx(v(1), x(5), 0, ElemWidth::B8, 8, true)
    );
    assert_eq!(assemble("vsx.e64 v4, (x7), 1").unwrap(), encode::vsx(v(4), x(7), 0, ElemWidth::B64, 1));
    assert_eq!(assemble("vsa.start").unwrap(), encode::vsa_start(false));
    assert_eq!(assemble(".word 0x5b  # raw").unwrap(), encode::vsa_start(false));
  }

  #[test]
  fn test_disassembly_reassembles() {
    for text in [
      "vsub.vv v3, v1, v2",
      "vmin.vx v3, v1, x9",
      "vadd.vi v1, v2, -16",
      "vmv.v.x v4, x0",
      "vredmax.vs v4, v3, v4",
      "vle64.v v2, (x6)",
      "vse64.v v2, (x6)",
      "vlx.e32 v1, -128(x5), 5",
      "vsx.e16 v3, (x7), 8",
      "vsa.config 8, 8, 3",
      "vsa.load_w v2, 7",
      "vsa.start 1",
      "vsa.read_y v3, 5",
      "vsa.status v0",
    ] {
      let word = assemble(text).unwrap();
      assert_eq!(decode(word).to_string(), text);
    }
  }

  #[test]
  fn test_rejects_bad_input() {
    assert!(matches!(assemble(""), Err(Error::Asm(_))));
    assert!(assemble("vadd.vv v3, v1").is_err());
    assert!(assemble("vadd.vi v3, v1, 16").is_err());
    assert!(assemble("vlx.e8 v1, 200(x5), 8").is_err());
    assert!(assemble("vlx.e8 v1, 0(x5), 9").is_err());
    assert!(assemble("vsx.e8 v1, 4(x5), 8").is_err());
    assert!(assemble("vfoo.vv v1, v2, v3").is_err());
    assert!(assemble("vadd.vv v32, v1, v2").is_err());
  }
}
