//! Instruction set of the vector/systolic coprocessor: constants, register
//! naming, bit-exact encoding, decoding and a small assembler.

pub mod asm;
pub mod decode;
pub mod encode;
pub mod opcode;
pub mod regs;

pub use decode::{decode, AluSrc, Inst};
pub use encode::InstWord;
pub use opcode::{AluOp, ElemWidth, ReduceOp, LANES, TILE};
pub use regs::{RegArena, VReg, XReg};
