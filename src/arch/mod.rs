//! Simulated coprocessor: memory, vector register file, systolic array and
//! the machine that ties them to the instruction stream.

pub mod machine;
pub mod memory;
pub mod systolic_array;
pub mod vpu;

pub use machine::Machine;
pub use memory::{Dram, Element, Region};
