pub mod arch;
pub mod error;
pub mod isa;
pub mod kernels;
pub mod simulator;
pub mod systolic;
pub mod vector;

pub use error::{Error, Result};
pub use simulator::log;
pub use simulator::Simulator;
