pub mod config;
pub mod log;
pub mod simulator;
pub mod trace;

// provide to rvsa
pub use simulator::{MatmulReport, Simulator};
