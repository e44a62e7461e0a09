#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
  load_and_merge_configs, AppConfig, CliOverrides, DeviceSection, DriverSection, MemorySection, SimulationSection,
};
