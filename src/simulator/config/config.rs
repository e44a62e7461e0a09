use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Built-in defaults, embedded at compile time
const DEFAULT_TOML: &str = include_str!("default.toml");

/// Device memory window
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MemorySection {
  #[serde(default = "default_base")]
  pub base: u64,
  #[serde(default = "default_size")]
  pub size: usize,
}

fn default_base() -> u64 {
  0x8080_0000
}

fn default_size() -> usize {
  1 << 20
}

impl Default for MemorySection {
  fn default() -> Self {
    Self {
      base: default_base(),
      size: default_size(),
    }
  }
}

/// Coprocessor timing and behaviour switches
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DeviceSection {
  #[serde(default = "default_alu_latency")]
  pub alu_latency: u64,
  #[serde(default = "default_mem_latency")]
  pub mem_latency: u64,
  #[serde(default = "default_systolic_overhead")]
  pub systolic_overhead: u64,
  /// Bus rounds unaligned wide accesses down to 8 bytes
  #[serde(default)]
  pub aligned_only: bool,
  /// Lower `done` when a computation starts
  #[serde(default = "default_true")]
  pub clear_done_on_start: bool,
  /// Fault injection: the systolic array never completes
  #[serde(default)]
  pub stall_systolic: bool,
}

fn default_alu_latency() -> u64 {
  1
}

fn default_mem_latency() -> u64 {
  2
}

fn default_systolic_overhead() -> u64 {
  4
}

fn default_true() -> bool {
  true
}

impl Default for DeviceSection {
  fn default() -> Self {
    Self {
      alu_latency: default_alu_latency(),
      mem_latency: default_mem_latency(),
      systolic_overhead: default_systolic_overhead(),
      aligned_only: false,
      clear_done_on_start: true,
      stall_systolic: false,
    }
  }
}

/// Host driver behaviour
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct DriverSection {
  /// Status polls before giving up, 0 = wait forever
  #[serde(default)]
  pub max_polls: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub trace_file: String,
}

/// 统一的应用配置
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
  #[serde(default)]
  pub memory: MemorySection,
  #[serde(default)]
  pub device: DeviceSection,
  #[serde(default)]
  pub driver: DriverSection,
  #[serde(default)]
  pub simulation: SimulationSection,
}

/// Values given on the command line, applied after every file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub quiet: bool,
  pub trace_file: Option<String>,
  pub max_polls: Option<u64>,
}

fn parse_table(content: &str) -> Result<toml::Value> {
  Ok(toml::from_str::<toml::Value>(content)?)
}

/// 从default.toml加载默认配置
pub fn load_default_config() -> Result<AppConfig> {
  Ok(parse_table(DEFAULT_TOML)?.try_into()?)
}

/// 从指定文件读取配置表
fn read_config_table(path: &Path) -> Result<toml::Value> {
  let content = fs::read_to_string(path)
    .map_err(|e| Error::Config(format!("cannot read config file {:?}: {}", path, e)))?;
  parse_table(&content)
}

/// 合并两个配置（后者覆盖前者）
///
/// Tables merge key by key, any other value in `overlay` replaces the one in `base`.
pub fn merge_config(base: &mut toml::Value, overlay: toml::Value) {
  match (base, overlay) {
    (toml::Value::Table(base), toml::Value::Table(overlay)) => {
      for (key, value) in overlay {
        match base.get_mut(&key) {
          Some(slot) => merge_config(slot, value),
          None => {
            base.insert(key, value);
          },
        }
      }
    },
    (slot, value) => *slot = value,
  }
}

/// 应用CLI参数覆写配置
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if let Some(polls) = cli.max_polls {
    config.driver.max_polls = polls;
  }
}

/// 验证配置
pub fn validate_config(config: &AppConfig) -> Result<()> {
  if config.memory.size < 4096 {
    return Err(Error::Config(format!(
      "memory.size must be at least 4096 bytes, got {}",
      config.memory.size
    )));
  }
  if config.memory.base % 8 != 0 {
    return Err(Error::Config(format!(
      "memory.base {:#x} must be 8-byte aligned",
      config.memory.base
    )));
  }
  if config.memory.base.checked_add(config.memory.size as u64).is_none() {
    return Err(Error::Config("memory window wraps the address space".to_string()));
  }
  if config.device.alu_latency == 0 || config.device.mem_latency == 0 {
    return Err(Error::Config("device latencies must be at least one cycle".to_string()));
  }
  if config.device.stall_systolic && config.driver.max_polls == 0 {
    log::warn!("stall_systolic with unbounded polling: systolic waits will never return");
  }
  Ok(())
}

/// 加载并合并配置
///
/// 流程：
/// 1. 加载默认配置
/// 2. 如果提供了自定义配置文件，加载并合并
/// 3. 应用CLI参数覆写
/// 4. 验证配置
pub fn load_and_merge_configs(custom_config_path: Option<&Path>, cli: &CliOverrides) -> Result<AppConfig> {
  let mut table = parse_table(DEFAULT_TOML)?;

  if let Some(path) = custom_config_path {
    merge_config(&mut table, read_config_table(path)?);
  }

  let mut config: AppConfig = table.try_into()?;
  apply_cli_overrides(&mut config, cli);
  validate_config(&config)?;
  Ok(config)
}
