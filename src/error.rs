//! Error types for rvsa

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Host access outside the device memory window
  #[error("memory access out of range: addr={addr:#x}, len={len}")]
  OutOfBounds { addr: u64, len: usize },

  /// Bump allocator ran out of device memory
  #[error("device memory exhausted: requested {requested} bytes, {available} available")]
  OutOfMemory { requested: usize, available: usize },

  /// Slice length or tensor shape does not match the kernel arguments
  #[error("shape mismatch: {0}")]
  Shape(String),

  #[error("register arena exhausted: no free {0} register")]
  RegistersExhausted(&'static str),

  /// Caller-owned scratch is too small for the requested operation
  #[error("scratch capacity exceeded: need {needed}, have {capacity}")]
  ScratchCapacity { needed: usize, capacity: usize },

  #[error("systolic array still busy after {polls} status polls")]
  PollTimeout { polls: u64 },

  #[error("status polling cancelled after {polls} polls")]
  PollCancelled { polls: u64 },

  #[error("assembly error: {0}")]
  Asm(String),

  #[error("config error: {0}")]
  Config(String),

  #[error("TOML parse error: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
