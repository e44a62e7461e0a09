//! Host side of the systolic array: the configure / load / start / poll /
//! read protocol, the poll policy and the tiled matmul built on them.

pub mod driver;
pub mod tiling;

pub use driver::{SystolicDriver, SystolicStats};
pub use tiling::{matmul_i8_scale_clip_systolic, matmul_systolic};

use crate::error::{Error, Result};
use crate::simulator::config::DriverSection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that aborts a wait in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// How long a status wait may spin.
///
/// The default never gives up, like the hardware driver. Tests bound it or
/// hand in a cancel token to survive a device that never completes.
#[derive(Debug, Clone, Default)]
pub struct Poller {
  pub max_polls: Option<u64>,
  pub cancel: Option<CancelToken>,
}

impl Poller {
  pub fn unbounded() -> Self {
    Self::default()
  }

  pub fn bounded(max_polls: u64) -> Self {
    Self {
      max_polls: Some(max_polls),
      cancel: None,
    }
  }

  pub fn with_cancel(mut self, token: CancelToken) -> Self {
    self.cancel = Some(token);
    self
  }

  /// `[driver] max_polls`, where 0 means unbounded
  pub fn from_config(driver: &DriverSection) -> Self {
    match driver.max_polls {
      0 => Self::unbounded(),
      n => Self::bounded(n),
    }
  }

  /// Call `probe` until it reports completion; returns the number of probes.
  pub fn poll(&self, mut probe: impl FnMut() -> Result<bool>) -> Result<u64> {
    let mut polls = 0;
    loop {
      if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
        return Err(Error::PollCancelled { polls });
      }
      if self.max_polls.is_some_and(|max| polls >= max) {
        return Err(Error::PollTimeout { polls });
      }
      polls += 1;
      if probe()? {
        return Ok(polls);
      }
    }
  }
}
