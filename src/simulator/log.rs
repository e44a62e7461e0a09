/// Global logging configuration
use std::sync::Once;

static INIT: Once = Once::new();

/// Install the `env_logger` backend once per process.
///
/// `RUST_LOG` wins when set; otherwise the level is `info`, or `warn` when
/// quiet. Later calls are no-ops.
pub fn init_log(quiet: bool) {
  INIT.call_once(|| {
    let default_level = if quiet { "warn" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
      .format_timestamp(None)
      .try_init();
  });
}

/// Logger for tests: captured by the harness, debug level unless `RUST_LOG` says otherwise.
pub fn init_test_log() {
  let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
    .is_test(true)
    .try_init();
}
