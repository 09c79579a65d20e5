use env_logger::{Builder, Env, Target};
use log::LevelFilter;

/// Installs the process logger. `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = Builder::from_env(Env::default().default_filter_or(default_level))
        .filter_module("russh", LevelFilter::Warn)
        .target(Target::Stderr)
        .format_timestamp_millis()
        .try_init();
}
