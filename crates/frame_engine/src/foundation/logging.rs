//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init() {
    init_with_level(log::LevelFilter::Info);
}

/// Initialize logging with a default level that `RUST_LOG` may override
pub fn init_with_level(level: log::LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialized");
    }
}
