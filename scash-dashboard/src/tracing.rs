//! Logging setup shared by the binaries.
//!
//! Library code logs through the macros in [`prelude`]; the binaries call
//! [`init_cli`] once at startup.

use tracing_subscriber::{EnvFilter, fmt, fmt::time::LocalTime};

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

/// Default filter when `RUST_LOG` is unset. Kept quiet so command output
/// is not interleaved with log lines.
const DEFAULT_FILTER: &str = "warn";

/// Install a stderr subscriber filtered by `RUST_LOG`.
///
/// `verbose` raises this crate to `debug` on top of whatever the
/// environment asks for.
pub fn init_cli(verbose: bool) {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if verbose {
        if let Ok(directive) = "scash_dashboard=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_timer(LocalTime::rfc_3339())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
