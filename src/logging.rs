//! Log backend setup for the binary and ad-hoc test runs.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

/// Install the `env_logger` backend. `RUST_LOG` takes precedence over the
/// level picked from `verbose`.
pub fn init(verbose: bool) {
    let mut builder = Builder::new();

    builder
        .target(Target::Stderr)
        .filter_level(if verbose { LevelFilter::Debug } else { LevelFilter::Info })
        // the WebDriver HTTP client logs every request at debug level
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.args()
            )
        });

    // A second init (e.g. from tests) keeps the first logger
    let _ = builder.try_init();
}
