//! Log output setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary or test that drives it.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor an explicit filter is given
pub const DEFAULT_FILTER: &str = "polyprobe=info";

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

fn build_filter(filter: Option<&str>) -> EnvFilter {
    match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    }
}

/// Install a global subscriber writing to stderr.
///
/// `filter` takes `RUST_LOG`-style directives; `None` reads `RUST_LOG` and
/// falls back to [`DEFAULT_FILTER`]. Returns `false` if a global subscriber
/// was already installed.
pub fn init_logging(format: LogFormat, filter: Option<&str>) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(filter))
        .with_writer(std::io::stderr)
        .with_target(true);
    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

/// Install a subscriber that writes through the test harness capture.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(build_filter(None))
        .try_init();
}
