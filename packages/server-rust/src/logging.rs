//! Tracing subscriber bootstrap.
//!
//! Optional convenience for binaries; libraries embedding the chassis
//! may install their own subscriber instead. Filtering is controlled
//! by `GANTRY_LOG` (an `EnvFilter` directive string, default `info`)
//! and `GANTRY_LOG_FORMAT=json` switches to JSON output.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Idempotent: a second call (or a
/// subscriber installed elsewhere) is left in place.
pub fn init() {
    let filter =
        EnvFilter::try_from_env("GANTRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("GANTRY_LOG_FORMAT")
        .is_ok_and(|value| value.eq_ignore_ascii_case("json"));
    if json {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}
