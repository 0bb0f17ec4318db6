//! Tracing setup for the `tiergate` binary.
//!
//! Logs always go to stderr; stdout is reserved for the build report.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. With `json`, every log line is a
/// JSON object. A second call is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let base = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output = if json {
        base.json().boxed()
    } else {
        base.boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init();
}
