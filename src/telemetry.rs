//! Tracing bootstrap
//!
//! Structured-logging setup for binaries and test harnesses embedding the
//! crate. Embedders with their own subscriber simply never call this.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Install the default structured-logging subscriber. Safe to call more than
/// once; only the first call does anything, and an already-installed global
/// subscriber is left in place.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,cascadeflow=debug"));

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init();
    });
}
