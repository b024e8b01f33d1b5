//! Process logging setup
//!
//! Run logs are domain data kept by the execution store; this module only
//! configures the `tracing` output the engine mirrors them to.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the CLI (stderr logging)
///
/// Controlled by `RUST_LOG`. Default level is INFO for this crate, WARN for
/// dependencies. `verbose` lowers the crate level to DEBUG.
pub fn init_cli(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("suiterun=debug,warn")
        } else {
            EnvFilter::new("suiterun=info,warn")
        }
    });

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .compact(),
        )
        .try_init();
}
