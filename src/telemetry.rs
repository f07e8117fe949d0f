//! Logging setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a stderr subscriber for the given level.
///
/// `RUST_LOG` takes priority over `level`. Calling this more than once is a
/// no-op.
pub fn init_tracing_with_level(level: &str) {
    let default_filter = format!("warn,chatmem={level},chatmem_cli={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .ok();
}

/// Install a stderr subscriber: `debug` when verbose, `warn` otherwise.
pub fn init_tracing(verbose: bool) {
    init_tracing_with_level(if verbose { "debug" } else { "warn" });
}
