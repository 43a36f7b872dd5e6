use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter when `RUST_LOG` is unset.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,codemorph=debug"
    } else {
        "warn,codemorph=info"
    }
}

/// Initialize tracing to stderr; stdout carries the spinner and job output.
///
/// `RUST_LOG` overrides the default filter. Telemetry events use the
/// `codemorph::telemetry` target and can be selected on their own.
pub fn init(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();

    tracing::debug!("tracing initialized");
}
