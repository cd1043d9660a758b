//! Tracing subscriber setup for the vscan CLI.

use std::io::IsTerminal;
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Check if colored output should be used.
///
/// True only when stderr is a terminal and `NO_COLOR` is unset.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise `verbose` selects a
/// debug-level filter and `quiet` suppresses everything below warnings.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(verbose: bool, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    // Workspace crates log under vscan, vscan_engine, vscan_resolver, ...;
    // one directive per prefix keeps third-party noise down.
    let default_filter = if quiet {
        "warn"
    } else if verbose {
        "vscan=debug,vscan_utils=debug,vscan_config=debug,vscan_cache=debug,\
         vscan_resolver=debug,vscan_discovery=debug,vscan_engine=debug,info"
    } else {
        "vscan=info,vscan_utils=info,vscan_config=info,vscan_cache=info,\
         vscan_resolver=info,vscan_discovery=info,vscan_engine=info,warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(use_color())
                .with_target(verbose)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()?;

    Ok(())
}
