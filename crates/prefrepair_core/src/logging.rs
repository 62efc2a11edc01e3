use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "prefrepair=info,prefrepair_core=info";
const VERBOSE_LOG_FILTER: &str = "prefrepair=debug,prefrepair_core=debug";

/// Installs the global stderr subscriber. `RUST_LOG` takes precedence over
/// the `verbose` switch.
pub fn init_logging(verbose: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(verbose))
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_level(verbose)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))
}

fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    })
}
