//! Shared runtime plumbing for chunkpipe
//!
//! - [`run`] builds the tokio runtime, installs the tracing subscriber and reports the outcome
//! - [`config`] holds the settings structs validated at startup
//! - [`summary`] counts chunks and bytes for the end-of-transfer report
//! - [`version`] exposes the build metadata printed by the version flag

pub mod config;
pub mod summary;
pub mod version;

pub use config::{OutputConfig, RateLimit, RuntimeConfig};

fn verbosity_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global tracing subscriber.
///
/// Logs always go to stderr: stdout may be carrying transferred data. `RUST_LOG` takes
/// precedence over the verbosity flag when set.
pub fn init_logging(output: &OutputConfig) {
    let level = if output.quiet {
        "off"
    } else {
        verbosity_level(output.verbose)
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    // a subscriber may already be installed (tests); keep it
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run `func` to completion on a freshly configured runtime.
///
/// Returns `None` on failure after reporting the error on stderr (unless quiet), so callers
/// only need to pick an exit code.
pub fn run<Fut, Summary, Error>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    init_logging(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to start runtime: {error:#}");
            }
            return None;
        }
    };
    tracing::debug!("runtime started: {:?}", runtime);
    let res = rt.block_on(func());
    // a blocking stdin read may still be parked after a cancelled transfer
    rt.shutdown_timeout(std::time::Duration::from_secs(1));
    match res {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                eprintln!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
