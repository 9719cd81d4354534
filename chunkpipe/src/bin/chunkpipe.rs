use anyhow::Result;
use clap::{CommandFactory, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "chunkpipe",
    disable_version_flag = true,
    about = "Stream bulk data between hosts as parallel, rate-limited HTTP chunks",
    long_about = "`chunkpipe` transfers a byte stream between two hosts. The sender reads stdin, splits it into numbered chunks and posts them concurrently over HTTP; the receiver reorders them and writes the original stream.

EXAMPLE:
    # On the receiving host, write the stream to a new file
    chunkpipe -l 30000 backup.tar

    # On the sending host, stream at up to 100 Mbps
    tar -c /data | chunkpipe -r 100 receiver-host:30000

Any failure aborts the transfer and exits with status 1."
)]
struct Args {
    // Mode
    /// Receive on the given TCP port instead of sending
    #[arg(short = 'l', long = "listen", value_name = "PORT", help_heading = "Mode")]
    listen: Option<u16>,

    // Sending
    /// Rate limit in Mbps, at most 2000 (0 = no throttle)
    #[arg(
        short = 'r',
        long = "rate-limit",
        default_value = "10",
        value_name = "MBPS",
        conflicts_with = "listen",
        help_heading = "Sending"
    )]
    rate_limit: u32,

    /// Bytes read from stdin per chunk
    ///
    /// Defaults to 512 bytes when throttled and 5,120,000 bytes with --rate-limit 0. A throttled
    /// chunk may not exceed the rate limiter burst (two seconds worth of the rate).
    #[arg(
        long,
        value_name = "SIZE",
        conflicts_with = "listen",
        help_heading = "Sending"
    )]
    chunk_size: Option<bytesize::ByteSize>,

    /// Maximum number of chunk requests in flight
    #[arg(
        long,
        default_value = "128",
        value_name = "N",
        conflicts_with = "listen",
        help_heading = "Sending"
    )]
    max_in_flight: usize,

    /// Timeout of a single chunk request, in seconds
    #[arg(
        long,
        default_value = "60",
        value_name = "SECONDS",
        conflicts_with = "listen",
        help_heading = "Sending"
    )]
    request_timeout_sec: u64,

    // Receiving
    /// Maximum bytes held for chunks that arrived out of order
    ///
    /// The transfer is aborted when out-of-order chunks would exceed this budget.
    #[arg(
        long,
        default_value = "512MB",
        value_name = "SIZE",
        help_heading = "Receiving"
    )]
    max_buffer: bytesize::ByteSize,

    /// Abort when no chunk arrives for this many seconds (default: wait forever)
    #[arg(
        long,
        value_name = "SECONDS",
        requires = "listen",
        help_heading = "Receiving"
    )]
    idle_timeout_sec: Option<u64>,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    /// Print version and build information, then exit
    #[arg(short = 'V', long = "version", help_heading = "Progress & output")]
    version: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Receiver address (host:port) when sending, output path when listening
    ///
    /// When listening, the output file must not exist. Use "-" or leave it out to write to stdout.
    #[arg(value_name = "ADDR|OUTPUT")]
    target: Option<String>,
}

enum Mode {
    Listen {
        port: u16,
        output: chunkpipe::Output,
        settings: remote::receiver::Settings,
    },
    Send {
        addr: String,
        settings: remote::sender::Settings,
    },
}

impl Args {
    fn mode(&self) -> Result<Mode, String> {
        if let Some(port) = self.listen {
            let settings = remote::receiver::Settings {
                max_buffered_bytes: self.max_buffer.as_u64(),
                idle_timeout: self.idle_timeout_sec.map(std::time::Duration::from_secs),
            };
            settings.validate()?;
            return Ok(Mode::Listen {
                port,
                output: chunkpipe::Output::from_arg(self.target.as_deref()),
                settings,
            });
        }
        let addr = self
            .target
            .clone()
            .ok_or_else(|| "receiver address is required unless --listen is given".to_string())?;
        let rate_limit = common::RateLimit {
            mbps: self.rate_limit,
        };
        let chunk_size = match self.chunk_size {
            Some(size) => usize::try_from(size.as_u64())
                .map_err(|_| format!("chunk size {size} is too large"))?,
            None => remote::sender::Settings::default_chunk_size(rate_limit),
        };
        let settings = remote::sender::Settings {
            chunk_size,
            max_in_flight: self.max_in_flight,
            rate_limit,
            request_timeout: std::time::Duration::from_secs(self.request_timeout_sec),
        };
        settings.validate()?;
        Ok(Mode::Send { addr, settings })
    }
}

async fn async_main(mode: Mode) -> Result<common::summary::TransferSummary> {
    match mode {
        Mode::Listen {
            port,
            output,
            settings,
        } => chunkpipe::listen(port, output, settings).await,
        Mode::Send { addr, settings } => chunkpipe::send(addr, settings).await,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.version {
        println!("{}", common::version::BuildVersion::current().report("chunkpipe"));
        return Ok(());
    }
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(message) => Args::command()
            .error(clap::error::ErrorKind::ValueValidation, message)
            .exit(),
    };
    let func = || async_main(mode);
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
