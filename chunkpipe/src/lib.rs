//! Bulk stream transfer over HTTP - `chunkpipe`
//!
//! `chunkpipe` moves a byte stream from one host to another. The sender splits its standard
//! input into numbered chunks and posts them as independent HTTP requests, several at a time and
//! under a bandwidth ceiling. The receiver puts the chunks back in order and writes the stream
//! to a file or its standard output.
//!
//! # Usage
//!
//! ```bash
//! # receiving host: listen on port 30000 and write to a new file
//! chunkpipe -l 30000 backup.tar
//!
//! # sending host: stream at up to 100 Mbps
//! tar -c /data | chunkpipe -r 100 receiver-host:30000
//! ```
//!
//! The receiver refuses to overwrite an existing output file. Without an output path (or with
//! `-`) it writes to standard output.
//!
//! # Throttling
//!
//! - `-r MBPS` caps the aggregate rate (default 10 Mbps, at most 2000). `-r 0` disables the cap
//!   and raises the default chunk size from 512 bytes to 5,120,000 bytes.
//! - `--max-in-flight N` caps concurrent requests (default 128).
//! - `--max-buffer SIZE` caps how much out-of-order data the receiver holds (default 512 MB).
//!   Going over the cap aborts the transfer.
//!
//! Any failure aborts the whole transfer and the process exits with status 1. There is no
//! resume.

use anyhow::Context;

/// Output argument meaning standard output.
pub const STDIO_PATH: &str = "-";

/// Output destination of a receiving transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout,
    File(std::path::PathBuf),
}

impl Output {
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None | Some(STDIO_PATH) => Output::Stdout,
            Some(path) => Output::File(std::path::PathBuf::from(path)),
        }
    }

    /// Fail if the output is a file that already exists.
    pub fn check_absent(&self) -> anyhow::Result<()> {
        match self {
            Output::File(path) if path.exists() => {
                Err(anyhow::anyhow!("output file {:?} already exists", path))
            }
            _ => Ok(()),
        }
    }

    /// Open the destination for writing. Files are created and must not exist yet.
    pub async fn open(&self) -> anyhow::Result<Box<dyn tokio::io::AsyncWrite + Unpin + Send>> {
        match self {
            Output::Stdout => Ok(Box::new(tokio::io::BufWriter::new(tokio::io::stdout()))),
            Output::File(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(path)
                    .await
                    .with_context(|| format!("failed to create output file {path:?}"))?;
                Ok(Box::new(tokio::io::BufWriter::new(file)))
            }
        }
    }
}

impl std::fmt::Display for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::Stdout => write!(f, "<stdout>"),
            Output::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Address the receiver binds for `port`, on all interfaces.
pub fn listen_addr(port: u16) -> std::net::SocketAddr {
    std::net::SocketAddr::from(([0, 0, 0, 0], port))
}

/// Receive one stream on `port` and write it to `output`.
#[tracing::instrument(skip(settings))]
pub async fn listen(
    port: u16,
    output: Output,
    settings: remote::receiver::Settings,
) -> anyhow::Result<common::summary::TransferSummary> {
    output.check_absent()?;
    let receiver = remote::receiver::Receiver::bind(listen_addr(port), settings).await?;
    let mut sink = output.open().await?;
    let summary = receiver
        .receive(&mut sink)
        .await
        .with_context(|| format!("failed receiving into {output}"))?;
    Ok(summary)
}

/// Send standard input to the receiver at `addr`.
#[tracing::instrument(skip(settings))]
pub async fn send(
    addr: String,
    settings: remote::sender::Settings,
) -> anyhow::Result<common::summary::TransferSummary> {
    let sender = remote::sender::Sender::new(&addr, settings)?;
    let summary = sender
        .send(tokio::io::stdin())
        .await
        .with_context(|| format!("failed sending to {}", sender.url()))?;
    Ok(summary)
}
