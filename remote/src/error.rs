use crate::protocol::ChunkNumber;

/// Session-fatal failures.
///
/// Malformed inbound requests are not listed here: they are rejected per request with
/// [`crate::protocol::CodecError`] and never end a session.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed reading source stream")]
    SourceRead(#[source] std::io::Error),

    #[error("failed sending chunk {chunk}")]
    Transport {
        chunk: ChunkNumber,
        #[source]
        source: reqwest::Error,
    },

    #[error("receiver rejected chunk {chunk} with status {status}")]
    Rejected {
        chunk: ChunkNumber,
        status: reqwest::StatusCode,
    },

    #[error("reassembly buffer overflow: {buffered} bytes pending, budget is {budget} bytes")]
    BufferOverflow { buffered: u64, budget: u64 },

    #[error("failed writing chunk {chunk} to output")]
    OutputWrite {
        chunk: ChunkNumber,
        #[source]
        source: std::io::Error,
    },

    #[error("rate limiting failed")]
    Throttle(#[from] throttle::Error),

    #[error("no chunk arrived or flushed for {0:?}")]
    Stalled(std::time::Duration),

    #[error("transfer cancelled")]
    Cancelled,
}
