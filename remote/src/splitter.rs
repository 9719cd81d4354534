use tokio::io::AsyncReadExt;

use crate::TransferError;
use crate::protocol::{Chunk, FIRST_CHUNK};

/// Cuts a byte stream into numbered chunks.
///
/// Every successful read of up to `chunk_size` bytes becomes one data chunk. End of stream
/// yields a single final chunk, after which the splitter is exhausted.
#[derive(Debug)]
pub struct Splitter<R> {
    reader: R,
    chunk_size: usize,
    next_seq: u64,
    done: bool,
}

impl<R: tokio::io::AsyncRead + Unpin> Splitter<R> {
    /// A `chunk_size` of 0 is treated as 1.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            next_seq: FIRST_CHUNK,
            done: false,
        }
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.chunk_size];
        let n = loop {
            match self.reader.read(&mut buf).await {
                Ok(n) => break n,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.done = true;
                    return Err(TransferError::SourceRead(error));
                }
            }
        };
        buf.truncate(n);
        if n == 0 {
            self.done = true;
            tracing::debug!("end of stream after {} chunks", self.next_seq - FIRST_CHUNK);
            return Ok(Some(Chunk::last(buf)));
        }
        let chunk = Chunk::data(self.next_seq, buf);
        self.next_seq += 1;
        Ok(Some(chunk))
    }
}
