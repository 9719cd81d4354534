//! Receiver-side reordering of chunks
//!
//! Request handlers insert chunks with [`ReassemblyBuffer::accept_chunk`] and
//! [`ReassemblyBuffer::accept_final`] in whatever order they arrive. A single flush task,
//! [`ReassemblyBuffer::run_flush`], drains them into the output strictly by sequence number.
//!
//! All buffer state sits behind one mutex so the next expected sequence number, the pending map
//! and its byte total always change together.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use crate::TransferError;
use crate::protocol::{ChunkNumber, FIRST_CHUNK};
use crate::session::Session;

/// Default cap on bytes held for out-of-order chunks.
pub const DEFAULT_MAX_BUFFERED_BYTES: u64 = 512_000_000;

/// What happened to an accepted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    Buffered,
    /// An unflushed chunk with the same number was replaced.
    Replaced,
    /// The chunk was already written out (or precedes the first chunk) and was dropped.
    Stale,
    /// A final chunk was already recorded; the new one was dropped.
    DuplicateFinal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("transfer is no longer accepting chunks")]
    Closed,
    #[error("chunk would raise buffered bytes to {buffered}, budget is {budget}")]
    Overflow { buffered: u64, budget: u64 },
}

#[derive(Debug)]
struct BufferState {
    expected_next: u64,
    pending: BTreeMap<u64, Bytes>,
    pending_bytes: u64,
    final_payload: Option<Bytes>,
    finished: bool,
    /// Set once the flush task has exited.
    closed: bool,
}

enum Step {
    Write(u64, Bytes),
    Finish(Bytes),
    Wait,
    Cancelled,
}

#[derive(Debug)]
pub struct ReassemblyBuffer {
    state: std::sync::Mutex<BufferState>,
    budget: u64,
    session: Arc<Session>,
    notify: tokio::sync::Notify,
    counters: common::summary::TransferCounters,
}

impl ReassemblyBuffer {
    pub fn new(budget: u64, session: Arc<Session>) -> Self {
        Self {
            state: std::sync::Mutex::new(BufferState {
                expected_next: FIRST_CHUNK,
                pending: BTreeMap::new(),
                pending_bytes: 0,
                final_payload: None,
                finished: false,
                closed: false,
            }),
            budget,
            session,
            notify: tokio::sync::Notify::new(),
            counters: common::summary::TransferCounters::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn expected_next(&self) -> u64 {
        self.lock().expected_next
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.lock().pending_bytes
    }

    /// True once the final chunk has been received.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Buffer data chunk `seq`.
    ///
    /// A chunk pushing the buffered total past the budget is not stored and cancels the session.
    pub fn accept_chunk(&self, seq: u64, payload: Bytes) -> Result<Accepted, Rejected> {
        let mut state = self.lock();
        if state.closed || self.session.is_cancelled() {
            return Err(Rejected::Closed);
        }
        if seq < state.expected_next {
            tracing::debug!(
                "dropping chunk {} (next expected is {})",
                seq,
                state.expected_next
            );
            return Ok(Accepted::Stale);
        }
        let replaced_len = state.pending.get(&seq).map_or(0, |old| old.len() as u64);
        let buffered = state.pending_bytes - replaced_len + payload.len() as u64;
        if buffered > self.budget {
            drop(state);
            return Err(self.overflow(buffered));
        }
        let previous = state.pending.insert(seq, payload);
        state.pending_bytes = buffered;
        drop(state);
        self.notify.notify_one();
        if previous.is_some() {
            tracing::debug!("chunk {} delivered again, keeping the latest payload", seq);
            Ok(Accepted::Replaced)
        } else {
            Ok(Accepted::Buffered)
        }
    }

    /// Record the end-of-stream chunk. Its payload is written after every data chunk.
    pub fn accept_final(&self, payload: Bytes) -> Result<Accepted, Rejected> {
        let mut state = self.lock();
        if state.closed || self.session.is_cancelled() {
            return Err(Rejected::Closed);
        }
        if state.finished {
            tracing::warn!("final chunk delivered again, ignoring");
            return Ok(Accepted::DuplicateFinal);
        }
        state.final_payload = Some(payload);
        state.finished = true;
        drop(state);
        self.notify.notify_one();
        Ok(Accepted::Buffered)
    }

    /// Refuse a chunk of `len` bytes that was too large to read in full.
    ///
    /// Counts as an overflow of the budget and cancels the session.
    pub fn refuse_oversized(&self, len: u64) -> Rejected {
        if self.session.is_cancelled() {
            return Rejected::Closed;
        }
        let len = len.max(self.budget.saturating_add(1));
        let buffered = self.pending_bytes().saturating_add(len);
        self.overflow(buffered)
    }

    fn overflow(&self, buffered: u64) -> Rejected {
        self.session.fail(TransferError::BufferOverflow {
            buffered,
            budget: self.budget,
        });
        Rejected::Overflow {
            buffered,
            budget: self.budget,
        }
    }

    fn next_step(&self) -> Step {
        let mut state = self.lock();
        if self.session.is_cancelled() {
            return Step::Cancelled;
        }
        let expected = state.expected_next;
        if let Some(payload) = state.pending.remove(&expected) {
            state.pending_bytes -= payload.len() as u64;
            state.expected_next += 1;
            return Step::Write(expected, payload);
        }
        match state.final_payload.take() {
            Some(payload) if state.pending.is_empty() => Step::Finish(payload),
            payload => {
                state.final_payload = payload;
                Step::Wait
            }
        }
    }

    fn abort(&self, error: TransferError) -> TransferError {
        self.session.fail(error);
        self.session.take_error()
    }

    /// Write chunks to `sink` in sequence order until the final chunk has been written.
    ///
    /// Fails when the session is cancelled, when writing fails, or when `idle_timeout` passes
    /// without any chunk arriving. Nothing is written once the session is cancelled.
    #[tracing::instrument(skip(self, sink))]
    pub async fn run_flush<W>(
        &self,
        sink: &mut W,
        idle_timeout: Option<std::time::Duration>,
    ) -> Result<common::summary::TransferSummary, TransferError>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let result = self.flush_loop(sink, idle_timeout).await;
        self.lock().closed = true;
        result?;
        let summary = self.counters.summary();
        tracing::info!(
            "received {} chunks, {} bytes in {:?}",
            summary.chunks,
            summary.bytes,
            summary.elapsed
        );
        Ok(summary)
    }

    async fn flush_loop<W>(
        &self,
        sink: &mut W,
        idle_timeout: Option<std::time::Duration>,
    ) -> Result<(), TransferError>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        loop {
            match self.next_step() {
                Step::Cancelled => return Err(self.session.take_error()),
                Step::Write(seq, payload) => {
                    if let Err(source) = sink.write_all(&payload).await {
                        return Err(self.abort(TransferError::OutputWrite {
                            chunk: ChunkNumber::Data(seq),
                            source,
                        }));
                    }
                    tracing::trace!("flushed chunk {} ({} bytes)", seq, payload.len());
                    self.counters.add_chunk(payload.len());
                }
                Step::Finish(payload) => {
                    let written = async {
                        sink.write_all(&payload).await?;
                        sink.flush().await
                    }
                    .await;
                    if let Err(source) = written {
                        return Err(self.abort(TransferError::OutputWrite {
                            chunk: ChunkNumber::Final,
                            source,
                        }));
                    }
                    if !payload.is_empty() {
                        self.counters.add_chunk(payload.len());
                    }
                    tracing::debug!("final chunk written");
                    return Ok(());
                }
                Step::Wait => {
                    let woken = async {
                        tokio::select! {
                            biased;
                            _ = self.session.cancelled() => {},
                            _ = self.notify.notified() => {},
                        }
                    };
                    match idle_timeout {
                        Some(idle) => {
                            if tokio::time::timeout(idle, woken).await.is_err() {
                                return Err(self.abort(TransferError::Stalled(idle)));
                            }
                        }
                        None => woken.await,
                    }
                }
            }
        }
    }
}
