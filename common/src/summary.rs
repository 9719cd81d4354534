use std::sync::atomic::{AtomicU64, Ordering};

/// Chunk and byte counters shared by the tasks of one transfer.
#[derive(Debug)]
pub struct TransferCounters {
    chunks: AtomicU64,
    bytes: AtomicU64,
    start_time: std::time::Instant,
}

impl Default for TransferCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferCounters {
    pub fn new() -> Self {
        Self {
            chunks: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn add_chunk(&self, bytes: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            chunks: self.chunks(),
            bytes: self.bytes(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub chunks: u64,
    pub bytes: u64,
    pub elapsed: std::time::Duration,
}

impl TransferSummary {
    pub fn bytes_per_sec(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

impl std::ops::Add for TransferSummary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            chunks: self.chunks + other.chunks,
            bytes: self.bytes + other.bytes,
            elapsed: std::cmp::max(self.elapsed, other.elapsed),
        }
    }
}

impl std::fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // round to milliseconds so the report stays readable
        let elapsed = std::time::Duration::from_millis(self.elapsed.as_millis() as u64);
        write!(
            f,
            "chunks: {}\n\
            bytes: {}\n\
            elapsed: {}\n\
            throughput: {}/s",
            self.chunks,
            bytesize::ByteSize(self.bytes),
            humantime::format_duration(elapsed),
            bytesize::ByteSize(self.bytes_per_sec()),
        )
    }
}
