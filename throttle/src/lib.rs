//! Admission control for chunk dispatch
//!
//! This crate provides the two gates every outbound chunk passes through before it is put on
//! the wire:
//!
//! 1. **Rate limiter** - a token bucket measured in bytes, bounding aggregate throughput
//! 2. **Concurrency limit** - a counting semaphore bounding the number of in-flight requests
//!
//! Both gates are owned by a single transfer session and every wait on them is cancellable
//! through a [`tokio_util::sync::CancellationToken`], so a failing session never leaves a task
//! parked on a permit that will not come.
//!
//! # Rate Limiter
//!
//! The bucket holds at most twice the configured rate (one second of burst on top of the
//! steady rate) and starts full. A background task tops it up at a fixed interval:
//!
//! ```rust,no_run
//! use throttle::RateLimiter;
//!
//! # async fn example() -> Result<(), throttle::Error> {
//! let cancel = tokio_util::sync::CancellationToken::new();
//! // 1.25 MB/s, which is 10 Mbps
//! let limiter = std::sync::Arc::new(RateLimiter::new(1_250_000));
//! tokio::spawn({
//!     let limiter = limiter.clone();
//!     let cancel = cancel.clone();
//!     async move { limiter.run_replenish(&cancel).await }
//! });
//! limiter.acquire(512, &cancel).await?;
//! // send 512 bytes here
//! # Ok(())
//! # }
//! ```
//!
//! A rate of zero disables the limiter: every acquisition succeeds immediately.
//!
//! # Token Calculation
//!
//! Every interval the replenish task adds:
//!
//! ```text
//! tokens = max(1, bytes_per_sec * interval / 1s)
//! ```
//!
//! capped so the bucket never exceeds its burst capacity. Over any window of length `t` the
//! limiter therefore admits at most `burst + bytes_per_sec * t` bytes.
//!
//! # Concurrency Limit
//!
//! ```rust,no_run
//! use throttle::ConcurrencyLimit;
//!
//! # async fn example() -> Result<(), throttle::Error> {
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let slots = ConcurrencyLimit::new(128);
//! let permit = slots.acquire(&cancel).await?;
//! // the slot is released when `permit` is dropped
//! drop(permit);
//! # Ok(())
//! # }
//! ```

mod semaphore;

/// Interval between rate limiter top-ups.
pub const REPLENISH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("acquisition cancelled")]
    Cancelled,
    #[error("requested {requested} tokens, burst capacity is {burst}")]
    ExceedsBurst { requested: u64, burst: u64 },
    #[error("limiter closed")]
    Closed,
}

/// Token bucket counting bytes.
pub struct RateLimiter {
    tokens: semaphore::Semaphore,
    bytes_per_sec: u64,
    replenish: usize,
}

impl RateLimiter {
    /// Creates a full bucket admitting `bytes_per_sec` with a burst of twice that. Zero disables it.
    pub fn new(bytes_per_sec: u64) -> Self {
        let burst = usize::try_from(bytes_per_sec.saturating_mul(2)).unwrap_or(usize::MAX);
        let per_interval =
            u128::from(bytes_per_sec) * REPLENISH_INTERVAL.as_millis() / 1000;
        let replenish = std::cmp::max(1, usize::try_from(per_interval).unwrap_or(usize::MAX));
        tracing::debug!(
            "rate limiter: {} bytes/s, burst {} bytes, {} tokens every {:?}",
            bytes_per_sec,
            burst,
            replenish,
            REPLENISH_INTERVAL
        );
        Self {
            tokens: semaphore::Semaphore::new(burst),
            bytes_per_sec,
            replenish,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.tokens.is_enabled()
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    pub fn burst(&self) -> u64 {
        self.tokens.capacity() as u64
    }

    /// Waits until `bytes` tokens are available and consumes them.
    ///
    /// Fails right away when `bytes` can never fit in the bucket, and as soon as `cancel` fires.
    pub async fn acquire(
        &self,
        bytes: usize,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<(), Error> {
        if !self.is_enabled() {
            return Ok(());
        }
        let tokens = u32::try_from(bytes).map_err(|_| Error::ExceedsBurst {
            requested: bytes as u64,
            burst: self.burst(),
        })?;
        self.tokens.consume_many(tokens, cancel).await
    }

    /// Keeps topping up the bucket until `cancel` fires. Returns immediately when disabled.
    pub async fn run_replenish(&self, cancel: &tokio_util::sync::CancellationToken) {
        self.tokens
            .run_replenish_thread(self.replenish, REPLENISH_INTERVAL, cancel)
            .await;
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("bytes_per_sec", &self.bytes_per_sec)
            .field("burst", &self.burst())
            .field("available", &self.tokens.available())
            .finish()
    }
}

/// Caps the number of simultaneously held slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit {
    sem: std::sync::Arc<tokio::sync::Semaphore>,
    max: usize,
}

impl ConcurrencyLimit {
    pub fn new(max: usize) -> Self {
        Self {
            sem: std::sync::Arc::new(tokio::sync::Semaphore::new(max)),
            max,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn in_flight(&self) -> usize {
        self.max.saturating_sub(self.sem.available_permits())
    }

    pub async fn acquire(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            permit = self.sem.clone().acquire_owned() => permit.map_err(|_| Error::Closed),
        }
    }
}
