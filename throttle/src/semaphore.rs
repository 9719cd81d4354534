use std::sync::atomic::{AtomicBool, Ordering};

/// Token semaphore with an enable flag.
///
/// When disabled (configured with zero capacity) every acquisition succeeds immediately.
pub struct Semaphore {
    flag: AtomicBool,
    capacity: usize,
    sem: tokio::sync::Semaphore,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            flag: AtomicBool::new(capacity > 0),
            capacity,
            sem: tokio::sync::Semaphore::new(capacity),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub async fn consume_many(
        &self,
        value: u32,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<(), crate::Error> {
        if !self.is_enabled() || value == 0 {
            return Ok(());
        }
        if value as usize > self.capacity {
            return Err(crate::Error::ExceedsBurst {
                requested: u64::from(value),
                burst: self.capacity as u64,
            });
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(crate::Error::Cancelled),
            permit = self.sem.acquire_many(value) => {
                permit.map_err(|_| crate::Error::Closed)?.forget();
                Ok(())
            }
        }
    }

    /// Adds up to `replenish` tokens every `interval`, never filling past capacity.
    pub async fn run_replenish_thread(
        &self,
        replenish: usize,
        interval: std::time::Duration,
        cancel: &tokio_util::sync::CancellationToken,
    ) {
        if !self.is_enabled() {
            return;
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            let curr_permits = self.sem.available_permits();
            if curr_permits >= self.capacity {
                continue;
            }
            self.sem
                .add_permits(std::cmp::min(replenish, self.capacity - curr_permits));
        }
    }
}
