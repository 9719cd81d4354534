use std::sync::Arc;

use anyhow::Context;
use tracing::{Instrument, instrument};

use crate::TransferError;
use crate::protocol::{self, Chunk, ChunkNumber};
use crate::session::Session;
use crate::splitter::Splitter;

/// Chunk size used when a rate limit is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Chunk size used when sending unthrottled.
pub const UNTHROTTLED_CHUNK_SIZE: usize = 5_120_000;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 128;

pub const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Settings {
    pub chunk_size: usize,
    pub max_in_flight: usize,
    pub rate_limit: common::RateLimit,
    pub request_timeout: std::time::Duration,
}

impl Settings {
    /// Chunk size matching `rate_limit` when none is given explicitly.
    pub fn default_chunk_size(rate_limit: common::RateLimit) -> usize {
        if rate_limit.is_unlimited() {
            UNTHROTTLED_CHUNK_SIZE
        } else {
            DEFAULT_CHUNK_SIZE
        }
    }

    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        self.rate_limit.validate()?;
        if self.chunk_size == 0 {
            return Err("chunk size must be greater than 0".to_string());
        }
        if self.max_in_flight == 0 {
            return Err("max in-flight requests must be greater than 0".to_string());
        }
        if !self.rate_limit.is_unlimited() && self.chunk_size as u64 > self.rate_limit.burst_bytes()
        {
            return Err(format!(
                "chunk size {} exceeds the rate limiter burst of {} bytes, lower --chunk-size or raise --rate-limit",
                self.chunk_size,
                self.rate_limit.burst_bytes()
            ));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        let rate_limit = common::RateLimit::default();
        Self {
            chunk_size: Self::default_chunk_size(rate_limit),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            rate_limit,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Bounded set of in-flight chunk requests.
///
/// Slots come from a [`throttle::ConcurrencyLimit`]; spawned requests are tracked so the
/// sender can wait for every one of them to finish.
#[derive(Debug)]
pub struct DispatchPool {
    slots: throttle::ConcurrencyLimit,
    tracker: tokio_util::task::TaskTracker,
}

impl DispatchPool {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            slots: throttle::ConcurrencyLimit::new(max_in_flight),
            tracker: tokio_util::task::TaskTracker::new(),
        }
    }

    pub async fn acquire(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, throttle::Error> {
        self.slots.acquire(cancel).await
    }

    /// Run `job` in the background, holding `slot` until it completes.
    pub fn spawn<F>(&self, slot: tokio::sync::OwnedSemaphorePermit, job: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(async move {
            job.await;
            drop(slot);
        });
    }

    pub fn in_flight(&self) -> usize {
        self.slots.in_flight()
    }

    /// Wait until every spawned job has finished. The pool stays usable afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

/// Sending half of a transfer.
#[derive(Debug)]
pub struct Sender {
    client: reqwest::Client,
    url: String,
    settings: Settings,
}

/// Turn `host:port` into the endpoint URL; full URLs are kept as given.
pub fn endpoint_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}/")
    }
}

impl Sender {
    pub fn new(addr: &str, settings: Settings) -> anyhow::Result<Self> {
        settings.validate().map_err(anyhow::Error::msg)?;
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .no_proxy()
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            url: endpoint_url(addr),
            settings,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stream `reader` to the receiver and wait for every chunk to be acknowledged.
    ///
    /// Data chunks go out concurrently; the final chunk is sent only once all of them have
    /// been acknowledged so the receiver never sees the end of the stream ahead of its data.
    #[instrument(skip(self, reader), fields(url = %self.url))]
    pub async fn send<R>(&self, reader: R) -> Result<common::summary::TransferSummary, TransferError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let session = Arc::new(Session::new());
        let counters = Arc::new(common::summary::TransferCounters::new());
        let limiter = Arc::new(throttle::RateLimiter::new(
            self.settings.rate_limit.bytes_per_sec(),
        ));
        let replenish_stop = session.token().child_token();
        let replenish = tokio::spawn({
            let limiter = limiter.clone();
            let replenish_stop = replenish_stop.clone();
            async move { limiter.run_replenish(&replenish_stop).await }
        });
        let pool = DispatchPool::new(self.settings.max_in_flight);
        let mut splitter = Splitter::new(reader, self.settings.chunk_size);
        loop {
            let next = tokio::select! {
                biased;
                _ = session.cancelled() => break,
                next = splitter.next_chunk() => next,
            };
            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(error) => {
                    session.fail(error);
                    break;
                }
            };
            let is_final = chunk.number.is_final();
            if is_final {
                tracing::debug!("waiting for {} data chunks in flight", pool.in_flight());
                pool.drain().await;
                if session.is_cancelled() {
                    break;
                }
            }
            let slot = match pool.acquire(session.token()).await {
                Ok(slot) => slot,
                Err(error) => {
                    session.fail(error.into());
                    break;
                }
            };
            if let Err(error) = limiter.acquire(chunk.payload.len(), session.token()).await {
                session.fail(error.into());
                break;
            }
            let number = chunk.number;
            pool.spawn(
                slot,
                send_chunk(
                    self.client.clone(),
                    self.url.clone(),
                    chunk,
                    session.clone(),
                    counters.clone(),
                )
                .instrument(tracing::trace_span!("chunk", %number)),
            );
            if is_final {
                break;
            }
        }
        pool.drain().await;
        replenish_stop.cancel();
        if let Err(error) = replenish.await {
            tracing::warn!("rate limiter task failed: {}", error);
        }
        session.finish()?;
        let summary = counters.summary();
        tracing::info!(
            "sent {} chunks, {} bytes in {:?}",
            summary.chunks,
            summary.bytes,
            summary.elapsed
        );
        Ok(summary)
    }
}

async fn send_chunk(
    client: reqwest::Client,
    url: String,
    chunk: Chunk,
    session: Arc<Session>,
    counters: Arc<common::summary::TransferCounters>,
) {
    let number = chunk.number;
    let len = chunk.payload.len();
    match protocol::encode(&client, &url, chunk).send().await {
        Err(source) => session.fail(TransferError::Transport {
            chunk: number,
            source,
        }),
        Ok(response) if response.status() != reqwest::StatusCode::OK => {
            session.fail(TransferError::Rejected {
                chunk: number,
                status: response.status(),
            })
        }
        Ok(_) => {
            tracing::trace!("delivered {} bytes", len);
            if let ChunkNumber::Data(_) = number {
                counters.add_chunk(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunk_size_follows_rate() {
        assert_eq!(
            Settings::default_chunk_size(common::RateLimit { mbps: 10 }),
            DEFAULT_CHUNK_SIZE
        );
        assert_eq!(
            Settings::default_chunk_size(common::RateLimit::unlimited()),
            UNTHROTTLED_CHUNK_SIZE
        );
    }

    #[test]
    fn settings_validation() {
        assert!(Settings::default().validate().is_ok());
        let too_fast = Settings {
            rate_limit: common::RateLimit { mbps: 5000 },
            ..Default::default()
        };
        assert!(too_fast.validate().is_err());
        let no_chunk = Settings {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(no_chunk.validate().is_err());
        let no_slots = Settings {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(no_slots.validate().is_err());
        // 1 Mbps allows bursts of 250 kB
        let oversized = Settings {
            chunk_size: 250_001,
            rate_limit: common::RateLimit { mbps: 1 },
            ..Default::default()
        };
        assert!(oversized.validate().is_err());
        let unthrottled = Settings {
            chunk_size: UNTHROTTLED_CHUNK_SIZE,
            rate_limit: common::RateLimit::unlimited(),
            ..Default::default()
        };
        assert!(unthrottled.validate().is_ok());
    }

    #[test]
    fn endpoint_urls() {
        assert_eq!(endpoint_url("127.0.0.1:30000"), "http://127.0.0.1:30000/");
        assert_eq!(endpoint_url("http://host:1/"), "http://host:1/");
    }

    #[tokio::test]
    async fn pool_drains_all_jobs() {
        let cancel = tokio_util::sync::CancellationToken::new();
        let pool = DispatchPool::new(2);
        let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for _ in 0..5 {
            let slot = pool.acquire(&cancel).await.unwrap();
            let done = done.clone();
            pool.spawn(slot, async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
            assert!(pool.in_flight() <= 2);
        }
        pool.drain().await;
        assert_eq!(done.load(std::sync::atomic::Ordering::SeqCst), 5);
        assert_eq!(pool.in_flight(), 0);
        // reopened after drain
        let slot = pool.acquire(&cancel).await.unwrap();
        pool.spawn(slot, async {});
        pool.drain().await;
    }

    #[tokio::test]
    async fn unreachable_receiver_fails_transfer() {
        // grab a free port and release it so nothing is listening there
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let sender = Sender::new(
            &addr.to_string(),
            Settings {
                request_timeout: std::time::Duration::from_secs(5),
                ..Default::default()
            },
        )
        .unwrap();
        let result = sender.send(std::io::Cursor::new(vec![7u8; 2048])).await;
        assert!(
            matches!(result, Err(TransferError::Transport { .. })),
            "{result:?}"
        );
    }
}
