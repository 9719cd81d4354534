use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use bytes::Bytes;

use crate::TransferError;
use crate::protocol::{self, ChunkNumber};
use crate::reassembly::ReassemblyBuffer;
use crate::session::Session;

/// How long open connections get to wind down once the output is complete.
pub const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Settings {
    pub max_buffered_bytes: u64,
    pub idle_timeout: Option<std::time::Duration>,
}

impl Settings {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.max_buffered_bytes == 0 {
            return Err("buffer budget must be greater than 0".to_string());
        }
        if self.idle_timeout == Some(std::time::Duration::ZERO) {
            return Err("idle timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_buffered_bytes: crate::reassembly::DEFAULT_MAX_BUFFERED_BYTES,
            idle_timeout: None,
        }
    }
}

/// Receiving half of a transfer: one HTTP endpoint feeding a [`ReassemblyBuffer`].
#[derive(Debug)]
pub struct Receiver {
    listener: tokio::net::TcpListener,
    settings: Settings,
}

impl Receiver {
    pub async fn bind<A>(addr: A, settings: Settings) -> anyhow::Result<Self>
    where
        A: tokio::net::ToSocketAddrs + std::fmt::Debug,
    {
        settings.validate().map_err(anyhow::Error::msg)?;
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to listen on {addr:?}"))?;
        Ok(Self { listener, settings })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept chunks until the whole stream has been written to `sink`.
    ///
    /// The listener is closed when the output is complete or the transfer fails.
    pub async fn receive<W>(
        self,
        sink: &mut W,
    ) -> Result<common::summary::TransferSummary, TransferError>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let session = Arc::new(Session::new());
        let buffer = Arc::new(ReassemblyBuffer::new(
            self.settings.max_buffered_bytes,
            session.clone(),
        ));
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("listening on {}", addr);
        }
        let shutdown = tokio_util::sync::CancellationToken::new();
        let server = tokio::spawn({
            let app = router(buffer.clone());
            let shutdown = shutdown.clone();
            let server = axum::serve(self.listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled_owned().await });
            async move { server.await }
        });
        let result = buffer.run_flush(sink, self.settings.idle_timeout).await;
        shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(Ok(Ok(()))) => tracing::debug!("listener closed"),
            Ok(Ok(Err(error))) => tracing::warn!("server failed: {}", error),
            Ok(Err(error)) => tracing::warn!("server task failed: {}", error),
            Err(_) => tracing::warn!(
                "connections still open after {:?}, closing anyway",
                SHUTDOWN_GRACE
            ),
        }
        result
    }
}

/// Single `POST /` endpoint. Request bodies are capped at the buffer budget, a larger body
/// overflows the buffer and cancels the transfer.
pub fn router(buffer: Arc<ReassemblyBuffer>) -> Router {
    let body_limit = usize::try_from(buffer.budget()).unwrap_or(usize::MAX);
    Router::new()
        .route("/", post(handle_chunk))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(buffer)
}

pub async fn handle_chunk(
    State(buffer): State<Arc<ReassemblyBuffer>>,
    headers: HeaderMap,
    body: Result<Bytes, axum::extract::rejection::BytesRejection>,
) -> StatusCode {
    let number = match protocol::decode(&headers) {
        Ok(number) => number,
        Err(error) => {
            tracing::warn!("rejecting request: {}", error);
            return StatusCode::FORBIDDEN;
        }
    };
    let failed = match number {
        ChunkNumber::Data(_) => StatusCode::FORBIDDEN,
        ChunkNumber::Final => StatusCode::NOT_FOUND,
    };
    let payload = match body {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!("failed reading body of chunk {}: {}", number, error);
            if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
                let len = headers
                    .get(CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(0);
                let rejected = buffer.refuse_oversized(len);
                tracing::debug!("chunk {} rejected: {}", number, rejected);
            }
            return failed;
        }
    };
    let accepted = match number {
        ChunkNumber::Data(seq) => buffer.accept_chunk(seq, payload),
        ChunkNumber::Final => buffer.accept_final(payload),
    };
    match accepted {
        Ok(outcome) => {
            tracing::trace!("chunk {}: {:?}", number, outcome);
            StatusCode::OK
        }
        Err(error) => {
            tracing::debug!("chunk {} rejected: {}", number, error);
            failed
        }
    }
}
