use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use common::summary::TransferSummary;
use remote::protocol::{self, Chunk};
use remote::{TransferError, receiver, sender};

type Received = tokio::task::JoinHandle<Result<(Vec<u8>, TransferSummary), TransferError>>;

async fn start_receiver(settings: receiver::Settings) -> Result<(String, Received)> {
    let receiver = receiver::Receiver::bind("127.0.0.1:0", settings).await?;
    let url = format!("http://{}/", receiver.local_addr()?);
    let handle = tokio::spawn(async move {
        let mut out = Vec::new();
        let summary = receiver.receive(&mut out).await?;
        Ok((out, summary))
    });
    Ok((url, handle))
}

fn client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().no_proxy().build()?)
}

fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[tokio::test]
async fn test_transfer_small_stream() -> Result<()> {
    let (url, received) = start_receiver(Default::default()).await?;
    let data = test_data(1200);
    let sender = sender::Sender::new(&url, Default::default())?;
    let sent = sender.send(&data[..]).await?;
    assert_eq!(sent.chunks, 3);
    assert_eq!(sent.bytes, 1200);
    let (out, summary) = received.await??;
    assert_eq!(out, data);
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.bytes, 1200);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transfer_parallel_unthrottled() -> Result<()> {
    let (url, received) = start_receiver(Default::default()).await?;
    let data = test_data(300_000);
    let sender = sender::Sender::new(
        &url,
        sender::Settings {
            chunk_size: 1000,
            max_in_flight: 16,
            rate_limit: common::RateLimit::unlimited(),
            ..Default::default()
        },
    )?;
    let sent = sender.send(&data[..]).await?;
    assert_eq!(sent.chunks, 300);
    let (out, _) = received.await??;
    assert_eq!(out.len(), data.len());
    assert!(out == data, "output differs from input");
    Ok(())
}

#[tokio::test]
async fn test_transfer_empty_stream() -> Result<()> {
    let (url, received) = start_receiver(Default::default()).await?;
    let sender = sender::Sender::new(&url, Default::default())?;
    let sent = sender.send(&b""[..]).await?;
    assert_eq!(sent.chunks, 0);
    let (out, _) = received.await??;
    assert!(out.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_delivery() -> Result<()> {
    let (url, received) = start_receiver(Default::default()).await?;
    let client = client()?;
    // chunk 1 last among the data chunks, final after everything
    for chunk in [
        Chunk::data(3, &b"gh"[..]),
        Chunk::data(2, &b"def"[..]),
        Chunk::data(1, &b"abc"[..]),
        Chunk::last(&b"!"[..]),
    ] {
        let response = protocol::encode(&client, &url, chunk).send().await?;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }
    let (out, _) = received.await??;
    assert_eq!(out, b"abcdefgh!");
    Ok(())
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() -> Result<()> {
    let (url, received) = start_receiver(Default::default()).await?;
    let client = client()?;
    let response = client.post(&url).body("no header").send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let response = client
        .post(&url)
        .header(protocol::CHUNK_HEADER, "abc")
        .body("bad header")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let response = client.get(&url).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    // the session is unaffected, a regular transfer still goes through
    let sender = sender::Sender::new(&url, Default::default())?;
    sender.send(&b"still fine"[..]).await?;
    let (out, summary) = received.await??;
    assert_eq!(out, b"still fine");
    assert_eq!(summary.chunks, 1);
    Ok(())
}

#[tokio::test]
async fn test_buffer_overflow_cancels_transfer() -> Result<()> {
    let (url, received) = start_receiver(receiver::Settings {
        max_buffered_bytes: 10,
        ..Default::default()
    })
    .await?;
    let client = client()?;
    let response = protocol::encode(&client, &url, Chunk::data(2, &b"123456"[..]))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let response = protocol::encode(&client, &url, Chunk::data(3, &b"78901"[..]))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let result = received.await?;
    assert!(
        matches!(result, Err(TransferError::BufferOverflow { budget: 10, .. })),
        "{result:?}"
    );
    Ok(())
}

#[tokio::test]
async fn test_oversized_chunk_cancels_transfer() -> Result<()> {
    let (url, received) = start_receiver(receiver::Settings {
        max_buffered_bytes: 10,
        idle_timeout: None,
    })
    .await?;
    let client = client()?;
    let response = protocol::encode(&client, &url, Chunk::data(1, test_data(50)))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let result = tokio::time::timeout(std::time::Duration::from_secs(10), received).await??;
    assert!(
        matches!(
            result,
            Err(TransferError::BufferOverflow {
                buffered: 50,
                budget: 10
            })
        ),
        "{result:?}"
    );
    Ok(())
}

#[tokio::test]
async fn test_sender_fails_on_rejected_chunk() -> Result<()> {
    // chunks larger than the receiver budget are refused outright
    let (url, received) = start_receiver(receiver::Settings {
        max_buffered_bytes: 100,
        idle_timeout: None,
    })
    .await?;
    let sender = sender::Sender::new(
        &url,
        sender::Settings {
            chunk_size: 200,
            max_in_flight: 1,
            ..Default::default()
        },
    )?;
    let result = sender.send(&test_data(1000)[..]).await;
    assert!(
        matches!(
            result,
            Err(TransferError::Rejected { status, .. }) if status == reqwest::StatusCode::FORBIDDEN
        ),
        "{result:?}"
    );
    let result = tokio::time::timeout(std::time::Duration::from_secs(10), received).await??;
    assert!(
        matches!(result, Err(TransferError::BufferOverflow { budget: 100, .. })),
        "{result:?}"
    );
    Ok(())
}

#[derive(Default)]
struct StubLog {
    requests: AtomicUsize,
    final_seen: AtomicBool,
}

/// Receiver stand-in answering 500 to chunk 1 and 200 to everything else.
async fn start_failing_stub() -> Result<(String, Arc<StubLog>)> {
    async fn handle(
        axum::extract::State(log): axum::extract::State<Arc<StubLog>>,
        headers: axum::http::HeaderMap,
    ) -> axum::http::StatusCode {
        log.requests.fetch_add(1, Ordering::SeqCst);
        match protocol::decode(&headers) {
            Ok(protocol::ChunkNumber::Final) => {
                log.final_seen.store(true, Ordering::SeqCst);
                axum::http::StatusCode::OK
            }
            Ok(protocol::ChunkNumber::Data(1)) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            _ => axum::http::StatusCode::OK,
        }
    }
    let log = Arc::new(StubLog::default());
    let app = axum::Router::new()
        .route("/", axum::routing::post(handle))
        .with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/", listener.local_addr()?);
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok((url, log))
}

#[tokio::test]
async fn test_failed_chunk_stops_dispatch() -> Result<()> {
    let (url, log) = start_failing_stub().await?;
    let max_in_flight = 1;
    let sender = sender::Sender::new(
        &url,
        sender::Settings {
            chunk_size: 100,
            max_in_flight,
            rate_limit: common::RateLimit::unlimited(),
            ..Default::default()
        },
    )?;
    let result = sender.send(&test_data(10_000)[..]).await;
    assert!(
        matches!(
            result,
            Err(TransferError::Rejected { chunk: protocol::ChunkNumber::Data(1), status })
                if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
        ),
        "{result:?}"
    );
    let requests = log.requests.load(Ordering::SeqCst);
    assert!(
        (1..=max_in_flight + 1).contains(&requests),
        "{requests} requests reached the receiver"
    );
    assert!(!log.final_seen.load(Ordering::SeqCst));
    Ok(())
}
