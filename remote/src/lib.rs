//! Chunked HTTP transport
//!
//! A transfer moves one byte stream from a [`sender::Sender`] to a [`receiver::Receiver`]:
//!
//! 1. The [`splitter::Splitter`] cuts the source into chunks numbered from 1, followed by a
//!    final chunk marking the end of the stream.
//! 2. The sender passes every chunk through the rate limiter and a bounded dispatch pool, and
//!    posts it as its own HTTP request (see [`protocol`] for the wire format).
//! 3. The receiver stores chunks in a [`reassembly::ReassemblyBuffer`] as they arrive and a
//!    single flush task writes them out strictly by number.
//!
//! Each side runs one [`Session`]. The first fatal error on either side cancels it, which stops
//! further dispatch, acquisition and output. Requests with a malformed header are rejected one
//! by one and do not affect the session.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> anyhow::Result<()> {
//! let receiver = remote::receiver::Receiver::bind("127.0.0.1:0", Default::default()).await?;
//! let addr = receiver.local_addr()?;
//! let receiving = tokio::spawn(async move {
//!     let mut out = Vec::new();
//!     receiver.receive(&mut out).await.map(|_| out)
//! });
//! let sender = remote::sender::Sender::new(&addr.to_string(), Default::default())?;
//! sender.send(&b"hello world"[..]).await?;
//! assert_eq!(receiving.await??, b"hello world");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod protocol;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod splitter;

pub use error::TransferError;
pub use session::Session;
