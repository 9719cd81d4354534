use crate::TransferError;

/// Render `error` followed by its sources, `outer: inner: root`.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Cancellation scope of one transfer.
///
/// The first failure reported through [`Session::fail`] is kept and every party waiting on
/// [`Session::token`] is woken. Cancellation is terminal.
#[derive(Debug, Default)]
pub struct Session {
    token: tokio_util::sync::CancellationToken,
    error: std::sync::Mutex<Option<TransferError>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &tokio_util::sync::CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Record `error` unless an earlier one is already recorded, then cancel.
    pub fn fail(&self, error: TransferError) {
        let mut slot = self
            .error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_none() {
            tracing::error!("transfer failed: {}", error_chain(&error));
            *slot = Some(error);
        } else {
            tracing::debug!("ignoring error after session failure: {}", error);
        }
        drop(slot);
        self.token.cancel();
    }

    /// Cancel without recording a cause.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Take the recorded failure, or [`TransferError::Cancelled`] if none was recorded.
    pub fn take_error(&self) -> TransferError {
        self.error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .unwrap_or(TransferError::Cancelled)
    }

    /// `Ok` unless the session was cancelled.
    pub fn finish(&self) -> Result<(), TransferError> {
        if self.is_cancelled() {
            Err(self.take_error())
        } else {
            Ok(())
        }
    }
}
