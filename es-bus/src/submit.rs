use std::{sync::Arc, time::Duration};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    config::TransferConfig, error::TransferError, packet::StreamType, sink::SubmitStatus,
};

/// Retry policy for sink submissions: backpressure statuses are retried
/// with the same packet after a cancellable wait, anything else but success
/// is fatal.
#[derive(Clone)]
pub struct SubmitPolicy {
    not_ready_delay: Duration,
    full_delay: Duration,
    drain: Option<Arc<Notify>>,
}

impl SubmitPolicy {
    pub fn new(config: &TransferConfig, drain: Option<Arc<Notify>>) -> Self {
        Self {
            not_ready_delay: config.not_ready_delay(),
            full_delay: config.full_delay(),
            drain,
        }
    }

    /// `Ok(None)` when the packet was taken, `Ok(Some(delay))` when it has
    /// to be resubmitted after `delay`.
    pub fn classify(
        &self,
        stream_type: StreamType,
        status: SubmitStatus,
    ) -> Result<Option<Duration>, TransferError> {
        match status {
            SubmitStatus::Success => Ok(None),
            SubmitStatus::NotPrepared => {
                log::info!("{}: {:?}", stream_type, status);
                Ok(Some(self.not_ready_delay))
            }
            SubmitStatus::Full => Ok(Some(self.full_delay)),
            SubmitStatus::Fatal(_) => Err(TransferError::Submit {
                stream_type,
                status,
            }),
        }
    }

    /// Sleeps for `delay`, waking early when the sink reports drained
    /// buffers. Returns `Cancelled` as soon as `cancel` fires.
    pub async fn wait(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let drained = async {
            match &self.drain {
                Some(notify) => notify.notified().await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = drained => Ok(()),
        }
    }

    /// Calls `submit` until the sink takes the packet, fails fatally or
    /// `cancel` fires. Every attempt resubmits the same packet.
    pub async fn submit<F>(
        &self,
        stream_type: StreamType,
        cancel: &CancellationToken,
        mut submit: F,
    ) -> Result<(), TransferError>
    where
        F: FnMut() -> SubmitStatus,
    {
        loop {
            let status = submit();
            let Some(delay) = self.classify(stream_type, status)? else {
                return Ok(());
            };
            self.wait(delay, cancel).await?;
        }
    }
}

#[cfg(test)]
#[path = "submit_test.rs"]
mod submit_test;
