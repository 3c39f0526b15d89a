use thiserror::Error;

use crate::{packet::StreamType, sink::SubmitStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{0}: packet storage closed")]
    Closed(StreamType),

    #[error("packet fetch cancelled")]
    Cancelled,
}

/// Reasons a transfer session ends other than by an in-band packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("transfer cancelled")]
    Cancelled,

    #[error("{0}: stream completed")]
    StoreClosed(StreamType),

    #[error("{stream_type}: packet submit error {status:?}")]
    Submit {
        stream_type: StreamType,
        status: SubmitStatus,
    },
}

impl From<StorageError> for TransferError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Closed(stream_type) => TransferError::StoreClosed(stream_type),
            StorageError::Cancelled => TransferError::Cancelled,
        }
    }
}
