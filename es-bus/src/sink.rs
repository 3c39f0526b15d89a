use std::sync::Arc;

use tokio::sync::Notify;

use crate::{
    drm::NativeHandle,
    packet::{EsPacket, StreamType},
    stream::StreamInfo,
};

/// Result of handing one packet to the decoder sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    Success,
    /// The sink has not been prepared to take data yet.
    NotPrepared,
    /// The sink's internal buffer is full.
    Full,
    /// Any other sink status, carried as the sink's raw code.
    Fatal(i32),
}

/// Decoder/render pipeline the engines feed. Shared by the audio and video
/// engines, so implementations must tolerate interleaved calls.
pub trait DecoderSink: Send + Sync {
    fn add_stream(&self, info: StreamInfo) -> anyhow::Result<()>;

    fn submit_packet(&self, packet: &EsPacket) -> SubmitStatus;

    /// Submits a packet whose payload lives behind a decryption handle.
    fn submit_decrypted_packet(&self, packet: &EsPacket, handle: NativeHandle) -> SubmitStatus;

    fn submit_eos(&self, stream_type: StreamType) -> SubmitStatus;

    /// Drops all configured streams so they can be added again.
    fn reset(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Notified whenever the sink frees buffer space. Sinks that return
    /// `None` are polled.
    fn drain_notify(&self) -> Option<Arc<Notify>> {
        None
    }
}
