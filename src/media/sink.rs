use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use es_bus::{
    drm::NativeHandle,
    packet::{EsPacket, StreamType},
    sink::{DecoderSink, SubmitStatus},
    stream::StreamInfo,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Status a real decoder reports for a packet it cannot parse.
pub const INVALID_PACKET: i32 = -22;

#[derive(Default)]
struct SinkState {
    streams: HashMap<StreamType, StreamInfo>,
    buffered: HashMap<StreamType, usize>,
    submitted: HashMap<StreamType, u64>,
    eos: HashSet<StreamType>,
}

/// Decoder stand-in with a bounded per-stream buffer that drains on a timer.
pub struct SimulatedSink {
    state: Mutex<SinkState>,
    capacity: usize,
    drain: Arc<Notify>,
}

impl SimulatedSink {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SinkState::default()),
            capacity: capacity.max(1),
            drain: Arc::new(Notify::new()),
        })
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consumes one buffered packet per stream every `period` until
    /// `cancel` fires.
    pub fn spawn_drain(self: &Arc<Self>, period: Duration, cancel: CancellationToken) {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break;
                    },
                    _ = ticker.tick() => {
                        if sink.drain_once() {
                            sink.drain.notify_waiters();
                        }
                    },
                }
            }
            log::debug!("sink drain task finished");
        });
    }

    /// Returns true if anything was consumed.
    pub fn drain_once(&self) -> bool {
        let mut state = self.state();
        let mut drained = false;
        for buffered in state.buffered.values_mut() {
            if *buffered > 0 {
                *buffered -= 1;
                drained = true;
            }
        }
        drained
    }

    pub fn submitted(&self, stream_type: StreamType) -> u64 {
        self.state()
            .submitted
            .get(&stream_type)
            .copied()
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn buffered(&self, stream_type: StreamType) -> usize {
        self.state()
            .buffered
            .get(&stream_type)
            .copied()
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn stream_info(&self, stream_type: StreamType) -> Option<StreamInfo> {
        self.state().streams.get(&stream_type).cloned()
    }

    pub fn is_eos(&self, stream_type: StreamType) -> bool {
        self.state().eos.contains(&stream_type)
    }

    fn accept(&self, packet: &EsPacket) -> SubmitStatus {
        let mut state = self.state();
        if !state.streams.contains_key(&packet.stream_type) {
            return SubmitStatus::NotPrepared;
        }
        if packet.data.is_empty() {
            return SubmitStatus::Fatal(INVALID_PACKET);
        }

        let buffered = state.buffered.entry(packet.stream_type).or_default();
        if *buffered >= self.capacity {
            return SubmitStatus::Full;
        }
        *buffered += 1;
        *state.submitted.entry(packet.stream_type).or_default() += 1;
        SubmitStatus::Success
    }
}

impl DecoderSink for SimulatedSink {
    fn add_stream(&self, info: StreamInfo) -> anyhow::Result<()> {
        let stream_type = info.stream_type();
        log::info!("sink: add {} stream: {}", stream_type, info);

        let mut state = self.state();
        state.streams.insert(stream_type, info);
        Ok(())
    }

    fn submit_packet(&self, packet: &EsPacket) -> SubmitStatus {
        self.accept(packet)
    }

    fn submit_decrypted_packet(&self, packet: &EsPacket, handle: NativeHandle) -> SubmitStatus {
        log::trace!("sink: {} decrypted packet, handle {}", packet.stream_type, handle);
        self.accept(packet)
    }

    fn submit_eos(&self, stream_type: StreamType) -> SubmitStatus {
        let mut state = self.state();
        if !state.streams.contains_key(&stream_type) {
            return SubmitStatus::NotPrepared;
        }
        log::info!("sink: {} eos", stream_type);
        state.eos.insert(stream_type);
        SubmitStatus::Success
    }

    fn reset(&self) -> anyhow::Result<()> {
        log::info!("sink: reset");
        let mut state = self.state();
        state.streams.clear();
        state.buffered.clear();
        Ok(())
    }

    fn drain_notify(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.drain))
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
