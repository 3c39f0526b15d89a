//! Test doubles shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::{
    drm::{Decrypted, Decryptor, NativeHandle},
    packet::{DataPacket, EncryptedPacket, EsPacket, StreamType},
    sink::{DecoderSink, SubmitStatus},
    stream::{AudioCodec, AudioStreamConfig, StreamConfig, StreamInfo, VideoCodec, VideoStreamConfig},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submitted {
    Packet(EsPacket),
    Decrypted(EsPacket, NativeHandle),
    Eos(StreamType),
}

impl Submitted {
    pub fn pts(&self) -> Option<Duration> {
        match self {
            Submitted::Packet(p) | Submitted::Decrypted(p, _) => Some(p.pts),
            Submitted::Eos(_) => None,
        }
    }
}

#[derive(Default)]
struct SinkState {
    streams: Vec<StreamInfo>,
    attempts: Vec<Submitted>,
    accepted: Vec<Submitted>,
    script: VecDeque<SubmitStatus>,
    resets: usize,
}

/// Sink that records every call and answers from a script, then with
/// `Success` once the script runs out.
#[derive(Default)]
pub struct RecordingSink {
    state: Mutex<SinkState>,
    drain: Option<Arc<Notify>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_drain(drain: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::default(),
            drain: Some(drain),
        })
    }

    pub fn script(&self, statuses: impl IntoIterator<Item = SubmitStatus>) {
        self.state.lock().unwrap().script.extend(statuses);
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.state.lock().unwrap().streams.clone()
    }

    pub fn attempts(&self) -> Vec<Submitted> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn accepted(&self) -> Vec<Submitted> {
        self.state.lock().unwrap().accepted.clone()
    }

    pub fn accepted_pts(&self) -> Vec<Duration> {
        self.accepted().iter().filter_map(Submitted::pts).collect()
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    fn record(&self, submitted: Submitted) -> SubmitStatus {
        let mut state = self.state.lock().unwrap();
        let status = state.script.pop_front().unwrap_or(SubmitStatus::Success);
        state.attempts.push(submitted.clone());
        if status == SubmitStatus::Success {
            state.accepted.push(submitted);
        }
        status
    }
}

impl DecoderSink for RecordingSink {
    fn add_stream(&self, info: StreamInfo) -> anyhow::Result<()> {
        self.state.lock().unwrap().streams.push(info);
        Ok(())
    }

    fn submit_packet(&self, packet: &EsPacket) -> SubmitStatus {
        self.record(Submitted::Packet(packet.clone()))
    }

    fn submit_decrypted_packet(&self, packet: &EsPacket, handle: NativeHandle) -> SubmitStatus {
        self.record(Submitted::Decrypted(packet.clone(), handle))
    }

    fn submit_eos(&self, stream_type: StreamType) -> SubmitStatus {
        self.record(Submitted::Eos(stream_type))
    }

    fn reset(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.resets += 1;
        state.streams.clear();
        Ok(())
    }

    fn drain_notify(&self) -> Option<Arc<Notify>> {
        self.drain.clone()
    }
}

/// Decryptor that hands out sequential handles and rejects packets
/// without a key id.
#[derive(Default)]
pub struct CountingDecryptor {
    next: AtomicU64,
    released: Mutex<Vec<NativeHandle>>,
}

impl CountingDecryptor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<NativeHandle> {
        self.released.lock().unwrap().clone()
    }
}

impl Decryptor for CountingDecryptor {
    fn decrypt(&self, packet: EncryptedPacket) -> anyhow::Result<Decrypted> {
        if packet.key_id.is_empty() {
            anyhow::bail!("no key for packet");
        }
        let handle = NativeHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(Decrypted {
            packet: packet.packet.to_es_packet(),
            handle,
        })
    }

    fn release_handle(&self, handle: NativeHandle) {
        self.released.lock().unwrap().push(handle);
    }
}

pub fn audio_config() -> StreamConfig {
    StreamConfig::Audio(AudioStreamConfig {
        codec: AudioCodec::Aac,
        codec_extra_data: Bytes::from_static(&[0x12, 0x10]),
        sample_rate: 48_000,
        channel_layout: 2,
        bits_per_channel: 16,
        bit_rate: 128_000,
    })
}

pub fn video_config(width: u32, height: u32) -> StreamConfig {
    StreamConfig::Video(VideoStreamConfig {
        codec: VideoCodec::H264,
        codec_extra_data: Bytes::from_static(&[0x01, 0x64, 0x00, 0x28]),
        width,
        height,
        frame_rate_num: 25,
        frame_rate_den: 1,
        bit_rate: 4_000_000,
    })
}

pub fn data_packet(stream_type: StreamType, index: u64) -> DataPacket {
    DataPacket::new(
        stream_type,
        Duration::from_millis(index * 40),
        Duration::from_millis(40),
        Bytes::from(vec![index as u8; 16]),
    )
}

pub fn encrypted_packet(stream_type: StreamType, index: u64) -> EncryptedPacket {
    EncryptedPacket {
        packet: data_packet(stream_type, index),
        key_id: Bytes::from_static(b"kid-0001"),
        iv: Bytes::from_static(&[0u8; 8]),
        subsamples: Vec::new(),
    }
}

pub fn pts(indices: impl IntoIterator<Item = u64>) -> Vec<Duration> {
    indices
        .into_iter()
        .map(|i| Duration::from_millis(i * 40))
        .collect()
}

/// Polls `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
