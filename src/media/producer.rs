use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use es_bus::{
    controller::EsStreamController,
    packet::{DataPacket, Packet, StreamType},
    storage::PacketStorage,
    stream::{AudioCodec, AudioStreamConfig, StreamConfig, VideoCodec, VideoStreamConfig},
};
use tokio_util::sync::CancellationToken;

use crate::{config::SimulationConfig, media::drm::XorDecryptor};

/// Synthetic demuxer output: interleaved audio and video packets in
/// presentation order, an optional mid-stream video configuration change,
/// then end of stream on both.
pub struct Producer {
    config: SimulationConfig,
    decryptor: Option<Arc<XorDecryptor>>,
}

impl Producer {
    pub fn new(config: SimulationConfig, decryptor: Option<Arc<XorDecryptor>>) -> Self {
        Self { config, decryptor }
    }

    pub fn audio_config() -> StreamConfig {
        StreamConfig::Audio(AudioStreamConfig {
            codec: AudioCodec::Aac,
            codec_extra_data: Bytes::from_static(&[0x11, 0x90]),
            sample_rate: 48_000,
            channel_layout: 2,
            bits_per_channel: 16,
            bit_rate: 128_000,
        })
    }

    pub fn video_config(&self) -> StreamConfig {
        StreamConfig::Video(self.base_video_config())
    }

    fn base_video_config(&self) -> VideoStreamConfig {
        VideoStreamConfig {
            codec: VideoCodec::H264,
            codec_extra_data: Bytes::from_static(&[0x01, 0x64, 0x00, 0x1f]),
            width: 1280,
            height: 720,
            frame_rate_num: self.config.frame_rate,
            frame_rate_den: 1,
            bit_rate: 3_000_000,
        }
    }

    /// Configuration sent at `resolution_switch_at`.
    pub fn switched_video_config(&self) -> StreamConfig {
        let base = self.base_video_config();
        let config = if self.config.incompatible_switch {
            VideoStreamConfig {
                codec: VideoCodec::H265,
                codec_extra_data: Bytes::from_static(&[0x01, 0x01, 0x60]),
                width: 3840,
                height: 2160,
                bit_rate: 15_000_000,
                ..base
            }
        } else {
            VideoStreamConfig {
                width: 1920,
                height: 1080,
                bit_rate: 6_000_000,
                ..base
            }
        };
        StreamConfig::Video(config)
    }

    fn video_frame(&self) -> Duration {
        Duration::from_secs(1) / self.config.frame_rate.max(1)
    }

    fn audio_frame(&self) -> Duration {
        Duration::from_millis(self.config.audio_frame_ms.max(1))
    }

    fn packet(&self, stream_type: StreamType, index: u64) -> Packet {
        let (frame, is_key) = match stream_type {
            StreamType::Video => {
                let gop = self.config.frame_rate.max(1) as u64;
                (self.video_frame(), index % gop == 0)
            }
            StreamType::Audio => (self.audio_frame(), true),
        };
        let pts = frame * index as u32;
        let payload = Bytes::from(vec![(index % 251) as u8 + 1; 64]);
        let packet = DataPacket::new(stream_type, pts, frame, payload).with_key(is_key);

        match (stream_type, self.decryptor.as_ref()) {
            (StreamType::Video, Some(decryptor)) if self.config.encrypted => {
                Packet::Encrypted(decryptor.encrypt(packet))
            }
            _ => Packet::Data(packet),
        }
    }

    /// Sends the initial configuration of both streams.
    pub fn configure(&self, controller: &EsStreamController) -> anyhow::Result<()> {
        controller.set_stream_config(Self::audio_config())?;
        controller.set_stream_config(self.video_config())?;
        Ok(())
    }

    pub async fn run(
        self,
        controller: Arc<EsStreamController>,
        storage: Arc<PacketStorage>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let interval = Duration::from_millis(self.config.producer_interval_ms);
        let (mut audio, mut video) = (0u64, 0u64);

        while audio < self.config.audio_packets || video < self.config.video_packets {
            let audio_pts = self.audio_frame() * audio as u32;
            let video_pts = self.video_frame() * video as u32;
            let next_video = video < self.config.video_packets
                && (audio >= self.config.audio_packets || video_pts <= audio_pts);

            if next_video {
                if self.config.resolution_switch_at == Some(video) && video > 0 {
                    log::info!("producer: video configuration change at packet {}", video);
                    controller.set_stream_config(self.switched_video_config())?;
                }
                storage.add(self.packet(StreamType::Video, video))?;
                video += 1;
            } else {
                storage.add(self.packet(StreamType::Audio, audio))?;
                audio += 1;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("producer: cancelled");
                    return Ok(());
                },
                _ = tokio::time::sleep(interval) => {},
            }
        }

        for stream_type in StreamType::ALL {
            storage.add(Packet::Eos(stream_type))?;
        }
        log::info!("producer: {} audio, {} video packets queued", audio, video);
        Ok(())
    }
}

#[cfg(test)]
#[path = "producer_test.rs"]
mod producer_test;
