use std::fmt;

use bytes::Bytes;

use crate::{config::TransferConfig, packet::StreamType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Aac,
    Ac3,
    Eac3,
    Mp3,
    Opus,
    Pcm,
}

impl AudioCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "audio/aac",
            AudioCodec::Ac3 => "audio/ac3",
            AudioCodec::Eac3 => "audio/eac3",
            AudioCodec::Mp3 => "audio/mpeg",
            AudioCodec::Opus => "audio/opus",
            AudioCodec::Pcm => "audio/raw",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/avc",
            VideoCodec::H265 => "video/hevc",
            VideoCodec::Vp9 => "video/x-vnd.on2.vp9",
            VideoCodec::Av1 => "video/av01",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioStreamConfig {
    pub codec: AudioCodec,
    pub codec_extra_data: Bytes,
    pub sample_rate: u32,
    pub channel_layout: u32,
    pub bits_per_channel: u32,
    pub bit_rate: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoStreamConfig {
    pub codec: VideoCodec,
    pub codec_extra_data: Bytes,
    pub width: u32,
    pub height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub bit_rate: u64,
}

impl VideoStreamConfig {
    pub fn fps(&self) -> f32 {
        if self.frame_rate_den == 0 {
            return 0.0;
        }
        self.frame_rate_num as f32 / self.frame_rate_den as f32
    }
}

/// Decoder parameters of one elementary stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamConfig {
    Audio(AudioStreamConfig),
    Video(VideoStreamConfig),
}

impl StreamConfig {
    pub fn stream_type(&self) -> StreamType {
        match self {
            StreamConfig::Audio(_) => StreamType::Audio,
            StreamConfig::Video(_) => StreamType::Video,
        }
    }
}

impl From<AudioStreamConfig> for StreamConfig {
    fn from(config: AudioStreamConfig) -> Self {
        StreamConfig::Audio(config)
    }
}

impl From<VideoStreamConfig> for StreamConfig {
    fn from(config: VideoStreamConfig) -> Self {
        StreamConfig::Video(config)
    }
}

/// Decides whether the sink can keep decoding across a configuration change
/// without being reset.
pub type CompatibilityFn = fn(&StreamConfig, &StreamConfig, &TransferConfig) -> bool;

pub fn default_compatibility(
    current: &StreamConfig,
    next: &StreamConfig,
    limits: &TransferConfig,
) -> bool {
    match (current, next) {
        (StreamConfig::Audio(a), StreamConfig::Audio(b)) => {
            a.codec == b.codec
                && a.sample_rate == b.sample_rate
                && a.channel_layout == b.channel_layout
                && a.bits_per_channel == b.bits_per_channel
        }
        (StreamConfig::Video(a), StreamConfig::Video(b)) => {
            a.codec == b.codec
                && a.codec_extra_data == b.codec_extra_data
                && b.width <= limits.max_video_width
                && b.height <= limits.max_video_height
        }
        _ => false,
    }
}

/// Audio stream description pushed to the decoder sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioStreamInfo {
    pub mime_type: &'static str,
    pub codec_data: Bytes,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Video stream description pushed to the decoder sink. `max_width` and
/// `max_height` bound in-stream resolution changes the sink must absorb.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoStreamInfo {
    pub mime_type: &'static str,
    pub codec_data: Bytes,
    pub width: u32,
    pub height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub num: u32,
    pub den: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamInfo {
    Audio(AudioStreamInfo),
    Video(VideoStreamInfo),
}

impl StreamInfo {
    pub fn stream_type(&self) -> StreamType {
        match self {
            StreamInfo::Audio(_) => StreamType::Audio,
            StreamInfo::Video(_) => StreamType::Video,
        }
    }
}

impl From<&AudioStreamConfig> for AudioStreamInfo {
    fn from(config: &AudioStreamConfig) -> Self {
        Self {
            mime_type: config.codec.mime_type(),
            codec_data: config.codec_extra_data.clone(),
            sample_rate: config.sample_rate,
            channels: config.channel_layout,
        }
    }
}

impl VideoStreamInfo {
    pub fn from_config(config: &VideoStreamConfig, limits: &TransferConfig) -> Self {
        Self {
            mime_type: config.codec.mime_type(),
            codec_data: config.codec_extra_data.clone(),
            width: config.width,
            height: config.height,
            max_width: limits.max_video_width,
            max_height: limits.max_video_height,
            num: config.frame_rate_num,
            den: config.frame_rate_den,
        }
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamInfo::Audio(info) => write!(
                f,
                "mime: {}, codec data: {} bytes, sample rate: {}, channels: {}",
                info.mime_type,
                info.codec_data.len(),
                info.sample_rate,
                info.channels
            ),
            StreamInfo::Video(info) => write!(
                f,
                "mime: {}, codec data: {} bytes, size: {}x{} (max {}x{}), rate: {}/{}",
                info.mime_type,
                info.codec_data.len(),
                info.width,
                info.height,
                info.max_width,
                info.max_height,
                info.num,
                info.den
            ),
        }
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;
