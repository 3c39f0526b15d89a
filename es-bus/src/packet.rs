use std::{fmt, time::Duration};

use bytes::Bytes;

use crate::stream::StreamConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    Audio,
    Video,
}

impl StreamType {
    pub const ALL: [StreamType; 2] = [StreamType::Audio, StreamType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Audio => "audio",
            StreamType::Video => "video",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a producer can push into the packet storage, in stream order.
#[derive(Clone, Debug)]
pub enum Packet {
    Data(DataPacket),
    Encrypted(EncryptedPacket),
    /// In-band configuration change, ordered with the data around it.
    Config(StreamConfig),
    Eos(StreamType),
}

impl Packet {
    pub fn stream_type(&self) -> StreamType {
        match self {
            Packet::Data(packet) => packet.stream_type,
            Packet::Encrypted(packet) => packet.packet.stream_type,
            Packet::Config(config) => config.stream_type(),
            Packet::Eos(stream_type) => *stream_type,
        }
    }

    pub fn pts(&self) -> Option<Duration> {
        match self {
            Packet::Data(packet) => Some(packet.pts),
            Packet::Encrypted(packet) => Some(packet.packet.pts),
            _ => None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Packet::Data(packet) => Some(packet.duration),
            Packet::Encrypted(packet) => Some(packet.packet.duration),
            _ => None,
        }
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, Packet::Eos(_))
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Packet::Encrypted(_))
    }
}

/// Encoded, clear media data for one access unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPacket {
    pub stream_type: StreamType,
    pub pts: Duration,
    pub dts: Duration,
    pub duration: Duration,
    pub is_key: bool,
    pub data: Bytes,
}

impl DataPacket {
    pub fn new(stream_type: StreamType, pts: Duration, duration: Duration, data: Bytes) -> Self {
        Self {
            stream_type,
            pts,
            dts: pts,
            duration,
            is_key: false,
            data,
        }
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Sink representation of the packet.
    pub fn to_es_packet(&self) -> EsPacket {
        EsPacket {
            stream_type: self.stream_type,
            pts: self.pts,
            duration: self.duration,
            data: self.data.clone(),
        }
    }
}

/// Clear/encrypted byte ranges within an encrypted sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subsample {
    pub clear_bytes: u32,
    pub encrypted_bytes: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedPacket {
    /// Ciphertext payload and timing.
    pub packet: DataPacket,
    pub key_id: Bytes,
    pub iv: Bytes,
    pub subsamples: Vec<Subsample>,
}

impl EncryptedPacket {
    pub fn stream_type(&self) -> StreamType {
        self.packet.stream_type
    }
}

/// Packet as handed to the decoder sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EsPacket {
    pub stream_type: StreamType,
    pub pts: Duration,
    pub duration: Duration,
    pub data: Bytes,
}

impl From<DataPacket> for Packet {
    fn from(packet: DataPacket) -> Self {
        Packet::Data(packet)
    }
}

impl From<EncryptedPacket> for Packet {
    fn from(packet: EncryptedPacket) -> Self {
        Packet::Encrypted(packet)
    }
}

impl From<StreamConfig> for Packet {
    fn from(config: StreamConfig) -> Self {
        Packet::Config(config)
    }
}
