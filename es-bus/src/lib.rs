//! Elementary stream transfer: drains demuxed audio/video packets from a
//! shared [`storage::PacketStorage`], decrypts them when needed and hands
//! them to a [`sink::DecoderSink`] under the sink's flow control.

pub mod config;
pub mod controller;
pub mod drm;
pub mod error;
pub mod es_stream;
pub mod packet;
pub mod sink;
pub mod storage;
pub mod stream;
pub mod submit;

#[cfg(test)]
mod testing;
