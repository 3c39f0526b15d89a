use std::sync::Arc;

use super::*;
use crate::{
    packet::StreamType,
    testing::{CountingDecryptor, encrypted_packet},
};

#[test]
fn test_handle_released_once_on_drop() {
    let counting = CountingDecryptor::new();
    let decryptor: Arc<dyn Decryptor> = counting.clone();

    let packet = DecryptedPacket::decrypt(&decryptor, encrypted_packet(StreamType::Video, 3))
        .unwrap();
    assert_eq!(packet.handle(), NativeHandle(1));
    assert_eq!(packet.packet().stream_type, StreamType::Video);
    assert!(counting.released().is_empty());

    drop(packet);
    assert_eq!(counting.released(), vec![NativeHandle(1)]);
}

#[test]
fn test_failed_decrypt_has_nothing_to_release() {
    let counting = CountingDecryptor::new();
    let decryptor: Arc<dyn Decryptor> = counting.clone();

    let mut packet = encrypted_packet(StreamType::Audio, 0);
    packet.key_id = bytes::Bytes::new();

    assert!(DecryptedPacket::decrypt(&decryptor, packet).is_err());
    assert_eq!(counting.issued(), 0);
    assert!(counting.released().is_empty());
}

#[test]
fn test_native_handle_display() {
    assert_eq!(NativeHandle(255).to_string(), "0xff");
}
