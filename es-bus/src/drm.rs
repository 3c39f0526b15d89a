use std::{fmt, sync::Arc};

use crate::packet::{EncryptedPacket, EsPacket};

/// Opaque native decryption handle owned by the decryptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Output of a successful decrypt: sink packet metadata plus the handle the
/// sink reads the clear payload from.
#[derive(Debug)]
pub struct Decrypted {
    pub packet: EsPacket,
    pub handle: NativeHandle,
}

pub trait Decryptor: Send + Sync {
    fn decrypt(&self, packet: EncryptedPacket) -> anyhow::Result<Decrypted>;

    fn release_handle(&self, handle: NativeHandle);
}

/// Decrypted packet whose handle is released exactly once, when the packet
/// is dropped.
pub struct DecryptedPacket {
    packet: EsPacket,
    handle: NativeHandle,
    decryptor: Arc<dyn Decryptor>,
}

impl DecryptedPacket {
    pub fn decrypt(decryptor: &Arc<dyn Decryptor>, packet: EncryptedPacket) -> anyhow::Result<Self> {
        let decrypted = decryptor.decrypt(packet)?;
        Ok(Self {
            packet: decrypted.packet,
            handle: decrypted.handle,
            decryptor: Arc::clone(decryptor),
        })
    }

    pub fn packet(&self) -> &EsPacket {
        &self.packet
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }
}

impl Drop for DecryptedPacket {
    fn drop(&mut self) {
        self.decryptor.release_handle(self.handle);
    }
}

#[cfg(test)]
#[path = "drm_test.rs"]
mod drm_test;
