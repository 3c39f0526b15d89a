use std::{
    collections::HashSet,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use es_bus::{
    drm::{Decrypted, Decryptor, NativeHandle},
    packet::{DataPacket, EncryptedPacket, EsPacket, Subsample},
};

/// Toy single-key scheme: payload bytes XOR-ed with `key`. Tracks every
/// handle it hands out until it is released.
pub struct XorDecryptor {
    key_id: Bytes,
    key: u8,
    next_handle: AtomicU64,
    outstanding: Mutex<HashSet<NativeHandle>>,
}

impl XorDecryptor {
    pub fn new(key_id: impl Into<Bytes>, key: u8) -> Self {
        Self {
            key_id: key_id.into(),
            key,
            next_handle: AtomicU64::new(1),
            outstanding: Mutex::new(HashSet::new()),
        }
    }

    fn outstanding_handles(&self) -> MutexGuard<'_, HashSet<NativeHandle>> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, data: &[u8]) -> Bytes {
        data.iter().map(|b| b ^ self.key).collect()
    }

    pub fn encrypt(&self, packet: DataPacket) -> EncryptedPacket {
        let encrypted = self.apply(&packet.data);
        let size = encrypted.len() as u32;
        EncryptedPacket {
            packet: DataPacket {
                data: encrypted,
                ..packet
            },
            key_id: self.key_id.clone(),
            iv: Bytes::from_static(&[0u8; 16]),
            subsamples: vec![Subsample {
                clear_bytes: 0,
                encrypted_bytes: size,
            }],
        }
    }

    /// Handles issued and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding_handles().len()
    }

    pub fn issued(&self) -> u64 {
        self.next_handle.load(Ordering::Relaxed) - 1
    }
}

impl Decryptor for XorDecryptor {
    fn decrypt(&self, packet: EncryptedPacket) -> anyhow::Result<Decrypted> {
        if packet.key_id != self.key_id {
            anyhow::bail!("no key for key id {:02x?}", packet.key_id.as_ref());
        }

        let clear = self.apply(&packet.packet.data);
        let handle = NativeHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.outstanding_handles().insert(handle);

        Ok(Decrypted {
            packet: EsPacket {
                data: clear,
                ..packet.packet.to_es_packet()
            },
            handle,
        })
    }

    fn release_handle(&self, handle: NativeHandle) {
        if !self.outstanding_handles().remove(&handle) {
            log::error!("drm: handle {} released twice or never issued", handle);
        }
    }
}

#[cfg(test)]
#[path = "drm_test.rs"]
mod drm_test;
