use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::{error::StorageError, packet::Packet, packet::StreamType};

// The channel lives as long as the storage, so a worker blocked in `get`
// keeps waiting on the same receiver across `initialize`. Packets carry the
// generation they were queued in; older generations are skipped.
struct PacketQueue {
    tx: UnboundedSender<(u64, Packet)>,
    rx: tokio::sync::Mutex<UnboundedReceiver<(u64, Packet)>>,
    generation: AtomicU64,
    count: AtomicUsize,
    // Cancelled once the current generation is disabled.
    closed: Mutex<CancellationToken>,
}

impl PacketQueue {
    fn new() -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            generation: AtomicU64::new(0),
            count: AtomicUsize::new(0),
            closed: Mutex::new(CancellationToken::new()),
        }
    }

    fn closed(&self) -> MutexGuard<'_, CancellationToken> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_disabled(&self) -> bool {
        self.closed().is_cancelled()
    }

    /// Next packet of the current generation, `None` once disabled and
    /// drained. Consumes nothing when dropped before completion.
    async fn next(&self) -> Option<Packet> {
        let mut rx = self.rx.lock().await;
        loop {
            let closed = self.closed().clone();
            let received = match rx.try_recv() {
                Ok(item) => Some(item),
                Err(_) if closed.is_cancelled() => return None,
                Err(_) => tokio::select! {
                    biased;
                    item = rx.recv() => item,
                    _ = closed.cancelled() => None,
                },
            };

            let Some((generation, packet)) = received else {
                continue;
            };
            if generation != self.generation.load(Ordering::Acquire) {
                continue;
            }
            // `initialize` may have zeroed the count meanwhile
            let _ = self
                .count
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
            return Some(packet);
        }
    }
}

/// Per stream type packet queues shared by producers and transfer engines.
pub struct PacketStorage {
    queues: HashMap<StreamType, PacketQueue>,
}

impl PacketStorage {
    pub fn new() -> Self {
        let queues = StreamType::ALL
            .into_iter()
            .map(|stream_type| (stream_type, PacketQueue::new()))
            .collect();
        Self { queues }
    }

    fn queue(&self, stream_type: StreamType) -> Result<&PacketQueue, StorageError> {
        self.queues
            .get(&stream_type)
            .ok_or(StorageError::Closed(stream_type))
    }

    /// Opens a fresh, empty generation of the `stream_type` queue, dropping
    /// whatever the previous one held. A transfer task blocked in `get`
    /// stays blocked and receives the new packets.
    pub fn initialize(&self, stream_type: StreamType) {
        let Ok(queue) = self.queue(stream_type) else {
            return;
        };

        let mut closed = queue.closed();
        queue.generation.fetch_add(1, Ordering::AcqRel);
        queue.count.store(0, Ordering::Relaxed);
        if closed.is_cancelled() {
            *closed = CancellationToken::new();
        }
        log::info!("{}: packet queue initialized", stream_type);
    }

    pub fn add(&self, packet: impl Into<Packet>) -> Result<(), StorageError> {
        let packet = packet.into();
        let stream_type = packet.stream_type();
        let queue = self.queue(stream_type)?;

        let closed = queue.closed();
        if closed.is_cancelled() {
            log::warn!("{}: packet dropped, storage disabled", stream_type);
            return Err(StorageError::Closed(stream_type));
        }

        let generation = queue.generation.load(Ordering::Acquire);
        queue
            .tx
            .send((generation, packet))
            .map_err(|_| StorageError::Closed(stream_type))?;
        queue.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Waits for the next packet of `stream_type`.
    ///
    /// Returns [`StorageError::Closed`] once the queue is disabled and
    /// drained, and [`StorageError::Cancelled`] when `cancel` fires first. A
    /// cancelled call never consumes a packet.
    pub async fn get(
        &self,
        stream_type: StreamType,
        cancel: &CancellationToken,
    ) -> Result<Packet, StorageError> {
        let queue = self.queue(stream_type)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            packet = queue.next() => packet.ok_or(StorageError::Closed(stream_type)),
        }
    }

    /// Refuses further packets for `stream_type`. Idempotent.
    pub fn disable(&self, stream_type: StreamType) {
        let Ok(queue) = self.queue(stream_type) else {
            return;
        };

        let closed = queue.closed();
        if !closed.is_cancelled() {
            closed.cancel();
            log::info!("{}: packet storage disabled", stream_type);
        }
    }

    pub fn is_disabled(&self, stream_type: StreamType) -> bool {
        self.queue(stream_type)
            .map(PacketQueue::is_disabled)
            .unwrap_or(true)
    }

    /// Number of packets queued and not yet fetched.
    pub fn count(&self, stream_type: StreamType) -> usize {
        self.queue(stream_type)
            .map(|queue| queue.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for PacketStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;
