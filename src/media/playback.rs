use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use es_bus::{
    controller::EsStreamController,
    drm::Decryptor,
    es_stream::{DisableReason, StreamEvent},
    packet::StreamType,
    storage::PacketStorage,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::{
    config::PlayerConfig,
    media::{drm::XorDecryptor, producer::Producer, sink::SimulatedSink},
};

const KEY_ID: &[u8] = b"es-player-key-01";
const KEY: u8 = 0x5a;

#[derive(Debug, Default)]
pub struct PlaybackReport {
    pub audio_submitted: u64,
    pub video_submitted: u64,
    pub audio_eos: bool,
    pub video_eos: bool,
    pub reconfigurations: usize,
    pub disabled: Vec<(StreamType, DisableReason)>,
    pub decrypted: u64,
    pub outstanding_handles: usize,
}

impl PlaybackReport {
    pub fn finished(&self) -> bool {
        self.disabled.len() == StreamType::ALL.len()
    }

    /// 0 when both streams finished, 130 when cut short by a shutdown
    /// request, 1 when playback stopped early for any other reason.
    pub fn exit_code(&self, interrupted: bool) -> i32 {
        match (self.finished(), interrupted) {
            (true, _) => 0,
            (false, true) => 130,
            (false, false) => 1,
        }
    }
}

impl fmt::Display for PlaybackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "audio {} packets (eos: {}), video {} packets (eos: {}), {} reconfigurations, {} decrypted, {} handles outstanding",
            self.audio_submitted,
            self.audio_eos,
            self.video_submitted,
            self.video_eos,
            self.reconfigurations,
            self.decrypted,
            self.outstanding_handles,
        )
    }
}

/// Plays one simulated presentation through an [`EsStreamController`]
/// until both streams are disabled or `shutdown` fires.
pub async fn run(config: &PlayerConfig, shutdown: CancellationToken) -> anyhow::Result<PlaybackReport> {
    let simulation = &config.simulation;
    let cancel = shutdown.child_token();

    let storage = Arc::new(PacketStorage::new());
    let sink = SimulatedSink::new(simulation.sink_capacity);
    sink.spawn_drain(
        Duration::from_millis(simulation.sink_drain_ms.max(1)),
        cancel.clone(),
    );
    let decryptor = simulation
        .encrypted
        .then(|| Arc::new(XorDecryptor::new(Bytes::from_static(KEY_ID), KEY)));

    let controller = Arc::new(EsStreamController::new(
        sink.clone(),
        storage.clone(),
        decryptor.clone().map(|d| d as Arc<dyn Decryptor>),
        config.transfer.clone(),
    )?);
    let mut events = controller.subscribe();

    let producer = Producer::new(simulation.clone(), decryptor.clone());
    producer.configure(&controller)?;
    controller.start();
    let producer_task = tokio::spawn(producer.run(
        Arc::clone(&controller),
        Arc::clone(&storage),
        cancel.clone(),
    ));

    let mut report = PlaybackReport::default();
    while !report.finished() {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("playback interrupted");
                break;
            },
            event = events.recv() => match event {
                Ok(StreamEvent::ReconfigureRequired(_)) => report.reconfigurations += 1,
                Ok(StreamEvent::Disabled { stream_type, reason }) => {
                    report.disabled.push((stream_type, reason));
                }
                Err(RecvError::Lagged(n)) => log::warn!("playback missed {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    match producer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("producer stopped: {:#}", e),
        Err(e) => log::error!("producer task failed: {}", e),
    }
    controller.dispose();
    controller.await_completion().await;

    report.audio_submitted = sink.submitted(StreamType::Audio);
    report.video_submitted = sink.submitted(StreamType::Video);
    report.audio_eos = sink.is_eos(StreamType::Audio);
    report.video_eos = sink.is_eos(StreamType::Video);
    if let Some(decryptor) = decryptor.as_ref() {
        report.decrypted = decryptor.issued();
        report.outstanding_handles = decryptor.outstanding();
    }
    Ok(report)
}

#[cfg(test)]
#[path = "playback_test.rs"]
mod playback_test;
