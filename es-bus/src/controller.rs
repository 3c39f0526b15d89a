use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tokio_util::sync::CancellationToken;

use crate::{
    config::TransferConfig,
    drm::Decryptor,
    es_stream::{ConfigOutcome, EsStream, StreamEvent},
    packet::StreamType,
    sink::DecoderSink,
    storage::PacketStorage,
    stream::StreamConfig,
};

/// Drives the audio and video [`EsStream`]s of one sink and reconfigures
/// them together whenever either one meets an incompatible configuration.
pub struct EsStreamController {
    inner: Arc<ControllerInner>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

struct ControllerInner {
    sink: Arc<dyn DecoderSink>,
    storage: Arc<PacketStorage>,
    audio: EsStream,
    video: EsStream,
    playing: AtomicBool,
    events: broadcast::Sender<StreamEvent>,
}

impl EsStreamController {
    pub fn new(
        sink: Arc<dyn DecoderSink>,
        storage: Arc<PacketStorage>,
        decryptor: Option<Arc<dyn Decryptor>>,
        config: TransferConfig,
    ) -> anyhow::Result<Self> {
        let build = |stream_type: StreamType| {
            let mut builder = EsStream::builder(stream_type, Arc::clone(&sink), Arc::clone(&storage))
                .config(config.clone());
            if let Some(decryptor) = decryptor.as_ref() {
                builder = builder.decryptor(Arc::clone(decryptor));
            }
            builder.build()
        };
        let audio = build(StreamType::Audio)?;
        let video = build(StreamType::Video)?;

        let stream_events = BroadcastStream::new(audio.subscribe())
            .merge(BroadcastStream::new(video.subscribe()));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let inner = Arc::new(ControllerInner {
            sink,
            storage,
            audio,
            video,
            playing: AtomicBool::new(false),
            events,
        });
        let cancel = CancellationToken::new();

        let inner_clone = Arc::clone(&inner);
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            let mut stream_events = stream_events;
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        break;
                    },
                    event = stream_events.next() => match event {
                        Some(Ok(event)) => inner_clone.handle_event(event).await,
                        Some(Err(e)) => log::warn!("stream event lost: {}", e),
                        None => break,
                    },
                }
            }
            log::info!("controller event loop finished");
        });

        Ok(Self {
            inner,
            cancel,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn stream(&self, stream_type: StreamType) -> &EsStream {
        self.inner.stream(stream_type)
    }

    /// Controller level events: everything the streams report, after the
    /// controller has acted on it.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_stream_config(&self, config: StreamConfig) -> anyhow::Result<ConfigOutcome> {
        self.stream(config.stream_type()).set_stream_config(config)
    }

    pub fn start(&self) {
        self.inner.playing.store(true, Ordering::Release);
        for stream in self.inner.streams() {
            stream.start();
        }
    }

    pub fn stop(&self) {
        self.inner.playing.store(false, Ordering::Release);
        for stream in self.inner.streams() {
            stream.stop();
        }
    }

    pub fn disable(&self, stream_type: StreamType) {
        self.stream(stream_type).disable();
    }

    pub async fn await_completion(&self) {
        for stream in self.inner.streams() {
            stream.await_completion().await;
        }
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("disposing stream controller");

        self.inner.playing.store(false, Ordering::Release);
        self.cancel.cancel();
        for stream in self.inner.streams() {
            stream.dispose();
        }
    }
}

impl Drop for EsStreamController {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl ControllerInner {
    fn stream(&self, stream_type: StreamType) -> &EsStream {
        match stream_type {
            StreamType::Audio => &self.audio,
            StreamType::Video => &self.video,
        }
    }

    fn streams(&self) -> [&EsStream; 2] {
        [&self.audio, &self.video]
    }

    async fn handle_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::ReconfigureRequired(stream_type) => {
                log::info!("{}: reconfiguration required", stream_type);
                if let Err(e) = self.reconfigure().await {
                    log::error!("{}: reconfiguration failed: {:#}", stream_type, e);
                }
            }
            StreamEvent::Disabled {
                stream_type,
                reason,
            } => {
                log::info!("{}: stream disabled: {:?}", stream_type, reason);
            }
        }

        let _ = self.events.send(event);
    }

    /// Stops both streams, resets the sink, pushes every stream's current
    /// configuration again and resumes transfer if playback is on.
    async fn reconfigure(&self) -> anyhow::Result<()> {
        for stream in self.streams() {
            stream.stop();
        }
        for stream in self.streams() {
            stream.await_completion().await;
        }

        self.sink.reset()?;

        for stream in self.streams() {
            if let Some(config) = stream.current_config() {
                stream.clear_stream_config();
                stream.set_stream_config(config)?;
            }
        }

        if !self.playing.load(Ordering::Acquire) {
            log::info!("reconfigured, playback not running");
            return Ok(());
        }

        for stream in self.streams() {
            if self.storage.is_disabled(stream.stream_type()) {
                continue;
            }
            stream.start();
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;
