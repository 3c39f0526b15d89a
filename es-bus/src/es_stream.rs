use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    config::TransferConfig,
    drm::{DecryptedPacket, Decryptor},
    error::TransferError,
    packet::{DataPacket, EncryptedPacket, EsPacket, Packet, StreamType},
    sink::{DecoderSink, SubmitStatus},
    storage::PacketStorage,
    stream::{
        AudioStreamInfo, CompatibilityFn, StreamConfig, StreamInfo, VideoStreamInfo,
        default_compatibility,
    },
    submit::SubmitPolicy,
};

/// What [`EsStream::set_stream_config`] did with the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigOutcome {
    /// Stream was unconfigured; the config went straight to the sink.
    Pushed,
    /// Stream was configured; the config was queued behind pending data.
    Queued,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigState {
    Unconfigured,
    Configured,
    /// An incompatible config was met mid-transfer and adopted; waiting
    /// for the controller to reconfigure the sink and restart transfer.
    PendingReconfiguration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// Stop was requested, the worker has not settled yet.
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisableReason {
    EndOfStream,
    StoreClosed,
    SubmitFailed(SubmitStatus),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream met an incompatible configuration and stopped
    /// transferring. The new config is already the current one.
    ReconfigureRequired(StreamType),
    Disabled {
        stream_type: StreamType,
        reason: DisableReason,
    },
}

enum TransferEnd {
    EndOfStream,
    Reconfigure,
}

type PushConfig = fn(&dyn DecoderSink, &StreamConfig, &TransferConfig) -> anyhow::Result<()>;

struct Session {
    // Scope handed to the next started worker. Replaced on every stop.
    cancel: CancellationToken,
    // Cancelled once the last started worker has settled.
    done: CancellationToken,
    active: bool,
}

impl Session {
    fn new() -> Self {
        let done = CancellationToken::new();
        done.cancel();
        Self {
            cancel: CancellationToken::new(),
            done,
            active: false,
        }
    }

    fn state(&self) -> SessionState {
        match (self.active, self.done.is_cancelled()) {
            (_, true) => SessionState::Idle,
            (true, false) => SessionState::Running,
            (false, false) => SessionState::Stopping,
        }
    }
}

struct Control {
    current_config: Option<StreamConfig>,
    pending_reconfiguration: bool,
    session: Session,
}

struct Shared {
    stream_type: StreamType,
    sink: Arc<dyn DecoderSink>,
    storage: Arc<PacketStorage>,
    decryptor: Option<Arc<dyn Decryptor>>,
    push_config: PushConfig,
    compatibility: CompatibilityFn,
    config: TransferConfig,
    policy: SubmitPolicy,
    events: broadcast::Sender<StreamEvent>,
    control: Mutex<Control>,
}

/// Transfer engine of one elementary stream.
///
/// Control calls (`set_stream_config`, `clear_stream_config`, `start`,
/// `stop`) are serialized on one lock and may come from any thread. Packet
/// transfer runs on a tokio task outside that lock.
pub struct EsStream {
    shared: Arc<Shared>,
    runtime: tokio::runtime::Handle,
    disposed: AtomicBool,
}

pub struct EsStreamBuilder {
    stream_type: StreamType,
    sink: Arc<dyn DecoderSink>,
    storage: Arc<PacketStorage>,
    decryptor: Option<Arc<dyn Decryptor>>,
    compatibility: CompatibilityFn,
    config: TransferConfig,
    runtime: Option<tokio::runtime::Handle>,
}

impl EsStreamBuilder {
    pub fn decryptor(mut self, decryptor: Arc<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn compatibility(mut self, compatibility: CompatibilityFn) -> Self {
        self.compatibility = compatibility;
        self
    }

    pub fn config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime the transfer task is spawned on. Defaults to the runtime
    /// `build` is called from.
    pub fn runtime(mut self, runtime: tokio::runtime::Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> anyhow::Result<EsStream> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => tokio::runtime::Handle::try_current()
                .map_err(|e| anyhow::anyhow!("{}: no tokio runtime: {}", self.stream_type, e))?,
        };

        let push_config: PushConfig = match self.stream_type {
            StreamType::Audio => push_audio_config,
            StreamType::Video => push_video_config,
        };
        let policy = SubmitPolicy::new(&self.config, self.sink.drain_notify());
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));

        Ok(EsStream {
            shared: Arc::new(Shared {
                stream_type: self.stream_type,
                sink: self.sink,
                storage: self.storage,
                decryptor: self.decryptor,
                push_config,
                compatibility: self.compatibility,
                config: self.config,
                policy,
                events,
                control: Mutex::new(Control {
                    current_config: None,
                    pending_reconfiguration: false,
                    session: Session::new(),
                }),
            }),
            runtime,
            disposed: AtomicBool::new(false),
        })
    }
}

impl EsStream {
    pub fn builder(
        stream_type: StreamType,
        sink: Arc<dyn DecoderSink>,
        storage: Arc<PacketStorage>,
    ) -> EsStreamBuilder {
        EsStreamBuilder {
            stream_type,
            sink,
            storage,
            decryptor: None,
            compatibility: default_compatibility,
            config: TransferConfig::default(),
            runtime: None,
        }
    }

    pub fn stream_type(&self) -> StreamType {
        self.shared.stream_type
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }

    pub fn current_config(&self) -> Option<StreamConfig> {
        self.shared.control().current_config.clone()
    }

    pub fn is_configured(&self) -> bool {
        self.shared.control().current_config.is_some()
    }

    pub fn config_state(&self) -> ConfigState {
        let control = self.shared.control();
        match (&control.current_config, control.pending_reconfiguration) {
            (None, _) => ConfigState::Unconfigured,
            (Some(_), false) => ConfigState::Configured,
            (Some(_), true) => ConfigState::PendingReconfiguration,
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.shared.control().session.state()
    }

    pub fn is_running(&self) -> bool {
        self.session_state() == SessionState::Running
    }

    /// Unconfigured stream: the config is pushed to the sink directly.
    /// Configured stream: the config is queued in packet storage and
    /// handled when the transfer task reaches it.
    pub fn set_stream_config(&self, config: StreamConfig) -> anyhow::Result<ConfigOutcome> {
        let stream_type = self.shared.stream_type;
        if config.stream_type() != stream_type {
            anyhow::bail!(
                "{}: rejected {} stream configuration",
                stream_type,
                config.stream_type()
            );
        }

        let mut control = self.shared.control();
        log::info!(
            "{}: already configured: {}",
            stream_type,
            control.current_config.is_some()
        );

        if control.current_config.is_some() {
            self.shared.storage.add(Packet::Config(config))?;
            log::info!("{}: new configuration queued", stream_type);
            return Ok(ConfigOutcome::Queued);
        }

        (self.shared.push_config)(self.shared.sink.as_ref(), &config, &self.shared.config)?;
        control.current_config = Some(config);
        control.pending_reconfiguration = false;
        Ok(ConfigOutcome::Pushed)
    }

    pub fn clear_stream_config(&self) {
        log::info!("{}: clear stream config", self.shared.stream_type);

        let mut control = self.shared.control();
        control.current_config = None;
        control.pending_reconfiguration = false;
    }

    /// Starts a transfer session unless one is running or the stream has no
    /// configuration yet.
    pub fn start(&self) {
        let stream_type = self.shared.stream_type;
        log::info!("{}: start", stream_type);

        if self.is_disposed() {
            log::warn!("{}: disposed", stream_type);
            return;
        }

        let mut control = self.shared.control();
        if control.session.state() == SessionState::Running {
            log::info!("{}: already running", stream_type);
            return;
        }

        if control.current_config.is_none() {
            log::warn!("{}: not configured", stream_type);
            return;
        }

        // A stopped worker may still be settling; the new one waits for it
        // so that only one session touches the storage and sink at a time.
        let previous = control.session.done.clone();
        let cancel = control.session.cancel.clone();
        let done = CancellationToken::new();
        let done_guard = done.clone().drop_guard();
        let shared = Arc::clone(&self.shared);

        self.runtime.spawn(async move {
            let _done_guard = done_guard;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = previous.cancelled() => {}
            }
            shared.transfer_task(cancel).await;
        });

        control.session.done = done;
        control.session.active = true;
        control.pending_reconfiguration = false;
    }

    /// Requests the running session to stop and prepares a fresh scope for
    /// the next `start`. Does not wait for the worker; see
    /// [`EsStream::await_completion`].
    pub fn stop(&self) {
        let stream_type = self.shared.stream_type;
        log::info!("{}: stop", stream_type);

        let mut control = self.shared.control();
        if control.session.state() != SessionState::Running {
            log::info!("{}: not started", stream_type);
            return;
        }

        control.session.cancel.cancel();
        control.session.cancel = CancellationToken::new();
        control.session.active = false;

        log::info!("{}: stopping transfer", stream_type);
    }

    /// Refuses further packets for this stream. Packets already queued are
    /// still transferred.
    pub fn disable(&self) {
        log::info!("{}: disable", self.shared.stream_type);
        self.shared.storage.disable(self.shared.stream_type);
    }

    /// Resolves once the last started transfer session has settled.
    pub async fn await_completion(&self) {
        let done = self.shared.control().session.done.clone();
        log::info!("{}: awaiting transfer task", self.shared.stream_type);
        done.cancelled().await;
        log::info!("{}: done", self.shared.stream_type);
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        log::info!("{}: dispose", self.shared.stream_type);

        self.stop();
        self.disable();
        self.shared.control().session.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for EsStream {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn transfer_task(&self, cancel: CancellationToken) {
        let stream_type = self.stream_type;
        log::info!("{}: transfer task started", stream_type);

        let disable = match self.transfer_loop(&cancel).await {
            Ok(TransferEnd::EndOfStream) => Some(DisableReason::EndOfStream),
            Ok(TransferEnd::Reconfigure) => None,
            Err(TransferError::Cancelled) => {
                log::info!("{}: transfer stopped", stream_type);
                None
            }
            Err(TransferError::StoreClosed(_)) => {
                log::info!("{}: stream completed", stream_type);
                Some(DisableReason::StoreClosed)
            }
            Err(TransferError::Submit { status, .. }) => {
                log::error!("{}: submit error {:?}", stream_type, status);
                Some(DisableReason::SubmitFailed(status))
            }
        };

        if let Some(reason) = disable {
            log::info!("{}: disabling transfer", stream_type);
            // A closed store is disabled already, and may have been
            // initialized again since.
            if reason != DisableReason::StoreClosed {
                self.storage.disable(stream_type);
            }
            let _ = self.events.send(StreamEvent::Disabled {
                stream_type,
                reason,
            });
        }

        log::info!("{}: transfer task terminated", stream_type);
    }

    async fn transfer_loop(&self, cancel: &CancellationToken) -> Result<TransferEnd, TransferError> {
        loop {
            let packet = self.storage.get(self.stream_type, cancel).await?;

            match packet {
                Packet::Eos(_) => {
                    self.push_eos(cancel).await?;
                    return Ok(TransferEnd::EndOfStream);
                }
                Packet::Config(config) => {
                    if self.adopt_config(config) {
                        // Stop/start is up to whoever handles the event.
                        return Ok(TransferEnd::Reconfigure);
                    }
                }
                Packet::Encrypted(packet) => self.push_encrypted(packet, cancel).await?,
                Packet::Data(packet) => self.push_unencrypted(packet, cancel).await?,
            }
        }
    }

    /// Makes `config` the current one. Returns true when it needs a sink
    /// reconfiguration, after signalling it.
    fn adopt_config(&self, config: StreamConfig) -> bool {
        let stream_type = self.stream_type;
        {
            let mut control = self.control();
            let compatible = control
                .current_config
                .as_ref()
                .is_some_and(|current| (self.compatibility)(current, &config, &self.config));
            control.current_config = Some(config);

            if compatible {
                log::info!("{}: compatible stream config change", stream_type);
                return false;
            }
            control.pending_reconfiguration = true;
        }

        log::info!("{}: incompatible stream config change", stream_type);
        if self
            .events
            .send(StreamEvent::ReconfigureRequired(stream_type))
            .is_err()
        {
            log::warn!("{}: nobody listens for reconfiguration", stream_type);
        }
        true
    }

    async fn push_unencrypted(
        &self,
        packet: DataPacket,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let es_packet = packet.to_es_packet();
        self.submit(&es_packet, cancel, |p| self.sink.submit_packet(p))
            .await
    }

    async fn push_encrypted(
        &self,
        packet: EncryptedPacket,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let stream_type = self.stream_type;
        let Some(decryptor) = self.decryptor.as_ref() else {
            log::error!("{}: encrypted packet without decryptor, dropped", stream_type);
            return Ok(());
        };

        let decrypted = match DecryptedPacket::decrypt(decryptor, packet) {
            Ok(decrypted) => decrypted,
            Err(e) => {
                log::error!("{}: decrypt error, packet dropped: {:#}", stream_type, e);
                return Ok(());
            }
        };

        // `decrypted` releases its handle when it goes out of scope, on
        // every path out of here.
        let handle = decrypted.handle();
        self.submit(decrypted.packet(), cancel, |p| {
            self.sink.submit_decrypted_packet(p, handle)
        })
        .await
    }

    async fn push_eos(&self, cancel: &CancellationToken) -> Result<(), TransferError> {
        let stream_type = self.stream_type;
        log::info!("{}: submitting eos", stream_type);
        self.policy
            .submit(stream_type, cancel, || self.sink.submit_eos(stream_type))
            .await
    }

    async fn submit<F>(
        &self,
        packet: &EsPacket,
        cancel: &CancellationToken,
        mut submit: F,
    ) -> Result<(), TransferError>
    where
        F: FnMut(&EsPacket) -> SubmitStatus,
    {
        let stream_type = self.stream_type;
        self.policy
            .submit(stream_type, cancel, || {
                let status = submit(packet);
                log::debug!(
                    "{}: ({:?}) pts: {:?} duration: {:?}",
                    stream_type,
                    status,
                    packet.pts,
                    packet.duration
                );
                status
            })
            .await
    }
}

fn push_audio_config(
    sink: &dyn DecoderSink,
    config: &StreamConfig,
    _limits: &TransferConfig,
) -> anyhow::Result<()> {
    let StreamConfig::Audio(audio) = config else {
        anyhow::bail!("invalid stream configuration, not audio");
    };

    let info = StreamInfo::Audio(AudioStreamInfo::from(audio));
    log::debug!("audio: {}", info);
    sink.add_stream(info)?;
    log::info!("audio: stream configuration set");
    Ok(())
}

fn push_video_config(
    sink: &dyn DecoderSink,
    config: &StreamConfig,
    limits: &TransferConfig,
) -> anyhow::Result<()> {
    let StreamConfig::Video(video) = config else {
        anyhow::bail!("invalid stream configuration, not video");
    };

    let info = StreamInfo::Video(VideoStreamInfo::from_config(video, limits));
    log::debug!("video: {}", info);
    sink.add_stream(info)?;
    log::info!("video: stream configuration set");
    Ok(())
}

#[cfg(test)]
#[path = "es_stream_test.rs"]
mod es_stream_test;
