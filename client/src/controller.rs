//! The call controller
//!
//! One controller per call session. It exclusively owns its transport peer,
//! its candidate buffer, its data channels, and its timers; the local media
//! source is shared by reference with the UI but only the controller mutates
//! track state. All spawned tasks hold weak references back to the
//! controller, so dropping it (or calling [`CallController::close`]) detaches
//! every handler before the peer is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use peerlink_shared::diagnostics::{DiagnosticsEvent, DiagnosticsLog, TelemetrySample};
use peerlink_shared::envelope::SenderRole;
use peerlink_shared::error::CallFailure;
use peerlink_shared::payload::{
    AnswerPayload, CandidateInit, ClientInfo, OfferPayload, MEDIA_TARGET_1080P30,
};
use peerlink_shared::quality::{QualityController, QualityLevel};
use peerlink_shared::unix_now_ms;

use crate::channel::{
    encode_frame, parse_frame, sanitize_chat, ChannelFrame, ChatMessage, MediaState, CHAT_LABEL,
    CHAT_MIN_INTERVAL_MS, DIAG_LABEL,
};
use crate::stats::{StatsProjector, StatsReport};
use crate::transport::{
    ConnectionState, DataChannel, GatheringState, MediaSource, PeerEvent, PeerEventReceiver,
    PeerTransport, SdpKind, TransportError, VideoConstraints,
};

/// Quiet gap after the last candidate before gathering is considered settled.
pub const ICE_SETTLE_MS: u64 = 250;

/// Hard ceiling on the candidate-gathering wait.
pub const ICE_TOTAL_CAP_MS: u64 = 1_500;

/// Connect watchdog: time allowed to reach `Connected`.
pub const CONNECT_TIMEOUT_MS: u64 = 25_000;

/// Statistics collection period.
pub const STATS_INTERVAL_MS: u64 = 1_000;

/// Errors returned directly from controller operations.
#[derive(Error, Debug)]
pub enum CallError {
    /// The transport refused an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An answer arrived for a different session.
    #[error("answer sessionId does not match the active session")]
    SessionMismatch,
    /// Local chat throttle: one message per 250 ms.
    #[error("chat messages are limited to one per 250 ms")]
    ChatThrottled,
    /// The channel has not opened yet.
    #[error("the channel is not open yet")]
    ChannelNotOpen,
}

/// Observer hooks invoked from the controller's event context.
#[derive(Default)]
pub struct CallCallbacks {
    /// Connection-state transitions.
    pub on_connection_state: Option<Box<dyn Fn(ConnectionState) + Send + Sync>>,
    /// Incoming chat messages.
    pub on_chat: Option<Box<dyn Fn(ChatMessage) + Send + Sync>>,
    /// Remote microphone/camera state announcements.
    pub on_remote_media_state: Option<Box<dyn Fn(MediaState) + Send + Sync>>,
    /// Conditions the user must act on.
    pub on_failure: Option<Box<dyn Fn(CallFailure) + Send + Sync>>,
    /// Applied quality-level changes.
    pub on_quality_change: Option<Box<dyn Fn(QualityLevel) + Send + Sync>>,
}

struct IceSettle {
    notify: Notify,
    complete: AtomicBool,
}

impl IceSettle {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            complete: AtomicBool::new(false),
        }
    }

    fn on_candidate(&self) {
        self.notify.notify_one();
    }

    fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Local session state machine driving one call.
pub struct CallController {
    self_weak: Weak<CallController>,
    role: SenderRole,
    local_peer_id: String,
    session_id: Mutex<String>,
    transport: Arc<dyn PeerTransport>,
    media: Arc<dyn MediaSource>,
    client_info: ClientInfo,
    callbacks: CallCallbacks,

    state: Mutex<ConnectionState>,
    candidates: Mutex<Vec<CandidateInit>>,
    gathering: Mutex<Arc<IceSettle>>,

    chat_channel: Mutex<Option<Arc<dyn DataChannel>>>,
    diag_channel: Mutex<Option<Arc<dyn DataChannel>>>,

    quality: Mutex<QualityController>,
    applied_level: Mutex<QualityLevel>,
    diagnostics: Mutex<DiagnosticsLog>,
    projector: Mutex<StatsProjector>,

    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    last_chat_at_ms: Mutex<Option<u64>>,

    event_task: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    stats_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl CallController {
    /// Construct the host side. Attaches local media and opens the `chat`
    /// and `diag` channels immediately.
    pub fn host(
        transport: Arc<dyn PeerTransport>,
        events: PeerEventReceiver,
        media: Arc<dyn MediaSource>,
        client_info: ClientInfo,
        callbacks: CallCallbacks,
    ) -> Result<Arc<Self>, CallError> {
        let controller = Self::build(
            SenderRole::Host,
            transport,
            media,
            client_info,
            callbacks,
        )?;
        let chat = controller.transport.create_data_channel(CHAT_LABEL)?;
        let diag = controller.transport.create_data_channel(DIAG_LABEL)?;
        *controller.chat_channel.lock().unwrap() = Some(chat);
        *controller.diag_channel.lock().unwrap() = Some(diag);
        controller.spawn_event_loop(events);
        Ok(controller)
    }

    /// Construct the joiner side. Attaches local media; the channels arrive
    /// from the host via channel-opened events.
    pub fn joiner(
        transport: Arc<dyn PeerTransport>,
        events: PeerEventReceiver,
        media: Arc<dyn MediaSource>,
        client_info: ClientInfo,
        callbacks: CallCallbacks,
    ) -> Result<Arc<Self>, CallError> {
        let controller = Self::build(
            SenderRole::Joiner,
            transport,
            media,
            client_info,
            callbacks,
        )?;
        controller.spawn_event_loop(events);
        Ok(controller)
    }

    fn build(
        role: SenderRole,
        transport: Arc<dyn PeerTransport>,
        media: Arc<dyn MediaSource>,
        client_info: ClientInfo,
        callbacks: CallCallbacks,
    ) -> Result<Arc<Self>, CallError> {
        transport.attach_media(Arc::clone(&media))?;
        Ok(Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            role,
            local_peer_id: random_tag("peer"),
            session_id: Mutex::new(random_tag("session")),
            transport,
            media,
            client_info,
            callbacks,
            state: Mutex::new(ConnectionState::New),
            candidates: Mutex::new(Vec::new()),
            gathering: Mutex::new(Arc::new(IceSettle::new())),
            chat_channel: Mutex::new(None),
            diag_channel: Mutex::new(None),
            quality: Mutex::new(QualityController::new()),
            applied_level: Mutex::new(QualityLevel::Hd1080),
            diagnostics: Mutex::new(DiagnosticsLog::new()),
            projector: Mutex::new(StatsProjector::new()),
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
            last_chat_at_ms: Mutex::new(None),
            event_task: Mutex::new(None),
            watchdog: Mutex::new(None),
            stats_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    /// The role this controller was built with.
    pub fn role(&self) -> SenderRole {
        self.role
    }

    /// The active session identifier.
    pub fn session_id(&self) -> String {
        self.session_id.lock().unwrap().clone()
    }

    /// The local peer tag used in diagnostics events.
    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Last observed connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    // ── Offer / answer flows ────────────────────────────────────────────

    /// Host flow: produce the offer payload to be sealed into a packet.
    pub async fn create_offer_payload(&self) -> Result<OfferPayload, CallError> {
        self.candidates.lock().unwrap().clear();
        self.reset_gathering();

        let sdp = self.transport.create_offer().await?;
        self.transport
            .set_local_description(SdpKind::Offer, &sdp)
            .await?;
        self.await_ice_settled().await;
        self.start_connect_watchdog();

        Ok(OfferPayload {
            session_id: self.session_id(),
            sdp_offer: sdp,
            ice_candidates: self.candidates.lock().unwrap().clone(),
            media_target: MEDIA_TARGET_1080P30.to_string(),
            client_info: self.client_info.clone(),
        })
    }

    /// Joiner flow: adopt the offer and produce the answer payload.
    pub async fn accept_offer(&self, offer: &OfferPayload) -> Result<AnswerPayload, CallError> {
        *self.session_id.lock().unwrap() = offer.session_id.clone();
        self.transport
            .set_remote_description(SdpKind::Offer, &offer.sdp_offer)
            .await?;
        self.ingest_candidates(&offer.ice_candidates).await;

        self.candidates.lock().unwrap().clear();
        self.reset_gathering();

        let sdp = self.transport.create_answer().await?;
        self.transport
            .set_local_description(SdpKind::Answer, &sdp)
            .await?;
        self.await_ice_settled().await;
        self.start_connect_watchdog();

        Ok(AnswerPayload {
            session_id: offer.session_id.clone(),
            sdp_answer: sdp,
            ice_candidates: self.candidates.lock().unwrap().clone(),
            accepted_media_target: offer.media_target.clone(),
            client_info: self.client_info.clone(),
        })
    }

    /// Host flow: apply the joiner's answer.
    pub async fn apply_answer(&self, answer: &AnswerPayload) -> Result<(), CallError> {
        if answer.session_id != self.session_id() {
            return Err(CallError::SessionMismatch);
        }
        self.transport
            .set_remote_description(SdpKind::Answer, &answer.sdp_answer)
            .await?;
        self.ingest_candidates(&answer.ice_candidates).await;
        Ok(())
    }

    /// Feed remote candidates one by one. Individual failures are expected
    /// (duplicates, incompatible transports) and never abort the exchange.
    async fn ingest_candidates(&self, candidates: &[CandidateInit]) {
        for candidate in candidates {
            if let Err(err) = self.transport.add_remote_candidate(candidate).await {
                debug!("ignoring rejected candidate: {err}");
            }
        }
    }

    // ── ICE gathering settle ────────────────────────────────────────────

    fn reset_gathering(&self) {
        *self.gathering.lock().unwrap() = Arc::new(IceSettle::new());
    }

    /// Wait for candidate gathering to settle: transport-complete, a null
    /// candidate, a 250 ms quiet gap, or the 1500 ms hard cap, whichever
    /// comes first. The quiet gap restarts on every candidate observed.
    async fn await_ice_settled(&self) {
        let settle = Arc::clone(&self.gathering.lock().unwrap());
        let deadline = tokio::time::Instant::now() + Duration::from_millis(ICE_TOTAL_CAP_MS);
        loop {
            if settle.complete.load(Ordering::Acquire) {
                return;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return;
            }
            let quiet = Duration::from_millis(ICE_SETTLE_MS).min(deadline - now);
            if tokio::time::timeout(quiet, settle.notify.notified())
                .await
                .is_err()
            {
                return;
            }
        }
    }

    // ── Event pump ──────────────────────────────────────────────────────

    fn spawn_event_loop(&self, mut events: PeerEventReceiver) {
        let weak = self.self_weak.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                if controller.closed.load(Ordering::Acquire) {
                    break;
                }
                controller.handle_event(event);
            }
        });
        *self.event_task.lock().unwrap() = Some(task);
    }

    fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::Candidate(Some(candidate)) => {
                self.candidates.lock().unwrap().push(candidate);
                self.gathering.lock().unwrap().on_candidate();
            }
            PeerEvent::Candidate(None) => {
                self.gathering.lock().unwrap().mark_complete();
            }
            PeerEvent::GatheringState(GatheringState::Complete) => {
                self.gathering.lock().unwrap().mark_complete();
            }
            PeerEvent::GatheringState(_) => {}
            PeerEvent::ConnectionState(state) => self.on_connection_state(state),
            PeerEvent::ChannelOpened { label, channel } => match label.as_str() {
                CHAT_LABEL => *self.chat_channel.lock().unwrap() = Some(channel),
                DIAG_LABEL => *self.diag_channel.lock().unwrap() = Some(channel),
                other => debug!("ignoring unexpected channel '{other}'"),
            },
            PeerEvent::ChannelMessage { label, text } => self.on_channel_message(&label, &text),
        }
    }

    fn on_connection_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
        debug!("connection state: {state:?}");
        self.note_event("state", &format!("connection {state:?}"));
        if let Some(hook) = &self.callbacks.on_connection_state {
            hook(state);
        }
        match state {
            ConnectionState::Connected => {
                self.cancel_watchdog();
                self.start_stats_loop();
            }
            ConnectionState::Failed => self.report_failure(CallFailure::NatBlocked),
            _ => {}
        }
    }

    fn on_channel_message(&self, label: &str, text: &str) {
        let Some(frame) = parse_frame(text) else {
            return;
        };
        match frame {
            ChannelFrame::Chat(message) if label == CHAT_LABEL => {
                if let Some(hook) = &self.callbacks.on_chat {
                    hook(message);
                }
            }
            ChannelFrame::Control(state) => {
                if let Some(hook) = &self.callbacks.on_remote_media_state {
                    hook(state);
                }
            }
            ChannelFrame::Diag(event) if label == DIAG_LABEL => {
                self.diagnostics.lock().unwrap().insert_remote(*event);
            }
            _ => debug!("dropping frame with mismatched channel label"),
        }
    }

    fn report_failure(&self, failure: CallFailure) {
        warn!("call failure: {failure}");
        if let Some(hook) = &self.callbacks.on_failure {
            hook(failure);
        }
    }

    fn note_event(&self, event_type: &str, message: &str) {
        let event = DiagnosticsEvent::from_sample(
            unix_now_ms(),
            &self.local_peer_id,
            &TelemetrySample::default(),
            event_type,
            message,
        );
        self.diagnostics.lock().unwrap().insert_local(event);
    }

    // ── Watchdog and stats loop ─────────────────────────────────────────

    fn start_connect_watchdog(&self) {
        self.cancel_watchdog();
        let weak = self.self_weak.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(CONNECT_TIMEOUT_MS)).await;
            let Some(controller) = weak.upgrade() else {
                return;
            };
            if controller.closed.load(Ordering::Acquire) {
                return;
            }
            if controller.connection_state() != ConnectionState::Connected {
                controller.report_failure(CallFailure::ConnectionTimeout);
            }
        });
        *self.watchdog.lock().unwrap() = Some(task);
    }

    fn cancel_watchdog(&self) {
        if let Some(task) = self.watchdog.lock().unwrap().take() {
            task.abort();
        }
    }

    fn start_stats_loop(&self) {
        let mut slot = self.stats_task.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let weak = self.self_weak.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(STATS_INTERVAL_MS));
            ticker.tick().await; // skip the immediate first tick
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                if controller.closed.load(Ordering::Acquire) {
                    break;
                }
                match controller.transport.collect_stats().await {
                    Ok(report) => controller.ingest_stats(&report),
                    Err(err) => debug!("stats collection failed: {err}"),
                }
            }
        }));
    }

    fn ingest_stats(&self, report: &StatsReport) {
        let now = unix_now_ms();
        let sample = self.projector.lock().unwrap().project(report, now);

        let event =
            DiagnosticsEvent::from_sample(now, &self.local_peer_id, &sample, "stats", "");
        self.diagnostics.lock().unwrap().insert_local(event.clone());
        // mirror to the peer; a closed channel is not an error here
        let _ = self.send_frame(&self.diag_channel, &ChannelFrame::Diag(Box::new(event)));

        let change = self.quality.lock().unwrap().observe(&sample);
        if let Some(level) = change {
            self.apply_quality_change(level);
        }
    }

    fn apply_quality_change(&self, reported: QualityLevel) {
        let target = if reported == QualityLevel::Recovering {
            // the sentinel is a step-up signal, not a state to sit in
            let next = self.applied_level.lock().unwrap().step_up();
            self.quality.lock().unwrap().force_state(next);
            next
        } else {
            reported
        };
        *self.applied_level.lock().unwrap() = target;
        debug!("quality level -> {}", target.as_str());
        self.note_event("quality", target.as_str());
        if let Some(hook) = &self.callbacks.on_quality_change {
            hook(target);
        }

        if let Some(profile) = target.profile() {
            if let Err(err) = self
                .transport
                .set_video_max_bitrate(profile.max_bitrate_kbps * 1_000)
            {
                debug!("bitrate update failed: {err}");
            }
            let constraints = VideoConstraints {
                width: profile.width,
                height: profile.height,
                frame_rate: 30.0,
            };
            if let Err(err) = self.media.apply_video_constraints(&constraints) {
                debug!("constraint update failed: {err}");
            }
        }
    }

    // ── Chat and media control ──────────────────────────────────────────

    /// Send a chat message. Text is sanitized and the send rate is locally
    /// throttled to one message per 250 ms.
    pub fn send_chat(&self, raw: &str) -> Result<(), CallError> {
        let text = sanitize_chat(raw);
        if text.is_empty() {
            return Ok(());
        }
        let now = unix_now_ms();
        {
            let mut last = self.last_chat_at_ms.lock().unwrap();
            if let Some(at) = *last {
                if now.saturating_sub(at) < CHAT_MIN_INTERVAL_MS {
                    return Err(CallError::ChatThrottled);
                }
            }
            *last = Some(now);
        }
        self.send_frame(
            &self.chat_channel,
            &ChannelFrame::Chat(ChatMessage {
                text,
                timestamp: now,
            }),
        )
    }

    /// Flip the microphone track and announce the new state to the peer.
    pub fn toggle_microphone_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::Release);
        self.media.set_audio_enabled(enabled);
        self.broadcast_media_state();
    }

    /// Flip the camera track and announce the new state to the peer.
    pub fn toggle_camera_enabled(&self, enabled: bool) {
        self.video_enabled.store(enabled, Ordering::Release);
        self.media.set_video_enabled(enabled);
        self.broadcast_media_state();
    }

    fn broadcast_media_state(&self) {
        let frame = ChannelFrame::Control(MediaState {
            audio_enabled: self.audio_enabled.load(Ordering::Acquire),
            video_enabled: self.video_enabled.load(Ordering::Acquire),
            timestamp: unix_now_ms(),
        });
        if self.send_frame(&self.chat_channel, &frame).is_err() {
            debug!("media state broadcast skipped: channel not open");
        }
    }

    fn send_frame(
        &self,
        slot: &Mutex<Option<Arc<dyn DataChannel>>>,
        frame: &ChannelFrame,
    ) -> Result<(), CallError> {
        let channel = slot
            .lock()
            .unwrap()
            .clone()
            .ok_or(CallError::ChannelNotOpen)?;
        channel.send_text(&encode_frame(frame))?;
        Ok(())
    }

    // ── Diagnostics access ──────────────────────────────────────────────

    /// Merged local + remote diagnostics events in timestamp order.
    pub fn merged_diagnostics(&self) -> Vec<DiagnosticsEvent> {
        self.diagnostics.lock().unwrap().merged_events()
    }

    /// Merged diagnostics exported as JSON.
    pub fn export_diagnostics_json(&self) -> String {
        self.diagnostics
            .lock()
            .unwrap()
            .export_merged_json(unix_now_ms())
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Tear the call down: stop timers, close both channels, close the
    /// peer. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // detach handlers before releasing the peer
        if let Some(task) = self.event_task.lock().unwrap().take() {
            task.abort();
        }
        self.cancel_watchdog();
        if let Some(task) = self.stats_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(channel) = self.chat_channel.lock().unwrap().take() {
            channel.close();
        }
        if let Some(channel) = self.diag_channel.lock().unwrap().take() {
            channel.close();
        }
        self.transport.close();
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        self.close();
    }
}

fn random_tag(prefix: &str) -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{prefix}-{}", hex::encode(bytes))
}
