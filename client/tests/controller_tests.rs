//! Call controller tests against a scripted transport
//!
//! Time-driven behavior (ICE settle, watchdog, stats loop) runs under
//! tokio's paused clock, so these are fast and deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use peerlink_client::channel::{encode_frame, ChannelFrame, ChatMessage, MediaState};
use peerlink_client::controller::{CallCallbacks, CallController, CallError};
use peerlink_client::stats::StatsReport;
use peerlink_client::transport::{
    ConnectionState, DataChannel, MediaError, MediaSource, PeerEvent, PeerTransport, SdpKind,
    TransportError, VideoConstraints,
};
use peerlink_shared::diagnostics::{DiagnosticsEvent, TelemetrySample};
use peerlink_shared::error::CallFailure;
use peerlink_shared::payload::{CandidateInit, ClientInfo, OfferPayload, MEDIA_TARGET_1080P30};

// ── Mocks ───────────────────────────────────────────────────────────────────

struct MockChannel {
    label: String,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockChannel {
    fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }
}

impl DataChannel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct MockTransport {
    ops: Mutex<Vec<String>>,
    accepted_candidates: Mutex<Vec<String>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    stats: Mutex<StatsReport>,
    bitrate_bps: Mutex<Option<u32>>,
    closed: AtomicBool,
}

impl MockTransport {
    fn channel(&self, label: &str) -> Option<Arc<MockChannel>> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.label == label)
            .cloned()
    }

    fn set_stats(&self, stats: StatsReport) {
        *self.stats.lock().unwrap() = stats;
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    fn attach_media(&self, _media: Arc<dyn MediaSource>) -> Result<(), TransportError> {
        self.ops.lock().unwrap().push("attach_media".to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        Ok("v=0\r\nmock-offer".to_string())
    }

    async fn create_answer(&self) -> Result<String, TransportError> {
        Ok("v=0\r\nmock-answer".to_string())
    }

    async fn set_local_description(&self, kind: SdpKind, _sdp: &str) -> Result<(), TransportError> {
        self.ops.lock().unwrap().push(format!("set_local:{kind:?}"));
        Ok(())
    }

    async fn set_remote_description(&self, kind: SdpKind, _sdp: &str) -> Result<(), TransportError> {
        self.ops.lock().unwrap().push(format!("set_remote:{kind:?}"));
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &CandidateInit) -> Result<(), TransportError> {
        if candidate.candidate.contains("reject") {
            return Err(TransportError::Failed("incompatible candidate".to_string()));
        }
        self.accepted_candidates
            .lock()
            .unwrap()
            .push(candidate.candidate.clone());
        Ok(())
    }

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError> {
        let channel = MockChannel::new(label);
        self.channels.lock().unwrap().push(Arc::clone(&channel));
        Ok(channel)
    }

    async fn collect_stats(&self) -> Result<StatsReport, TransportError> {
        Ok(*self.stats.lock().unwrap())
    }

    fn set_video_max_bitrate(&self, bitrate_bps: u32) -> Result<(), TransportError> {
        *self.bitrate_bps.lock().unwrap() = Some(bitrate_bps);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct MockMedia {
    audio_enabled: Mutex<Option<bool>>,
    video_enabled: Mutex<Option<bool>>,
    constraints: Mutex<Vec<VideoConstraints>>,
}

impl MediaSource for MockMedia {
    fn set_audio_enabled(&self, enabled: bool) {
        *self.audio_enabled.lock().unwrap() = Some(enabled);
    }

    fn set_video_enabled(&self, enabled: bool) {
        *self.video_enabled.lock().unwrap() = Some(enabled);
    }

    fn apply_video_constraints(&self, constraints: &VideoConstraints) -> Result<(), MediaError> {
        self.constraints.lock().unwrap().push(*constraints);
        Ok(())
    }
}

struct Harness {
    transport: Arc<MockTransport>,
    media: Arc<MockMedia>,
    events: mpsc::Sender<PeerEvent>,
    failures: Arc<Mutex<Vec<CallFailure>>>,
    chats: Arc<Mutex<Vec<ChatMessage>>>,
    media_states: Arc<Mutex<Vec<MediaState>>>,
}

impl Harness {
    fn new() -> (Self, mpsc::Receiver<PeerEvent>, CallCallbacks) {
        let (tx, rx) = mpsc::channel(64);
        let failures: Arc<Mutex<Vec<CallFailure>>> = Arc::default();
        let chats: Arc<Mutex<Vec<ChatMessage>>> = Arc::default();
        let media_states: Arc<Mutex<Vec<MediaState>>> = Arc::default();

        let callbacks = CallCallbacks {
            on_failure: Some(Box::new({
                let failures = Arc::clone(&failures);
                move |failure| failures.lock().unwrap().push(failure)
            })),
            on_chat: Some(Box::new({
                let chats = Arc::clone(&chats);
                move |message| chats.lock().unwrap().push(message)
            })),
            on_remote_media_state: Some(Box::new({
                let states = Arc::clone(&media_states);
                move |state| states.lock().unwrap().push(state)
            })),
            ..CallCallbacks::default()
        };

        let harness = Self {
            transport: Arc::new(MockTransport::default()),
            media: Arc::new(MockMedia::default()),
            events: tx,
            failures,
            chats,
            media_states,
        };
        (harness, rx, callbacks)
    }

    fn host(&self, rx: mpsc::Receiver<PeerEvent>, callbacks: CallCallbacks) -> Arc<CallController> {
        CallController::host(
            Arc::clone(&self.transport) as Arc<dyn PeerTransport>,
            rx,
            Arc::clone(&self.media) as Arc<dyn MediaSource>,
            client_info(),
            callbacks,
        )
        .unwrap()
    }

    fn joiner(
        &self,
        rx: mpsc::Receiver<PeerEvent>,
        callbacks: CallCallbacks,
    ) -> Arc<CallController> {
        CallController::joiner(
            Arc::clone(&self.transport) as Arc<dyn PeerTransport>,
            rx,
            Arc::clone(&self.media) as Arc<dyn MediaSource>,
            client_info(),
            callbacks,
        )
        .unwrap()
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        platform: "test".to_string(),
        version: "0.1.0".to_string(),
    }
}

fn candidate(tag: &str) -> CandidateInit {
    CandidateInit {
        candidate: format!("candidate:{tag} 1 UDP 1 192.0.2.1 1 typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
    }
}

fn offer(session_id: &str) -> OfferPayload {
    OfferPayload {
        session_id: session_id.to_string(),
        sdp_offer: "v=0\r\nremote-offer".to_string(),
        ice_candidates: vec![candidate("a"), candidate("reject-me"), candidate("b")],
        media_target: MEDIA_TARGET_1080P30.to_string(),
        client_info: client_info(),
    }
}

fn bad_stats() -> StatsReport {
    let mut report = StatsReport::default();
    report.remote_inbound_video.packets_lost = 8;
    report.remote_inbound_video.packets_received = 92;
    report.remote_inbound_video.round_trip_time = 0.260;
    report.inbound_audio.jitter = 0.035;
    report
}

fn good_stats() -> StatsReport {
    let mut report = StatsReport::default();
    report.remote_inbound_video.packets_received = 1_000;
    report.remote_inbound_video.round_trip_time = 0.070;
    report.inbound_audio.jitter = 0.005;
    report
}

// ── Construction ────────────────────────────────────────────────────────────

#[tokio::test]
async fn host_attaches_media_and_opens_both_channels() {
    let (harness, rx, callbacks) = Harness::new();
    let _controller = harness.host(rx, callbacks);

    let ops = harness.transport.ops.lock().unwrap().clone();
    assert!(ops.contains(&"attach_media".to_string()));
    assert!(harness.transport.channel("chat").is_some());
    assert!(harness.transport.channel("diag").is_some());
}

#[tokio::test]
async fn joiner_opens_no_channels_up_front() {
    let (harness, rx, callbacks) = Harness::new();
    let _controller = harness.joiner(rx, callbacks);
    assert!(harness.transport.channels.lock().unwrap().is_empty());
}

// ── Offer / answer flows ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn host_offer_flow_collects_candidates_until_null() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    let flow = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.create_offer_payload().await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    harness
        .events
        .send(PeerEvent::Candidate(Some(candidate("one"))))
        .await
        .unwrap();
    harness
        .events
        .send(PeerEvent::Candidate(Some(candidate("two"))))
        .await
        .unwrap();
    harness.events.send(PeerEvent::Candidate(None)).await.unwrap();

    let payload = flow.await.unwrap().unwrap();
    assert_eq!(payload.sdp_offer, "v=0\r\nmock-offer");
    assert_eq!(payload.ice_candidates.len(), 2);
    assert_eq!(payload.media_target, MEDIA_TARGET_1080P30);
    assert!(payload.session_id.starts_with("session-"));

    let ops = harness.transport.ops.lock().unwrap().clone();
    assert!(ops.contains(&"set_local:Offer".to_string()));
}

#[tokio::test(start_paused = true)]
async fn gathering_settles_after_quiet_gap() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    let flow = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.create_offer_payload().await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    harness
        .events
        .send(PeerEvent::Candidate(Some(candidate("only"))))
        .await
        .unwrap();
    // no completion marker: the 250 ms quiet gap must end the wait

    let payload = flow.await.unwrap().unwrap();
    assert_eq!(payload.ice_candidates.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn gathering_stops_at_the_hard_cap() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    // a candidate every 100 ms keeps the quiet gap from ever elapsing
    let spammer = {
        let events = harness.events.clone();
        tokio::spawn(async move {
            let mut n = 0;
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                n += 1;
                if events
                    .send(PeerEvent::Candidate(Some(candidate(&n.to_string()))))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        })
    };

    let payload = controller.create_offer_payload().await.unwrap();
    spammer.abort();
    assert!(payload.ice_candidates.len() >= 10);
}

#[tokio::test(start_paused = true)]
async fn joiner_flow_adopts_session_and_ignores_bad_candidates() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.joiner(rx, callbacks);

    let flow = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.accept_offer(&offer("session-xyz")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.events.send(PeerEvent::Candidate(None)).await.unwrap();

    let answer = flow.await.unwrap().unwrap();
    assert_eq!(answer.session_id, "session-xyz");
    assert_eq!(answer.sdp_answer, "v=0\r\nmock-answer");
    assert_eq!(answer.accepted_media_target, MEDIA_TARGET_1080P30);
    assert_eq!(controller.session_id(), "session-xyz");

    // the rejected candidate never aborted the exchange
    let accepted = harness.transport.accepted_candidates.lock().unwrap().clone();
    assert_eq!(accepted.len(), 2);

    let ops = harness.transport.ops.lock().unwrap().clone();
    let remote_pos = ops.iter().position(|op| op == "set_remote:Offer").unwrap();
    let local_pos = ops.iter().position(|op| op == "set_local:Answer").unwrap();
    assert!(remote_pos < local_pos);
}

#[tokio::test(start_paused = true)]
async fn apply_answer_rejects_session_mismatch() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    let flow = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.create_offer_payload().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.events.send(PeerEvent::Candidate(None)).await.unwrap();
    let payload = flow.await.unwrap().unwrap();

    let answer = peerlink_shared::payload::AnswerPayload {
        session_id: "some-other-session".to_string(),
        sdp_answer: "v=0\r\nanswer".to_string(),
        ice_candidates: vec![],
        accepted_media_target: payload.media_target.clone(),
        client_info: client_info(),
    };
    assert!(matches!(
        controller.apply_answer(&answer).await,
        Err(CallError::SessionMismatch)
    ));

    let mut good = answer;
    good.session_id = payload.session_id;
    assert!(controller.apply_answer(&good).await.is_ok());
}

// ── Watchdog and connection state ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn watchdog_reports_connection_timeout() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    let flow = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.create_offer_payload().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.events.send(PeerEvent::Candidate(None)).await.unwrap();
    flow.await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_secs(26)).await;
    let failures = harness.failures.lock().unwrap().clone();
    assert_eq!(failures, vec![CallFailure::ConnectionTimeout]);
}

#[tokio::test(start_paused = true)]
async fn connected_state_cancels_the_watchdog() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    let flow = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.create_offer_payload().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.events.send(PeerEvent::Candidate(None)).await.unwrap();
    flow.await.unwrap().unwrap();

    harness
        .events
        .send(PeerEvent::ConnectionState(ConnectionState::Connected))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(harness.failures.lock().unwrap().is_empty());
    assert_eq!(controller.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn failed_state_reports_nat_blocked() {
    let (harness, rx, callbacks) = Harness::new();
    let _controller = harness.host(rx, callbacks);

    harness
        .events
        .send(PeerEvent::ConnectionState(ConnectionState::Failed))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        harness.failures.lock().unwrap().clone(),
        vec![CallFailure::NatBlocked]
    );
}

// ── Stats loop and quality application ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stats_loop_feeds_diagnostics_and_steps_quality_down() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);
    harness.transport.set_stats(bad_stats());

    harness
        .events
        .send(PeerEvent::ConnectionState(ConnectionState::Connected))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    // first bad sample: HD_720 at 2000 kbps
    assert_eq!(*harness.transport.bitrate_bps.lock().unwrap(), Some(2_000_000));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    // second bad sample: SD_480 at 900 kbps
    assert_eq!(*harness.transport.bitrate_bps.lock().unwrap(), Some(900_000));

    let constraints = harness.media.constraints.lock().unwrap().clone();
    assert_eq!(constraints.last().map(|c| (c.width, c.height)), Some((854, 480)));

    // local samples recorded and mirrored on the diag channel
    assert!(!controller.merged_diagnostics().is_empty());
    let diag = harness.transport.channel("diag").unwrap();
    assert!(diag.sent.lock().unwrap().len() >= 2);
}

#[tokio::test(start_paused = true)]
async fn recovery_steps_one_rung_back_up() {
    let (harness, rx, callbacks) = Harness::new();
    let _controller = harness.host(rx, callbacks);
    harness.transport.set_stats(bad_stats());

    harness
        .events
        .send(PeerEvent::ConnectionState(ConnectionState::Connected))
        .await
        .unwrap();
    // two bad samples land on SD_480
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(*harness.transport.bitrate_bps.lock().unwrap(), Some(900_000));

    // eight good samples emit the recovery signal; the call layer pins HD_720
    harness.transport.set_stats(good_stats());
    tokio::time::sleep(Duration::from_millis(8_100)).await;
    assert_eq!(*harness.transport.bitrate_bps.lock().unwrap(), Some(2_000_000));
}

// ── Channels ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn joiner_adopts_channels_and_dispatches_frames() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.joiner(rx, callbacks);

    let chat = MockChannel::new("chat");
    let diag = MockChannel::new("diag");
    harness
        .events
        .send(PeerEvent::ChannelOpened {
            label: "chat".to_string(),
            channel: chat.clone(),
        })
        .await
        .unwrap();
    harness
        .events
        .send(PeerEvent::ChannelOpened {
            label: "diag".to_string(),
            channel: diag.clone(),
        })
        .await
        .unwrap();

    let chat_frame = encode_frame(&ChannelFrame::Chat(ChatMessage {
        text: "hello".to_string(),
        timestamp: 5,
    }));
    harness
        .events
        .send(PeerEvent::ChannelMessage {
            label: "chat".to_string(),
            text: chat_frame,
        })
        .await
        .unwrap();

    let control_frame = encode_frame(&ChannelFrame::Control(MediaState {
        audio_enabled: false,
        video_enabled: true,
        timestamp: 6,
    }));
    harness
        .events
        .send(PeerEvent::ChannelMessage {
            label: "chat".to_string(),
            text: control_frame,
        })
        .await
        .unwrap();

    let diag_event = DiagnosticsEvent::from_sample(
        7,
        "remote-peer",
        &TelemetrySample::default(),
        "stats",
        "",
    );
    harness
        .events
        .send(PeerEvent::ChannelMessage {
            label: "diag".to_string(),
            text: encode_frame(&ChannelFrame::Diag(Box::new(diag_event))),
        })
        .await
        .unwrap();

    // garbage and unknown types are dropped without effect
    harness
        .events
        .send(PeerEvent::ChannelMessage {
            label: "chat".to_string(),
            text: "{not json".to_string(),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.chats.lock().unwrap().len(), 1);
    assert_eq!(harness.chats.lock().unwrap()[0].text, "hello");
    let states = harness.media_states.lock().unwrap().clone();
    assert_eq!(states.len(), 1);
    assert!(!states[0].audio_enabled);
    assert_eq!(controller.merged_diagnostics().len(), 1);
    assert_eq!(controller.merged_diagnostics()[0].peer_id, "remote-peer");
}

#[tokio::test]
async fn chat_send_is_throttled_locally() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    controller.send_chat("first message").unwrap();
    assert!(matches!(
        controller.send_chat("too fast"),
        Err(CallError::ChatThrottled)
    ));

    let chat = harness.transport.channel("chat").unwrap();
    let sent = chat.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("first message"));
}

#[tokio::test]
async fn media_toggles_update_tracks_and_broadcast_state() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    controller.toggle_microphone_enabled(false);
    controller.toggle_camera_enabled(false);

    assert_eq!(*harness.media.audio_enabled.lock().unwrap(), Some(false));
    assert_eq!(*harness.media.video_enabled.lock().unwrap(), Some(false));

    let chat = harness.transport.channel("chat").unwrap();
    let sent = chat.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("\"type\":\"control\""));
    assert!(sent[1].contains("\"audioEnabled\":false"));
    assert!(sent[1].contains("\"videoEnabled\":false"));
}

// ── Teardown ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_is_idempotent_and_tears_everything_down() {
    let (harness, rx, callbacks) = Harness::new();
    let controller = harness.host(rx, callbacks);

    controller.close();
    controller.close();

    assert!(harness.transport.closed.load(Ordering::Acquire));
    let chat = harness.transport.channel("chat").unwrap();
    let diag = harness.transport.channel("diag").unwrap();
    assert!(chat.closed.load(Ordering::Acquire));
    assert!(diag.closed.load(Ordering::Acquire));

    // events after close are no-ops
    let _ = harness
        .events
        .send(PeerEvent::ConnectionState(ConnectionState::Failed))
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.failures.lock().unwrap().is_empty());
}
