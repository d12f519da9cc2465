//! Streaming session lifecycle.
//!
//! A [`SessionManager`] runs at most one session at a time. Each session is
//! driven by a single task that owns the camera, the channel and the send
//! timer. Acquisitions and channel callbacks never touch session state
//! directly: they post [`SessionEvent`]s and the driver applies them in
//! order. Callers read the outcome through the shared [`SessionView`].

use crate::{
    camera::{CameraError, CameraHandle, CameraPlatform, Frame},
    channel::{ChannelConnector, ChannelError, ChannelEvents, ChannelHandle, RawMessage},
    config::SessionSettings,
    frame::{decode_annotated, FrameEncoder, FrameError},
    message::InboundMessage,
    render::{FrameHandle, RenderSize, RenderTarget},
    telemetry::Metrics,
};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::{
    sync::Arc,
    time::{Duration, Instant as StdInstant},
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session.
    Idle,
    /// Camera or channel acquisition still pending.
    Acquiring,
    /// Both acquisitions settled, successfully or not.
    Active,
    /// Teardown in progress.
    Closing,
}

#[derive(Debug)]
pub enum SessionEvent {
    CameraReady(Result<CameraHandle, CameraError>),
    ChannelOpened(Result<ChannelHandle, ChannelError>),
    Inbound(RawMessage),
    ChannelClosed(Option<String>),
    Stop,
}

#[derive(Debug)]
struct ViewState {
    state: SessionState,
    connected: bool,
    prediction: Option<Value>,
    render: RenderTarget,
    preview: Option<Arc<Frame>>,
}

/// What a session exposes to whoever renders it.
#[derive(Debug)]
pub struct SessionView {
    inner: RwLock<ViewState>,
}

impl SessionView {
    fn new(render_size: RenderSize) -> Self {
        Self {
            inner: RwLock::new(ViewState {
                state: SessionState::Idle,
                connected: false,
                prediction: None,
                render: RenderTarget::new(render_size),
                preview: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn connected(&self) -> bool {
        self.inner.read().connected
    }

    pub fn prediction(&self) -> Option<Value> {
        self.inner.read().prediction.clone()
    }

    pub fn annotated_frame(&self) -> Option<FrameHandle> {
        self.inner.read().render.current()
    }

    /// Latest frame captured from the live camera feed.
    pub fn preview_frame(&self) -> Option<Arc<Frame>> {
        self.inner.read().preview.clone()
    }

    pub fn render_size(&self) -> RenderSize {
        self.inner.read().render.size()
    }

    pub(crate) fn set_render_size(&self, size: RenderSize) {
        self.inner.write().render.resize(size);
    }

    /// Single entry point for inbound updates. Predictions are last write
    /// wins; a `null` prediction clears the current one.
    pub(crate) fn apply_inbound(&self, message: InboundMessage) -> Result<(), FrameError> {
        match message {
            InboundMessage::Prediction(value) => {
                self.inner.write().prediction = (!value.is_null()).then_some(value);
            }
            InboundMessage::AnnotatedImage(bytes) => {
                let size = self.render_size();
                let image = decode_annotated(&bytes, size)?;
                self.inner.write().render.publish(image);
            }
        }
        Ok(())
    }

    fn transition(&self, next: SessionState) {
        let mut inner = self.inner.write();
        if inner.state != next {
            tracing::debug!("Session state {:?} -> {:?}", inner.state, next);
            inner.state = next;
        }
    }

    fn set_connected(&self, connected: bool) {
        self.inner.write().connected = connected;
    }

    fn set_preview(&self, frame: Arc<Frame>) {
        self.inner.write().preview = Some(frame);
    }

    fn begin(&self) {
        let mut inner = self.inner.write();
        inner.state = SessionState::Acquiring;
        inner.connected = false;
        inner.prediction = None;
    }

    fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = SessionState::Idle;
        inner.connected = false;
        inner.prediction = None;
        inner.preview = None;
        inner.render.clear();
    }
}

struct ActiveSession {
    settings: SessionSettings,
    events: UnboundedSender<SessionEvent>,
    driver: JoinHandle<()>,
}

/// Owns the single live session and re-evaluates it on settings changes.
pub struct SessionManager {
    camera: Arc<dyn CameraPlatform>,
    connector: Arc<dyn ChannelConnector>,
    encoder: Arc<FrameEncoder>,
    metrics: Arc<Metrics>,
    view: Arc<SessionView>,
    settings: SessionSettings,
    preview_interval: Duration,
    active: Option<ActiveSession>,
}

/// Preview refresh period used until [`SessionManager::with_preview_interval`]
/// says otherwise.
const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_millis(66);

impl SessionManager {
    pub fn new(
        camera: Arc<dyn CameraPlatform>,
        connector: Arc<dyn ChannelConnector>,
        encoder: Arc<FrameEncoder>,
        metrics: Arc<Metrics>,
        render_size: RenderSize,
    ) -> Self {
        Self {
            camera,
            connector,
            encoder,
            metrics,
            view: Arc::new(SessionView::new(render_size)),
            settings: SessionSettings::default(),
            preview_interval: DEFAULT_PREVIEW_INTERVAL,
            active: None,
        }
    }

    /// How often the live preview is refreshed from the camera, independent
    /// of the send interval and of whether a channel is open.
    pub fn with_preview_interval(mut self, interval: Duration) -> Self {
        self.preview_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn view(&self) -> Arc<SessionView> {
        self.view.clone()
    }

    /// Most recently applied settings.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a session, stopping any running one first. Disabled settings
    /// and an empty channel url are rejected: an idle manager stays idle and
    /// a running session is left untouched, settings included.
    pub async fn start(&mut self, settings: SessionSettings) {
        if !settings.enabled {
            tracing::debug!("Session disabled, not starting");
            self.keep_if_idle(settings);
            return;
        }
        if settings.channel_url.trim().is_empty() {
            tracing::warn!("No channel url configured, session not started");
            self.keep_if_idle(settings);
            return;
        }

        self.stop().await;
        self.settings = settings.clone();

        tracing::info!(
            "Starting session to {} every {}ms",
            settings.channel_url,
            settings.send_interval().as_millis()
        );
        self.view.begin();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = vec![
            tokio::spawn(acquire_channel(
                self.connector.clone(),
                settings.channel_url.clone(),
                events_tx.clone(),
            )),
            tokio::spawn(acquire_camera(self.camera.clone(), events_tx.clone())),
        ];

        let driver = SessionDriver {
            settings: settings.clone(),
            view: self.view.clone(),
            encoder: self.encoder.clone(),
            metrics: self.metrics.clone(),
            camera: None,
            channel: None,
            timer: None,
            preview_interval: self.preview_interval,
            preview_timer: None,
            pending,
            camera_settled: false,
            channel_settled: false,
            early_inbound: Vec::new(),
            closed_before_open: None,
        };

        self.active = Some(ActiveSession {
            settings,
            events: events_tx,
            driver: tokio::spawn(driver.run(events_rx)),
        });
    }

    fn keep_if_idle(&mut self, settings: SessionSettings) {
        if self.active.is_none() {
            self.settings = settings;
        }
    }

    /// Cancels the send timer, closes the channel and stops the camera, in
    /// that order. Does nothing when no session is running.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        // A driver that already exited has torn itself down.
        let _ = active.events.send(SessionEvent::Stop);
        if let Err(e) = active.driver.await {
            tracing::error!("Session driver failed: {:?}", e);
        }
        self.view.reset();
        self.metrics.set_connected(false);
        tracing::info!("Session to {} stopped", active.settings.channel_url);
    }

    /// Restarts the session when `enabled`, `channel_url` or
    /// `send_interval_ms` differ from the running one.
    pub async fn apply(&mut self, settings: SessionSettings) {
        let unchanged = match self.active.as_ref() {
            Some(active) => active.settings == settings,
            None => !settings.enabled,
        };
        if unchanged {
            self.settings = settings;
            return;
        }
        self.stop().await;
        self.start(settings).await;
    }

    /// Changes where annotated frames are drawn without touching the session.
    pub fn set_render_size(&self, size: RenderSize) {
        self.view.set_render_size(size);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.events.send(SessionEvent::Stop);
        }
    }
}

async fn acquire_camera(platform: Arc<dyn CameraPlatform>, events: UnboundedSender<SessionEvent>) {
    let result = platform.acquire().await.map(CameraHandle::new);
    // Dropping an undelivered handle stops its tracks.
    let _ = events.send(SessionEvent::CameraReady(result));
}

async fn acquire_channel(
    connector: Arc<dyn ChannelConnector>,
    url: String,
    events: UnboundedSender<SessionEvent>,
) {
    let result = connector
        .connect(&url, ChannelEvents::new(events.clone()))
        .await
        .map(ChannelHandle::new);
    let _ = events.send(SessionEvent::ChannelOpened(result));
}

enum Step {
    Event(Option<SessionEvent>),
    Tick,
    Preview,
}

struct SessionDriver {
    settings: SessionSettings,
    view: Arc<SessionView>,
    encoder: Arc<FrameEncoder>,
    metrics: Arc<Metrics>,
    camera: Option<CameraHandle>,
    channel: Option<ChannelHandle>,
    timer: Option<Interval>,
    preview_interval: Duration,
    preview_timer: Option<Interval>,
    pending: Vec<JoinHandle<()>>,
    camera_settled: bool,
    channel_settled: bool,
    /// Messages the connector delivered before it reported the channel open.
    early_inbound: Vec<RawMessage>,
    /// Set when the channel reported closing before it reported open.
    closed_before_open: Option<Option<String>>,
}

impl SessionDriver {
    async fn run(mut self, mut events: UnboundedReceiver<SessionEvent>) {
        loop {
            let step = tokio::select! {
                biased;
                event = events.recv() => Step::Event(event),
                _ = next_tick(&mut self.timer) => Step::Tick,
                _ = next_tick(&mut self.preview_timer) => Step::Preview,
            };
            match step {
                Step::Event(Some(SessionEvent::Stop)) | Step::Event(None) => break,
                Step::Event(Some(event)) => self.handle(event),
                Step::Tick => self.on_tick(),
                Step::Preview => self.on_preview(),
            }
        }
        self.teardown(&mut events).await;
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::CameraReady(Ok(camera)) => {
                tracing::info!("Camera acquired");
                self.camera = Some(camera);
                self.camera_settled = true;
                let mut preview = interval_at(Instant::now(), self.preview_interval);
                preview.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.preview_timer = Some(preview);
            }
            SessionEvent::CameraReady(Err(e)) => {
                tracing::error!("Camera unavailable, continuing without local preview: {}", e);
                self.camera_settled = true;
            }
            SessionEvent::ChannelOpened(Ok(channel)) => {
                self.channel = Some(channel);
                self.channel_settled = true;
                self.view.set_connected(true);
                self.metrics.set_connected(true);
                let period = self.settings.send_interval();
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.timer = Some(timer);
                for raw in std::mem::take(&mut self.early_inbound) {
                    self.on_inbound(raw);
                }
                if let Some(reason) = self.closed_before_open.take() {
                    self.on_channel_closed(reason);
                }
            }
            SessionEvent::ChannelOpened(Err(e)) => {
                tracing::error!("Channel to {} failed to open: {}", self.settings.channel_url, e);
                self.channel_settled = true;
                self.view.set_connected(false);
                if !self.early_inbound.is_empty() {
                    tracing::debug!(
                        "Dropping {} messages from a channel that never opened",
                        self.early_inbound.len()
                    );
                    self.early_inbound.clear();
                }
                self.closed_before_open = None;
            }
            SessionEvent::Inbound(raw) if !self.channel_settled => {
                self.early_inbound.push(raw);
            }
            SessionEvent::Inbound(raw) => self.on_inbound(raw),
            SessionEvent::ChannelClosed(reason) if !self.channel_settled => {
                self.closed_before_open = Some(reason);
            }
            SessionEvent::ChannelClosed(reason) => self.on_channel_closed(reason),
            SessionEvent::Stop => {}
        }

        if self.camera_settled && self.channel_settled {
            self.view.transition(SessionState::Active);
        }
    }

    fn on_channel_closed(&mut self, reason: Option<String>) {
        tracing::warn!(
            "Channel to {} closed: {}",
            self.settings.channel_url,
            reason.as_deref().unwrap_or("no reason given")
        );
        self.timer = None;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.view.set_connected(false);
        self.metrics.set_connected(false);
    }

    fn on_inbound(&mut self, raw: RawMessage) {
        if self.channel.is_none() {
            tracing::debug!("Dropping message from a closed channel");
            return;
        }
        let message = match InboundMessage::try_from(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Discarding inbound message: {}", e);
                self.metrics.record_discarded();
                return;
            }
        };
        self.metrics.record_inbound(message.kind());
        if let Err(e) = self.view.apply_inbound(message) {
            tracing::warn!("Discarding annotated frame: {}", e);
            self.metrics.record_discarded();
        }
    }

    /// Refreshes the live preview. Runs whenever a camera is held, whether
    /// or not a channel is open.
    fn on_preview(&mut self) {
        let Some(camera) = self.camera.as_mut() else {
            return;
        };
        if let Some(frame) = camera.current_frame() {
            self.view.set_preview(Arc::new(frame));
        }
    }

    fn on_tick(&mut self) {
        let Some(channel) = self.channel.as_mut().filter(|channel| channel.is_open()) else {
            self.metrics.record_tick_skipped("no_channel");
            return;
        };
        let Some(camera) = self.camera.as_mut() else {
            self.metrics.record_tick_skipped("no_frame");
            return;
        };
        let Some(frame) = camera.current_frame() else {
            self.metrics.record_tick_skipped("no_frame");
            return;
        };
        let native_size = camera.native_size();
        let frame = Arc::new(frame);
        self.view.set_preview(frame.clone());

        let started = StdInstant::now();
        let payload = match self.encoder.encode(&frame, native_size) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Skipping tick, frame encoding failed: {}", e);
                self.metrics.record_send_failure();
                return;
            }
        };
        self.metrics.record_encode_duration(started.elapsed());

        let size = payload.len();
        match channel.send(payload) {
            Ok(()) => {
                tracing::trace!("Sent frame of {} bytes", size);
                self.metrics.record_frame_sent();
            }
            Err(ChannelError::Busy) => {
                tracing::debug!("Previous frame still in flight, skipping tick");
                self.metrics.record_tick_skipped("busy");
            }
            Err(e) => {
                tracing::warn!("Skipping tick, frame transmission failed: {}", e);
                self.metrics.record_send_failure();
            }
        }
    }

    async fn teardown(&mut self, events: &mut UnboundedReceiver<SessionEvent>) {
        self.view.transition(SessionState::Closing);

        if self.timer.take().is_some() {
            tracing::debug!("Send timer cancelled");
        }
        self.preview_timer = None;
        self.early_inbound.clear();

        // Channel adapter first so a connection in flight is abandoned
        // before the channel is closed.
        for task in self.pending.drain(..) {
            task.abort();
            let _ = task.await;
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }

        // Resources that arrived after stop are released as they drop.
        events.close();
        while let Ok(event) = events.try_recv() {
            drop(event);
        }

        self.view.set_connected(false);
        self.metrics.set_connected(false);
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{PayloadEncoding, StreamConfig},
        testing::{settle, wait_until, ConnectMode, FakeCamera, FakeConnector, Recorder},
    };
    use bytes::Bytes;
    use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};
    use serde_json::json;
    use std::{sync::atomic::Ordering, time::Duration};

    const URL: &str = "ws://host/stream";

    struct Harness {
        recorder: Arc<Recorder>,
        connector: Arc<FakeConnector>,
        metrics: Arc<Metrics>,
        manager: SessionManager,
    }

    fn harness(camera: FakeCamera, mode: ConnectMode) -> Harness {
        let recorder = camera.recorder();
        let connector = Arc::new(FakeConnector::new(recorder.clone(), mode));
        let metrics = Arc::new(Metrics::new().unwrap());
        let encoder = Arc::new(FrameEncoder::new(&StreamConfig {
            payload_encoding: PayloadEncoding::Binary,
            ..StreamConfig::default()
        }));
        let manager = SessionManager::new(
            Arc::new(camera),
            connector.clone(),
            encoder,
            metrics.clone(),
            RenderSize::new(32, 24),
        );
        Harness {
            recorder,
            connector,
            metrics,
            manager,
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings::new(URL, true).with_send_interval_ms(500)
    }

    fn jpeg(width: u32, height: u32) -> Bytes {
        let image = RgbImage::from_pixel(width, height, Rgb([12, 34, 56]));
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, 80)
            .encode_image(&image)
            .unwrap();
        Bytes::from(buf)
    }

    async fn connected(h: &Harness) {
        let view = h.manager.view();
        wait_until(|| view.connected() && view.state() == SessionState::Active).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_session_is_a_no_op() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);

        h.manager.stop().await;
        h.manager.stop().await;

        assert_eq!(h.manager.view().state(), SessionState::Idle);
        assert_eq!(h.recorder.cameras_acquired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_stop_releases_everything_once() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;

        h.manager.stop().await;
        h.manager.stop().await;
        h.manager.stop().await;

        assert_eq!(h.recorder.cameras_live.load(Ordering::SeqCst), 0);
        assert_eq!(h.recorder.channels_live.load(Ordering::SeqCst), 0);
        assert_eq!(h.recorder.count("camera.stop"), 1);
        assert_eq!(h.recorder.count("channel.close"), 1);
        assert!(!h.manager.view().connected());
        assert!(!h.manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn starting_again_releases_previous_session_first() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;

        h.manager
            .start(SessionSettings::new("ws://other/stream", true))
            .await;
        connected(&h).await;

        assert_eq!(h.recorder.cameras_acquired.load(Ordering::SeqCst), 2);
        assert_eq!(h.recorder.channels_opened.load(Ordering::SeqCst), 2);
        assert_eq!(h.recorder.max_cameras_live.load(Ordering::SeqCst), 1);
        assert_eq!(h.recorder.max_channels_live.load(Ordering::SeqCst), 1);
        assert_eq!(h.connector.last_url().as_deref(), Some("ws://other/stream"));

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_without_a_frame_send_nothing() {
        let mut h = harness(FakeCamera::without_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;

        assert!(h.recorder.sent().is_empty());
        assert_eq!(h.metrics.ticks_skipped("no_frame"), 1);
        assert_eq!(h.metrics.send_failures(), 0);

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn later_prediction_wins() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;
        let events = h.connector.events().expect("channel events");

        events.message(RawMessage::Text(r#"{"prediction": "A"}"#.into()));
        events.message(RawMessage::Text(r#"{"prediction": "B"}"#.into()));
        settle().await;

        assert_eq!(h.manager.view().prediction(), Some(json!("B")));

        events.message(RawMessage::Text(r#"{"prediction": null}"#.into()));
        settle().await;
        assert_eq!(h.manager.view().prediction(), None);

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_messages_are_discarded() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;
        let events = h.connector.events().expect("channel events");

        events.message(RawMessage::Text(r#"{"prediction": {"class": "C"}}"#.into()));
        events.message(RawMessage::Text("definitely not json".into()));
        events.message(RawMessage::Text(r#"{"detail": "no hand"}"#.into()));
        events.message(RawMessage::Binary(Bytes::from_static(b"\x00\x01broken")));
        settle().await;

        assert_eq!(h.manager.view().prediction(), Some(json!({"class": "C"})));
        assert!(h.manager.view().annotated_frame().is_none());
        assert_eq!(h.metrics.discarded(), 3);
        assert!(h.manager.view().connected());

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_before_channel_opens_releases_everything() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Hang);
        h.manager.start(settings()).await;
        let recorder = h.recorder.clone();
        wait_until(|| {
            recorder.cameras_live.load(Ordering::SeqCst) == 1
                && recorder.count("channel.connecting") == 1
        })
        .await;
        assert_eq!(h.manager.view().state(), SessionState::Acquiring);

        h.manager
            .apply(SessionSettings {
                enabled: false,
                ..settings()
            })
            .await;

        assert_eq!(h.recorder.cameras_live.load(Ordering::SeqCst), 0);
        let events = h.recorder.events();
        let abandoned = events.iter().position(|e| e == "channel.abandoned").unwrap();
        let stop = events.iter().position(|e| e == "camera.stop").unwrap();
        assert!(abandoned < stop);
        assert_eq!(h.recorder.count("channel.close"), 0);
        assert!(!h.manager.view().connected());
        assert_eq!(h.manager.view().state(), SessionState::Idle);
        assert!(!h.manager.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_closes_channel_before_camera() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;

        h.manager.apply(SessionSettings::new(URL, false)).await;

        let events = h.recorder.events();
        let close = events.iter().position(|e| e == "channel.close").unwrap();
        let stop = events.iter().position(|e| e == "camera.stop").unwrap();
        assert!(close < stop);

        tokio::time::advance(Duration::from_millis(2_000)).await;
        settle().await;
        assert!(h.recorder.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn camera_denial_keeps_channel_running() {
        let mut h = harness(FakeCamera::denied(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;

        assert!(h.manager.view().connected());
        assert!(h.recorder.sent().is_empty());
        assert!(h.manager.view().preview_frame().is_none());

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn channel_failure_is_not_retried() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Fail);
        h.manager.start(settings()).await;
        let view = h.manager.view();
        wait_until(|| view.state() == SessionState::Active).await;

        tokio::time::advance(Duration::from_millis(5_000)).await;
        settle().await;

        assert!(!view.connected());
        assert_eq!(h.recorder.count("channel.connecting"), 1);
        assert!(h.recorder.sent().is_empty());

        h.manager.stop().await;
        assert_eq!(h.recorder.cameras_live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_drop_disconnects_and_stops_sending() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;
        let events = h.connector.events().expect("channel events");

        events.closed(Some("server going away".into()));
        settle().await;
        assert!(!h.manager.view().connected());

        events.message(RawMessage::Text(r#"{"prediction": "late"}"#.into()));
        tokio::time::advance(Duration::from_millis(1_500)).await;
        settle().await;

        assert!(h.recorder.sent().is_empty());
        assert_eq!(h.manager.view().prediction(), None);
        assert_eq!(h.recorder.count("channel.connecting"), 1);

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn busy_channel_skips_tick() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;
        h.connector.set_busy(true);

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert!(h.recorder.sent().is_empty());
        assert_eq!(h.metrics.ticks_skipped("busy"), 1);

        h.connector.set_busy(false);
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(h.recorder.sent().len(), 1);
        assert!(h.manager.view().connected());

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_settings_and_render_changes_keep_session() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.apply(settings()).await;
        connected(&h).await;

        h.manager.apply(settings()).await;
        h.manager.set_render_size(RenderSize::new(64, 48));
        settle().await;

        assert_eq!(h.recorder.cameras_acquired.load(Ordering::SeqCst), 1);
        assert_eq!(h.manager.view().render_size(), RenderSize::new(64, 48));

        let events = h.connector.events().expect("channel events");
        events.message(RawMessage::Binary(jpeg(16, 12)));
        settle().await;
        let frame = h.manager.view().annotated_frame().expect("annotated frame");
        assert_eq!(frame.image.dimensions(), (64, 48));

        h.manager.apply(settings().with_send_interval_ms(250)).await;
        connected(&h).await;
        assert_eq!(h.recorder.cameras_acquired.load(Ordering::SeqCst), 2);
        assert_eq!(h.recorder.max_cameras_live.load(Ordering::SeqCst), 1);

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_or_unaddressed_settings_do_not_start() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);

        h.manager.start(SessionSettings::new(URL, false)).await;
        h.manager.start(SessionSettings::new("", true)).await;
        settle().await;

        assert!(!h.manager.is_active());
        assert_eq!(h.recorder.cameras_acquired.load(Ordering::SeqCst), 0);
        assert_eq!(h.recorder.count("channel.connecting"), 0);
        assert_eq!(h.manager.settings().channel_url, "");
    }

    #[tokio::test(start_paused = true)]
    async fn preview_runs_without_a_channel() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Fail);
        h.manager.start(settings()).await;
        let view = h.manager.view();
        wait_until(|| view.state() == SessionState::Active).await;
        settle().await;

        assert!(!view.connected());
        assert!(view.preview_frame().is_some());

        h.manager.stop().await;
        assert!(view.preview_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn preview_keeps_refreshing_after_channel_drop() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;
        let events = h.connector.events().expect("channel events");

        events.closed(None);
        settle().await;
        let before = h.manager.view().preview_frame().expect("preview");

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        let after = h.manager.view().preview_frame().expect("preview");

        assert!(!Arc::ptr_eq(&before, &after));
        assert!(h.recorder.sent().is_empty());

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn messages_before_open_are_kept() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.connector
            .greet_with(RawMessage::Text(r#"{"prediction": "hello"}"#.into()));
        h.manager.start(settings()).await;
        connected(&h).await;
        settle().await;

        assert_eq!(h.manager.view().prediction(), Some(json!("hello")));

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn channel_closing_before_open_ends_disconnected() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.connector
            .greet_with(RawMessage::Text(r#"{"prediction": "bye"}"#.into()));
        h.connector.hang_up_on_open();
        h.manager.start(settings()).await;
        let view = h.manager.view();
        wait_until(|| view.state() == SessionState::Active).await;
        settle().await;

        assert!(!view.connected());
        assert_eq!(view.prediction(), Some(json!("bye")));
        assert_eq!(h.recorder.count("channel.close"), 1);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        assert!(h.recorder.sent().is_empty());

        h.manager.stop().await;
        assert_eq!(h.recorder.count("channel.close"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_skips_tick_and_keeps_session() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;
        h.connector.set_failing(true);

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert!(h.recorder.sent().is_empty());
        assert_eq!(h.metrics.send_failures(), 1);
        assert!(h.manager.view().connected());

        h.connector.set_failing(false);
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(h.recorder.sent().len(), 1);
        assert_eq!(h.metrics.frames_sent(), 1);

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_encode_skips_tick_and_keeps_session() {
        let mut h = harness(FakeCamera::oversized(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(h.metrics.send_failures(), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(h.metrics.send_failures(), 2);
        assert!(h.recorder.sent().is_empty());
        assert!(h.manager.view().connected());

        h.manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_start_leaves_running_session_alone() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager.start(settings()).await;
        connected(&h).await;

        h.manager.start(SessionSettings::new(URL, false)).await;
        h.manager.start(SessionSettings::new("", true)).await;

        assert!(h.manager.is_active());
        assert!(h.manager.settings().enabled);
        assert_eq!(h.manager.settings().channel_url, URL);
        assert!(h.manager.view().connected());

        h.manager.apply(SessionSettings::new(URL, false)).await;
        assert!(!h.manager.is_active());
        assert!(!h.manager.settings().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_scenario_end_to_end() {
        let mut h = harness(FakeCamera::with_frame(), ConnectMode::Open);
        h.manager
            .apply(SessionSettings {
                channel_url: "ws://host/stream".into(),
                enabled: true,
                send_interval_ms: 500,
            })
            .await;
        connected(&h).await;
        assert!(h.recorder.sent().is_empty());

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(h.recorder.sent().len(), 1);
        assert!(h.manager.view().preview_frame().is_some());

        let events = h.connector.events().expect("channel events");
        events.message(RawMessage::Text(
            r#"{"prediction": {"class": "A", "confidence": 0.92}}"#.into(),
        ));
        settle().await;
        assert_eq!(
            h.manager.view().prediction(),
            Some(json!({"class": "A", "confidence": 0.92}))
        );

        events.message(RawMessage::Binary(jpeg(32, 24)));
        settle().await;
        let first = h.manager.view().annotated_frame().expect("first frame");
        let first_generation = first.generation;
        let first = {
            let strong = first;
            Arc::downgrade(&strong)
        };

        events.message(RawMessage::Binary(jpeg(32, 24)));
        settle().await;
        let second = h.manager.view().annotated_frame().expect("second frame");
        assert!(second.generation > first_generation);
        assert!(first.upgrade().is_none());
        drop(second);

        h.manager.stop().await;
        assert!(!h.manager.view().connected());
        assert_eq!(h.manager.view().state(), SessionState::Idle);

        tokio::time::advance(Duration::from_millis(2_000)).await;
        settle().await;
        assert_eq!(h.recorder.sent().len(), 1);
        assert_eq!(h.metrics.frames_sent(), 1);
    }
}
