//! In-memory camera and channel doubles for session tests.

use crate::{
    camera::{CameraError, CameraFeed, CameraPlatform, Frame},
    channel::{
        ChannelConnector, ChannelError, ChannelEvents, ChannelSink, OutboundPayload, RawMessage,
    },
};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// Shared log of what the doubles were asked to do.
#[derive(Default)]
pub struct Recorder {
    log: Mutex<Vec<String>>,
    sent: Mutex<Vec<OutboundPayload>>,
    pub cameras_acquired: AtomicUsize,
    pub cameras_live: AtomicUsize,
    pub max_cameras_live: AtomicUsize,
    pub channels_opened: AtomicUsize,
    pub channels_live: AtomicUsize,
    pub max_channels_live: AtomicUsize,
}

impl Recorder {
    fn push(&self, event: &str) {
        self.log.lock().push(event.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.log.lock().iter().filter(|e| *e == event).count()
    }

    pub fn sent(&self) -> Vec<OutboundPayload> {
        self.sent.lock().clone()
    }
}

fn acquire(live: &AtomicUsize, max: &AtomicUsize) {
    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
    max.fetch_max(now, Ordering::SeqCst);
}

pub struct FakeCamera {
    recorder: Arc<Recorder>,
    frame: Option<Frame>,
    native_size: Option<(u32, u32)>,
    denied: bool,
}

impl FakeCamera {
    pub fn with_frame() -> Self {
        Self {
            recorder: Arc::default(),
            frame: Some(RgbImage::from_pixel(32, 24, Rgb([90, 120, 150]))),
            native_size: None,
            denied: false,
        }
    }

    pub fn without_frame() -> Self {
        Self {
            frame: None,
            ..Self::with_frame()
        }
    }

    /// Reports a native width no JPEG can hold, so every encode fails.
    pub fn oversized() -> Self {
        Self {
            native_size: Some((70_000, 1)),
            ..Self::with_frame()
        }
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::with_frame()
        }
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        self.recorder.clone()
    }
}

#[async_trait]
impl CameraPlatform for FakeCamera {
    async fn acquire(&self) -> Result<Box<dyn CameraFeed>, CameraError> {
        if self.denied {
            self.recorder.push("camera.denied");
            return Err(CameraError::PermissionDenied);
        }
        self.recorder.push("camera.acquire");
        self.recorder.cameras_acquired.fetch_add(1, Ordering::SeqCst);
        acquire(&self.recorder.cameras_live, &self.recorder.max_cameras_live);
        Ok(Box::new(FakeFeed {
            recorder: self.recorder.clone(),
            frame: self.frame.clone(),
            native_size: self.native_size,
        }))
    }
}

struct FakeFeed {
    recorder: Arc<Recorder>,
    frame: Option<Frame>,
    native_size: Option<(u32, u32)>,
}

impl CameraFeed for FakeFeed {
    fn current_frame(&mut self) -> Option<Frame> {
        self.frame.clone()
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        self.native_size
            .or_else(|| self.frame.as_ref().map(|f| f.dimensions()))
    }

    fn stop_tracks(&mut self) {
        self.recorder.push("camera.stop");
        self.recorder.cameras_live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Open,
    Fail,
    /// Never completes.
    Hang,
}

pub struct FakeConnector {
    recorder: Arc<Recorder>,
    mode: ConnectMode,
    busy: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
    greeting: Mutex<Option<RawMessage>>,
    hang_up_on_open: AtomicBool,
    events: Mutex<Option<ChannelEvents>>,
    last_url: Mutex<Option<String>>,
}

impl FakeConnector {
    pub fn new(recorder: Arc<Recorder>, mode: ConnectMode) -> Self {
        Self {
            recorder,
            mode,
            busy: Arc::default(),
            failing: Arc::default(),
            greeting: Mutex::new(None),
            hang_up_on_open: AtomicBool::new(false),
            events: Mutex::new(None),
            last_url: Mutex::new(None),
        }
    }

    /// Callbacks of the most recently opened channel.
    pub fn events(&self) -> Option<ChannelEvents> {
        self.events.lock().clone()
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().clone()
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Sends fail with [`ChannelError::SendFailed`] while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delivered by the next open channel before `connect` returns.
    pub fn greet_with(&self, message: RawMessage) {
        *self.greeting.lock() = Some(message);
    }

    /// The next open channel reports closing before `connect` returns.
    pub fn hang_up_on_open(&self) {
        self.hang_up_on_open.store(true, Ordering::SeqCst);
    }
}

struct AbandonGuard(Arc<Recorder>);

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.0.push("channel.abandoned");
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(
        &self,
        url: &str,
        events: ChannelEvents,
    ) -> Result<Box<dyn ChannelSink>, ChannelError> {
        self.recorder.push("channel.connecting");
        *self.last_url.lock() = Some(url.to_string());
        match self.mode {
            ConnectMode::Open => {
                if let Some(greeting) = self.greeting.lock().take() {
                    events.message(greeting);
                }
                if self.hang_up_on_open.swap(false, Ordering::SeqCst) {
                    events.closed(Some("hung up".into()));
                }
                *self.events.lock() = Some(events);
                self.recorder.channels_opened.fetch_add(1, Ordering::SeqCst);
                acquire(
                    &self.recorder.channels_live,
                    &self.recorder.max_channels_live,
                );
                Ok(Box::new(FakeSink {
                    recorder: self.recorder.clone(),
                    busy: self.busy.clone(),
                    failing: self.failing.clone(),
                }))
            }
            ConnectMode::Fail => Err(ChannelError::ConnectFailed("connection refused".into())),
            ConnectMode::Hang => {
                let _guard = AbandonGuard(self.recorder.clone());
                std::future::pending().await
            }
        }
    }
}

struct FakeSink {
    recorder: Arc<Recorder>,
    busy: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
}

impl ChannelSink for FakeSink {
    fn send(&mut self, payload: OutboundPayload) -> Result<(), ChannelError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(ChannelError::Busy);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("socket reset".into()));
        }
        self.recorder.sent.lock().push(payload);
        Ok(())
    }

    fn close(&mut self) {
        self.recorder.push("channel.close");
        self.recorder.channels_live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lets spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
