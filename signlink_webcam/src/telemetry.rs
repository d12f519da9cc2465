use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry,
};
use std::time::Duration;

pub struct Metrics {
    frames_sent: IntCounter,
    send_failures: IntCounter,
    ticks_skipped: IntCounterVec,
    inbound_messages: IntCounterVec,
    discarded_messages: IntCounter,
    encode_duration: Histogram,
    connected: IntGauge,
    http_requests: IntCounterVec,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("signlink_webcam".into()), None)?;

        let frames_sent = IntCounter::new("frames_sent_total", "Frames handed to the channel")?;
        let send_failures = IntCounter::new(
            "send_failures_total",
            "Ticks where encoding or transmitting a frame failed",
        )?;
        let ticks_skipped = IntCounterVec::new(
            Opts::new("ticks_skipped_total", "Send ticks skipped, by reason"),
            &["reason"],
        )?;
        let inbound_messages = IntCounterVec::new(
            Opts::new("inbound_messages_total", "Messages received, by kind"),
            &["kind"],
        )?;
        let discarded_messages = IntCounter::new(
            "discarded_messages_total",
            "Inbound messages dropped as malformed",
        )?;
        let encode_duration = Histogram::with_opts(
            HistogramOpts::new(
                "frame_encode_duration_ms",
                "Time spent rendering and encoding one frame in milliseconds",
            )
            .buckets(exponential_buckets(1.0, 2.0, 10)?),
        )?;
        let connected = IntGauge::new("channel_connected", "1 while the channel is open")?;
        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Control server requests served"),
            &["method", "route", "status"],
        )?;

        registry.register(Box::new(frames_sent.clone()))?;
        registry.register(Box::new(send_failures.clone()))?;
        registry.register(Box::new(ticks_skipped.clone()))?;
        registry.register(Box::new(inbound_messages.clone()))?;
        registry.register(Box::new(discarded_messages.clone()))?;
        registry.register(Box::new(encode_duration.clone()))?;
        registry.register(Box::new(connected.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;

        Ok(Metrics {
            frames_sent,
            send_failures,
            ticks_skipped,
            inbound_messages,
            discarded_messages,
            encode_duration,
            connected,
            http_requests,
            registry,
        })
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.inc();
    }

    pub fn record_send_failure(&self) {
        self.send_failures.inc();
    }

    pub fn record_tick_skipped(&self, reason: &str) {
        self.ticks_skipped.with_label_values(&[reason]).inc();
    }

    pub fn record_inbound(&self, kind: &str) {
        self.inbound_messages.with_label_values(&[kind]).inc();
    }

    pub fn record_discarded(&self) {
        self.discarded_messages.inc();
    }

    pub fn record_encode_duration(&self, elapsed: Duration) {
        self.encode_duration.observe(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.set(i64::from(connected));
    }

    pub fn record_http_request(&self, method: &str, route: &str, status: u16) {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[method, route, status.as_str()])
            .inc();
    }

    pub fn http_requests(&self, method: &str, route: &str, status: u16) -> u64 {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[method, route, status.as_str()])
            .get()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.get()
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.get()
    }

    pub fn ticks_skipped(&self, reason: &str) -> u64 {
        self.ticks_skipped.with_label_values(&[reason]).get()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded_messages.get()
    }
}
