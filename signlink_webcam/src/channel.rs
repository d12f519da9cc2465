use crate::session::SessionEvent;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to open channel: {0}")]
    ConnectFailed(String),
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Channel is not open")]
    NotOpen,
    #[error("Previous frame is still being transmitted")]
    Busy,
    #[error("Failed to send on channel: {0}")]
    SendFailed(String),
}

/// One encoded frame on its way to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl OutboundPayload {
    pub fn len(&self) -> usize {
        match self {
            OutboundPayload::Text(text) => text.len(),
            OutboundPayload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A message as delivered by the channel, before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    Text(String),
    Binary(Bytes),
}

/// Callback side of a channel: transport adapters report what happens on
/// the wire here and the session loop picks it up in delivery order.
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    sender: UnboundedSender<SessionEvent>,
}

impl ChannelEvents {
    pub(crate) fn new(sender: UnboundedSender<SessionEvent>) -> Self {
        Self { sender }
    }

    /// Returns `false` once the session that owned this channel is gone.
    pub fn message(&self, message: RawMessage) -> bool {
        self.sender.send(SessionEvent::Inbound(message)).is_ok()
    }

    pub fn closed(&self, reason: Option<String>) -> bool {
        self.sender.send(SessionEvent::ChannelClosed(reason)).is_ok()
    }
}

#[async_trait]
pub trait ChannelConnector: Send + Sync + 'static {
    /// Opens a channel to `url`. Inbound traffic and remote closure are
    /// reported through `events` for as long as the channel lives.
    async fn connect(
        &self,
        url: &str,
        events: ChannelEvents,
    ) -> Result<Box<dyn ChannelSink>, ChannelError>;
}

/// Outbound half of an open channel.
pub trait ChannelSink: Send {
    /// Queues a payload without waiting for it to reach the wire.
    /// Returns [`ChannelError::Busy`] while a previous payload is pending.
    fn send(&mut self, payload: OutboundPayload) -> Result<(), ChannelError>;

    fn close(&mut self);
}

/// Owns an open channel and closes it exactly once.
pub struct ChannelHandle {
    sink: Option<Box<dyn ChannelSink>>,
}

impl ChannelHandle {
    pub fn new(sink: Box<dyn ChannelSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn send(&mut self, payload: OutboundPayload) -> Result<(), ChannelError> {
        match self.sink.as_mut() {
            Some(sink) => sink.send(payload),
            None => Err(ChannelError::NotOpen),
        }
    }

    pub fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.close();
            tracing::debug!("Channel closed");
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("open", &self.is_open())
            .finish()
    }
}
