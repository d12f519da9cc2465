use crate::channel::{
    ChannelConnector, ChannelError, ChannelEvents, ChannelSink, OutboundPayload, RawMessage,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::instrument;

/// Frames queued ahead of the socket writer. One means a new frame is only
/// accepted once the previous one has been handed to the socket.
const OUTBOUND_QUEUE: usize = 1;

/// Opens WebSocket channels to the inference backend.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    #[instrument(skip(self, events))]
    async fn connect(
        &self,
        url: &str,
        events: ChannelEvents,
    ) -> Result<Box<dyn ChannelSink>, ChannelError> {
        let connecting = connect_async(url);
        let connected = match self.connect_timeout {
            Some(limit) => timeout(limit, connecting)
                .await
                .map_err(|_| ChannelError::ConnectTimeout(limit))?,
            None => connecting.await,
        };
        let (socket, _response) =
            connected.map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;
        tracing::info!("Channel open to {}", url);

        let (mut write, mut read) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = write.send(message).await {
                    tracing::warn!("Failed to write frame to channel: {}", e);
                    break;
                }
            }
            // Sender dropped: the session closed the channel.
            if let Err(e) = write.close().await {
                tracing::debug!("Channel close handshake failed: {}", e);
            }
        });

        let reader = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if !events.message(RawMessage::Text(text.as_str().to_owned())) {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if !events.message(RawMessage::Binary(bytes)) {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.as_str().to_owned());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };
            events.closed(reason);
        });

        Ok(Box::new(WebSocketSink {
            outbound: Some(outbound_tx),
            reader,
        }))
    }
}

struct WebSocketSink {
    outbound: Option<mpsc::Sender<Message>>,
    reader: JoinHandle<()>,
}

impl ChannelSink for WebSocketSink {
    fn send(&mut self, payload: OutboundPayload) -> Result<(), ChannelError> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(ChannelError::NotOpen);
        };
        let message = match payload {
            OutboundPayload::Text(text) => Message::Text(text.into()),
            OutboundPayload::Binary(bytes) => Message::Binary(bytes.into()),
        };
        outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Busy,
            TrySendError::Closed(_) => {
                ChannelError::SendFailed("channel writer has stopped".into())
            }
        })
    }

    fn close(&mut self) {
        self.outbound.take();
        self.reader.abort();
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.close();
    }
}
