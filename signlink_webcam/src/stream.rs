use crate::{
    camera::Frame,
    frame::{FrameEncoder, FrameError},
    render::FrameHandle,
    session::SessionView,
};
use bytes::Bytes;
use futures::stream;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::watch, time::sleep};
use tracing::instrument;

const FRAME_BOUNDARY: &str = "frame";

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

/// Which of the session's two images a feed follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    /// Frames captured from the local camera.
    Preview,
    /// Frames drawn from the backend's annotated output.
    Annotated,
}

#[derive(Clone)]
pub struct VideoStream {
    view: Arc<SessionView>,
    encoder: Arc<FrameEncoder>,
    source: FeedSource,
    delay: Duration,
    shutdown: watch::Receiver<bool>,
}

impl VideoStream {
    pub fn new(
        view: Arc<SessionView>,
        encoder: Arc<FrameEncoder>,
        source: FeedSource,
        delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            view,
            encoder,
            source,
            delay,
            shutdown,
        }
    }

    pub fn content_type() -> String {
        format!("multipart/x-mixed-replace; boundary={}", FRAME_BOUNDARY)
    }

    fn latest(&self) -> Option<Shown> {
        match self.source {
            FeedSource::Preview => self.view.preview_frame().map(Shown::Preview),
            FeedSource::Annotated => self.view.annotated_frame().map(Shown::Annotated),
        }
    }

    /// Multipart JPEG parts until the server shuts down. Waits while the
    /// session has nothing to show; annotated frames are sent once each.
    #[instrument(skip(self))]
    pub fn generate_stream(self) -> impl futures::Stream<Item = Result<Bytes, VideoStreamError>> {
        stream::unfold((self, None::<u64>), |(feed, last)| async move {
            loop {
                if *feed.shutdown.borrow() {
                    return None;
                }
                sleep(feed.delay).await;
                let Some(shown) = feed.latest() else {
                    continue;
                };
                let generation = shown.generation();
                if feed.source == FeedSource::Annotated && last == Some(generation) {
                    continue;
                }
                let part = match feed.encoder.encode_jpeg(shown.image()) {
                    Ok(jpeg) => multipart_part(&jpeg),
                    Err(e) => {
                        tracing::error!("Error encoding frame: {:?}", e);
                        return Some((Err(VideoStreamError::from(e)), (feed, last)));
                    }
                };
                return Some((Ok(part), (feed, Some(generation))));
            }
        })
    }
}

enum Shown {
    Preview(Arc<Frame>),
    Annotated(FrameHandle),
}

impl Shown {
    fn generation(&self) -> u64 {
        match self {
            Shown::Preview(_) => 0,
            Shown::Annotated(frame) => frame.generation,
        }
    }

    fn image(&self) -> &Frame {
        match self {
            Shown::Preview(frame) => frame,
            Shown::Annotated(frame) => &frame.image,
        }
    }
}

fn multipart_part(jpeg: &[u8]) -> Bytes {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        jpeg.len()
    );
    let mut body = part_header.into_bytes();
    body.extend_from_slice(jpeg);
    body.extend_from_slice(b"\r\n");
    Bytes::from(body)
}
